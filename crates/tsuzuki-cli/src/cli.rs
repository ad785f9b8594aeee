use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tsuzuki")]
#[command(author, version, about = "Queue whitelisted anime releases from RSS feeds")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the configured feeds until interrupted
    Poll,

    /// Run a single polling cycle and exit
    Once,

    /// Parse a release title and print its elements as JSON
    Parse {
        /// Release title or file name
        title: String,
    },

    /// Parse a release title and print its canonical identity
    Resolve {
        /// Release title or file name
        title: String,

        /// AniList ID to resolve against
        #[arg(long)]
        anilist_id: Option<u64>,
    },

    /// Manage the download whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
}

#[derive(Subcommand)]
pub enum WhitelistAction {
    /// Add a show to the whitelist
    Add {
        /// Title matched against release names
        title: String,

        /// Release group to require, or "any"
        #[arg(long, default_value = "any")]
        group: String,

        /// Comma-separated words that must appear in the release name
        #[arg(long, default_value = "")]
        keywords: String,

        /// Comma-separated words that must not appear in the release name
        #[arg(long, default_value = "")]
        exclude: String,

        /// Required quality such as 1080p, or "any"
        #[arg(long, default_value = "any")]
        quality: String,

        /// AniList ID of the show
        #[arg(long)]
        anilist_id: Option<u64>,

        /// Other title the show is released under (repeatable)
        #[arg(long = "variant")]
        variants: Vec<String>,

        /// Release group accepted despite the group lists (repeatable)
        #[arg(long = "allow-group")]
        allow_groups: Vec<String>,
    },

    /// List whitelist entries
    List,

    /// Remove a whitelist entry by ID
    Remove {
        /// Entry ID as shown by `whitelist list`
        id: i64,
    },
}
