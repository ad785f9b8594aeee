mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tsuzuki_core::config::AppConfig;
use tsuzuki_core::download::WatchDirDownloader;
use tsuzuki_core::error::TsuzukiError;
use tsuzuki_core::feed;
use tsuzuki_core::models::{FeedItem, WhitelistEntry};
use tsuzuki_core::pipeline::{CycleGate, Pipeline};
use tsuzuki_core::resolver::{IdentityResolver, ResolveQuery};
use tsuzuki_core::sources::RuleSources;
use tsuzuki_core::storage::Storage;
use tsuzuki_core::whitelist::GroupPolicy;

use cli::{Cli, Commands, WhitelistAction};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), TsuzukiError> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let _log_guard = init_logging(cli.verbose, config.general.log_dir.as_deref());

    match cli.command {
        Commands::Parse { title } => parse_title(&title),
        Commands::Resolve { title, anilist_id } => resolve_title(&config, &title, anilist_id),
        Commands::Whitelist { action } => manage_whitelist(action),
        Commands::Once => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let app = App::new(config)?;
                app.cycle().await;
                Ok::<(), TsuzukiError>(())
            })
        }
        Commands::Poll => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let app = App::new(config)?;
                app.poll().await;
                Ok::<(), TsuzukiError>(())
            })
        }
    }
}

/// Console logging filtered by `RUST_LOG` (or `-v`), plus a daily log file
/// when a log directory is configured. The guard must outlive the program.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default = if verbose { "tsuzuki=debug" } else { "tsuzuki=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tsuzuki.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn parse_title(title: &str) -> Result<(), TsuzukiError> {
    let elements = tsuzuki_parse::parse(title)
        .ok_or_else(|| TsuzukiError::Parse(format!("nothing recognised in {title:?}")))?;
    println!("{}", serde_json::to_string_pretty(&elements)?);
    Ok(())
}

fn resolve_title(config: &AppConfig, title: &str, anilist_id: Option<u64>) -> Result<(), TsuzukiError> {
    let elements = tsuzuki_parse::parse(title)
        .ok_or_else(|| TsuzukiError::Parse(format!("nothing recognised in {title:?}")))?;
    let (Some(parsed_title), Some(episode)) = (elements.anime_title(), elements.episode()) else {
        return Err(TsuzukiError::Parse(format!("no title and episode in {title:?}")));
    };

    let sources = RuleSources::new(&config.sources, Some(AppConfig::data_dir()));
    sources.load_cache();
    if let Some(path) = &config.sources.user_overrides_path {
        sources.load_user_overrides(path)?;
    }
    let rules = sources.rules();

    let query = ResolveQuery {
        release_group: elements.release_group(),
        anilist_id,
        ..ResolveQuery::new(parsed_title, episode)
    };
    let resolution = IdentityResolver::new(&rules).resolve(&query);

    println!("Parsed:    {parsed_title} - {episode:02}");
    println!("Canonical: {} - {:02}", resolution.title, resolution.episode);
    if let Some(id) = resolution.anilist_id {
        println!("AniList:   {id}");
    }
    if let Some(stage) = resolution.title_stage {
        println!("Title rule:   {stage:?}");
    }
    if let Some(stage) = resolution.episode_stage {
        println!("Episode rule: {stage:?}");
    }
    Ok(())
}

fn manage_whitelist(action: WhitelistAction) -> Result<(), TsuzukiError> {
    let storage = Storage::open(&AppConfig::ensure_db_path()?)?;
    match action {
        WhitelistAction::Add {
            title,
            group,
            keywords,
            exclude,
            quality,
            anilist_id,
            variants,
            allow_groups,
        } => {
            let entry = WhitelistEntry {
                group,
                keywords,
                exclude_keywords: exclude,
                quality,
                anilist_id,
                title_variants: variants,
                group_overrides: allow_groups,
                ..WhitelistEntry::new(title)
            };
            if entry.title.trim().is_empty() {
                return Err(TsuzukiError::Config("whitelist title must not be empty".into()));
            }
            let id = storage.add_whitelist_entry(&entry)?;
            println!("Added #{id}: {}", entry.title);
        }
        WhitelistAction::List => {
            let entries = storage.whitelist_entries()?;
            if entries.is_empty() {
                println!("Whitelist is empty.");
            }
            for entry in entries {
                println!(
                    "#{:<4} {}  [group: {}, quality: {}]",
                    entry.id, entry.title, entry.group, entry.quality
                );
                if !entry.keywords.is_empty() || !entry.exclude_keywords.is_empty() {
                    println!("      keywords: {:?}  exclude: {:?}", entry.keywords, entry.exclude_keywords);
                }
                if let Some(id) = entry.anilist_id {
                    println!("      anilist: {id}");
                }
            }
        }
        WhitelistAction::Remove { id } => {
            if storage.remove_whitelist_entry(id)? {
                println!("Removed #{id}");
            } else {
                return Err(TsuzukiError::Config(format!("no whitelist entry #{id}")));
            }
        }
    }
    Ok(())
}

/// Long-lived state for the polling driver.
struct App {
    config: AppConfig,
    storage: Storage,
    sources: RuleSources,
    client: reqwest::Client,
    downloader: WatchDirDownloader,
    policy: GroupPolicy,
    gate: CycleGate,
}

impl App {
    fn new(config: AppConfig) -> Result<Self, TsuzukiError> {
        let storage = Storage::open(&AppConfig::ensure_db_path()?)?;

        // Last-known-good rules first, so a dead network at boot still works.
        let sources = RuleSources::new(&config.sources, Some(AppConfig::data_dir()));
        sources.load_cache();

        let client = reqwest::Client::builder()
            .user_agent(concat!("tsuzuki/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TsuzukiError::Feed(e.to_string()))?;

        Ok(Self {
            downloader: WatchDirDownloader::new(&config.download.watch_dir),
            policy: GroupPolicy::new(config.groups.allowed.clone(), config.groups.blocked.clone()),
            config,
            storage,
            sources,
            client,
            gate: CycleGate::new(),
        })
    }

    async fn poll(&self) {
        let period = Duration::from_secs(self.config.general.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = period.as_secs(), feeds = self.config.feeds.urls.len(), "Polling started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.cycle().await,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }
    }

    /// One full cycle. Never fails: problems are logged and the next cycle
    /// starts from scratch.
    async fn cycle(&self) {
        let Some(_running) = self.gate.try_enter() else {
            tracing::info!("Previous cycle still running, skipping trigger");
            return;
        };

        let timeout = Duration::from_secs(self.config.feeds.timeout_secs);
        self.sources.refresh(&self.client, &self.config.sources, timeout).await;
        if let Some(path) = &self.config.sources.user_overrides_path {
            if let Err(e) = self.sources.load_user_overrides(path) {
                tracing::warn!(path = %path.display(), error = %e, "User overrides invalid, keeping previous");
            }
        }

        let items = self.fetch_items().await;
        if items.is_empty() {
            tracing::debug!("No feed items this cycle");
            return;
        }

        let entries = match self.storage.whitelist_entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load whitelist, skipping cycle");
                return;
            }
        };

        let rules = self.sources.rules();
        Pipeline::new(&self.storage, &self.downloader, &self.policy).run_cycle(&rules, &entries, &items);
    }

    async fn fetch_items(&self) -> Vec<FeedItem> {
        let fetches = self
            .config
            .feeds
            .urls
            .iter()
            .map(|url| feed::fetch_with_retry(&self.client, url, &self.config.feeds));

        futures::future::join_all(fetches)
            .await
            .into_iter()
            .zip(&self.config.feeds.urls)
            .filter_map(|(result, url)| match result {
                Ok(items) => {
                    tracing::debug!(url = %url, items = items.len(), "Fetched feed");
                    Some(items)
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Feed unavailable this cycle");
                    None
                }
            })
            .flatten()
            .collect()
    }
}
