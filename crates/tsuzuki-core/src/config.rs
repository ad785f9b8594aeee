use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::TsuzukiError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub feeds: FeedsConfig,
    pub sources: SourcesConfig,
    pub groups: GroupsConfig,
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub poll_interval_secs: u64,
    /// Directory for a daily rolling log file. Console only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    pub urls: Vec<String>,
    pub retry_attempts: u32,
    pub retry_backoff_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub relations_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides_url: Option<String>,
    pub relations_refresh_hours: u64,
    pub overrides_refresh_hours: u64,
    /// Local override document, merged above the global one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_overrides_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsConfig {
    /// Release groups accepted for "any group" entries. Empty accepts all.
    pub allowed: Vec<String>,
    /// Release groups never accepted unless an entry overrides them.
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory the torrent client watches for download requests.
    pub watch_dir: PathBuf,
}

impl AppConfig {
    /// Load config: user file (if exists) merged over built-in defaults.
    pub fn load() -> Result<Self, TsuzukiError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            Self::load_from(&user_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load an explicit config file, merged over built-in defaults.
    pub fn load_from(path: &Path) -> Result<Self, TsuzukiError> {
        let user_str = std::fs::read_to_string(path)
            .map_err(|e| TsuzukiError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&user_str)
    }

    /// Parse a (possibly partial) TOML document over the defaults.
    pub fn from_toml(text: &str) -> Result<Self, TsuzukiError> {
        let mut merged: toml::Value =
            toml::from_str(DEFAULT_CONFIG).map_err(|e| TsuzukiError::Config(e.to_string()))?;
        let user: toml::Value =
            toml::from_str(text).map_err(|e| TsuzukiError::Config(e.to_string()))?;
        merge(&mut merged, user);

        let config: AppConfig = merged
            .try_into()
            .map_err(|e: toml::de::Error| TsuzukiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), TsuzukiError> {
        if self.general.poll_interval_secs == 0 {
            return Err(TsuzukiError::Config(
                "general.poll_interval_secs must be positive".into(),
            ));
        }
        if self.feeds.retry_attempts == 0 {
            return Err(TsuzukiError::Config(
                "feeds.retry_attempts must be at least 1".into(),
            ));
        }
        let urls = self
            .feeds
            .urls
            .iter()
            .chain(std::iter::once(&self.sources.relations_url))
            .chain(&self.sources.overrides_url);
        for url in urls {
            url::Url::parse(url).map_err(|e| TsuzukiError::Config(format!("invalid URL '{url}': {e}")))?;
        }
        Ok(())
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Directory holding the database and the rule caches.
    pub fn data_dir() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path to the database file.
    pub fn db_path() -> PathBuf {
        Self::data_dir().join("tsuzuki.db")
    }

    /// Ensure the data directory exists and return the DB path.
    pub fn ensure_db_path() -> Result<PathBuf, TsuzukiError> {
        std::fs::create_dir_all(Self::data_dir())?;
        Ok(Self::db_path())
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "tsuzuki")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}

/// Recursively overlay `overlay` onto `base`. Tables merge; everything else
/// replaces.
fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = AppConfig::default();
        assert_eq!(config.general.poll_interval_secs, 600);
        assert_eq!(config.feeds.retry_attempts, 3);
        assert_eq!(config.sources.relations_refresh_hours, 12);
        assert_eq!(config.sources.overrides_refresh_hours, 6);
        assert!(config.sources.overrides_url.is_none());
        assert!(config.groups.allowed.iter().any(|g| g == "SubsPlease"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_user_file_merges() {
        let config = AppConfig::from_toml(
            "[general]\npoll_interval_secs = 60\n[groups]\nblocked = [\"BadGroup\"]\n",
        )
        .unwrap();
        assert_eq!(config.general.poll_interval_secs, 60);
        assert_eq!(config.groups.blocked, ["BadGroup"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.feeds.timeout_secs, 30);
        assert!(!config.groups.allowed.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml("[general]\npoll_interval_secs = 0\n").is_err());
        assert!(AppConfig::from_toml("[feeds]\nurls = [\"not a url\"]\n").is_err());
        assert!(AppConfig::from_toml("not toml at all [").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[download]\nwatch_dir = \"/tmp/watch\"\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.download.watch_dir, PathBuf::from("/tmp/watch"));
    }

    #[test]
    fn test_roundtrip() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(
            deserialized.general.poll_interval_secs,
            config.general.poll_interval_secs
        );
    }
}
