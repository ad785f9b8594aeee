use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::SourcesConfig;
use crate::error::TsuzukiError;
use crate::feed;
use crate::overrides::OverrideRules;
use crate::relations::RelationDatabase;
use crate::snapshot::Snapshot;

const RELATIONS_CACHE: &str = "relations.txt";
const OVERRIDES_CACHE: &str = "overrides.json";

/// The rule data one polling cycle resolves against.
///
/// Taken once per cycle; refreshes during the cycle do not affect it.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub relations: Arc<RelationDatabase>,
    pub global: Arc<OverrideRules>,
    pub user: Arc<OverrideRules>,
}

/// Which sources are past their refresh interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDue {
    pub relations: bool,
    pub overrides: bool,
}

#[derive(Debug, Default)]
struct RefreshTimes {
    relations: Option<DateTime<Utc>>,
    overrides: Option<DateTime<Utc>>,
}

/// Owner of the periodically refreshed rule snapshots.
///
/// Every successful fetch replaces its snapshot whole and is written to the
/// on-disk cache. Failed fetches and invalid documents leave the previous
/// snapshot in place.
#[derive(Debug)]
pub struct RuleSources {
    relations: Snapshot<RelationDatabase>,
    global: Snapshot<OverrideRules>,
    user: Snapshot<OverrideRules>,
    cache_dir: Option<PathBuf>,
    relations_ttl: chrono::Duration,
    overrides_ttl: chrono::Duration,
    refreshed: Mutex<RefreshTimes>,
}

impl RuleSources {
    /// Empty rule sets. `cache_dir` enables the last-known-good cache.
    pub fn new(config: &SourcesConfig, cache_dir: Option<PathBuf>) -> Self {
        Self {
            relations: Snapshot::default(),
            global: Snapshot::default(),
            user: Snapshot::default(),
            cache_dir,
            relations_ttl: hours(config.relations_refresh_hours),
            overrides_ttl: hours(config.overrides_refresh_hours),
            refreshed: Mutex::new(RefreshTimes::default()),
        }
    }

    /// Current snapshots of all three rule sets.
    pub fn rules(&self) -> RuleSet {
        RuleSet {
            relations: self.relations.load(),
            global: self.global.load(),
            user: self.user.load(),
        }
    }

    /// Install whatever the on-disk cache holds. A cache file counts as
    /// refreshed at its modification time.
    pub fn load_cache(&self) {
        let Some(dir) = &self.cache_dir else {
            return;
        };

        if let Some((text, modified)) = read_cache(&dir.join(RELATIONS_CACHE)) {
            match self.set_relations(&text) {
                Ok(()) => self.times().relations = modified,
                Err(e) => warn!(error = %e, "Ignoring cached relations"),
            }
        }
        if let Some((text, modified)) = read_cache(&dir.join(OVERRIDES_CACHE)) {
            match self.set_overrides(&text) {
                Ok(()) => self.times().overrides = modified,
                Err(e) => warn!(error = %e, "Ignoring cached overrides"),
            }
        }
    }

    /// Load the user override document. A missing file means no user rules.
    pub fn load_user_overrides(&self, path: &Path) -> Result<(), TsuzukiError> {
        if !path.exists() {
            self.user.replace(OverrideRules::default());
            return Ok(());
        }
        let text = std::fs::read_to_string(path)?;
        let rules = OverrideRules::parse_user(&text)?;
        info!(path = %path.display(), rules = rules.len(), "Loaded user overrides");
        self.user.replace(rules);
        Ok(())
    }

    /// Validate and install a relations document, then cache it.
    pub fn install_relations(&self, text: &str, now: DateTime<Utc>) -> Result<(), TsuzukiError> {
        self.set_relations(text)?;
        self.times().relations = Some(now);
        self.write_cache(RELATIONS_CACHE, text);
        Ok(())
    }

    /// Validate and install a global override document, then cache it.
    pub fn install_overrides(&self, text: &str, now: DateTime<Utc>) -> Result<(), TsuzukiError> {
        self.set_overrides(text)?;
        self.times().overrides = Some(now);
        self.write_cache(OVERRIDES_CACHE, text);
        Ok(())
    }

    /// Sources whose last successful refresh is older than their interval.
    pub fn refresh_due(&self, now: DateTime<Utc>) -> RefreshDue {
        let times = self.times();
        let due = |last: Option<DateTime<Utc>>, ttl: chrono::Duration| {
            last.is_none_or(|last| now - last >= ttl)
        };
        RefreshDue {
            relations: due(times.relations, self.relations_ttl),
            overrides: due(times.overrides, self.overrides_ttl),
        }
    }

    /// Fetch every due source. Failures are logged and the old rules kept.
    pub async fn refresh(&self, client: &reqwest::Client, config: &SourcesConfig, timeout: Duration) {
        let due = self.refresh_due(Utc::now());

        if due.relations {
            let result = match feed::fetch_text(client, &config.relations_url, timeout).await {
                Ok(text) => self.install_relations(&text, Utc::now()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "Relations refresh failed, keeping previous rules");
            }
        }

        if let (true, Some(url)) = (due.overrides, &config.overrides_url) {
            let result = match feed::fetch_text(client, url, timeout).await {
                Ok(text) => self.install_overrides(&text, Utc::now()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "Override refresh failed, keeping previous rules");
            }
        }
    }

    fn set_relations(&self, text: &str) -> Result<(), TsuzukiError> {
        let db = RelationDatabase::parse(text)?;
        info!(
            rules = db.rules().len(),
            skipped = db.skipped(),
            version = db.meta().version.as_deref().unwrap_or("?"),
            last_modified = db.meta().last_modified.as_deref().unwrap_or("?"),
            "Relations loaded"
        );
        self.relations.replace(db);
        Ok(())
    }

    fn set_overrides(&self, text: &str) -> Result<(), TsuzukiError> {
        let rules = OverrideRules::parse(text)?;
        info!(rules = rules.len(), "Global overrides loaded");
        self.global.replace(rules);
        Ok(())
    }

    fn write_cache(&self, name: &str, text: &str) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let result = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(dir.join(name), text));
        if let Err(e) = result {
            warn!(file = name, error = %e, "Failed to write rule cache");
        }
    }

    fn times(&self) -> std::sync::MutexGuard<'_, RefreshTimes> {
        self.refreshed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn hours(h: u64) -> chrono::Duration {
    // Capped well inside chrono's range.
    chrono::Duration::hours(h.min(1_000_000) as i64)
}

fn read_cache(path: &Path) -> Option<(String, Option<DateTime<Utc>>)> {
    let text = std::fs::read_to_string(path).ok()?;
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    Some((text, modified))
}
