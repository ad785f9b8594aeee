use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wildcard value for whitelist group and quality preferences.
pub const ANY: &str = "any";

/// A single item from an RSS feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Unique ID (from RSS `<guid>`, falling back to the link).
    pub guid: String,
    /// Raw release title.
    pub title: String,
    /// Torrent or magnet link.
    pub link: String,
    pub pub_date: Option<DateTime<Utc>>,
}

/// A show the user wants downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: i64,
    pub title: String,
    /// Exact release group, or [`ANY`].
    pub group: String,
    /// Comma-separated substrings that must all appear in the raw title.
    pub keywords: String,
    /// Comma-separated substrings that must not appear in the raw title.
    pub exclude_keywords: String,
    /// Raw-title substring such as "1080p", or [`ANY`].
    pub quality: String,
    pub anilist_id: Option<u64>,
    /// Extra spellings the canonical title may take (romaji, english, ...).
    pub title_variants: Vec<String>,
    /// Groups accepted for this entry even when the group policy rejects them.
    pub group_overrides: Vec<String>,
}

impl WhitelistEntry {
    /// A new entry with no filters.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            group: ANY.into(),
            keywords: String::new(),
            exclude_keywords: String::new(),
            quality: ANY.into(),
            anilist_id: None,
            title_variants: Vec::new(),
            group_overrides: Vec::new(),
        }
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        split_list(&self.keywords)
    }

    pub fn exclude_keywords(&self) -> impl Iterator<Item = &str> {
        split_list(&self.exclude_keywords)
    }

    pub fn wants_any_group(&self) -> bool {
        is_any(&self.group)
    }

    pub fn wants_any_quality(&self) -> bool {
        is_any(&self.quality)
    }

    /// Whether this entry asks for `group` by name, either as its preferred
    /// group or as an override.
    pub fn requests_group(&self, group: &str) -> bool {
        (!self.wants_any_group() && self.group == group)
            || self
                .group_overrides
                .iter()
                .any(|g| g.eq_ignore_ascii_case(group))
    }
}

fn is_any(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case(ANY)
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Cached external title variants for one AniList entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeTitles {
    pub anilist_id: u64,
    pub romaji: Option<String>,
    /// Romaji with season and punctuation noise removed.
    pub romaji_cleaned: Option<String>,
    pub english: Option<String>,
    pub synonyms: Vec<String>,
}

impl AnimeTitles {
    /// Every known title, romaji first.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.romaji
            .iter()
            .chain(&self.romaji_cleaned)
            .chain(&self.english)
            .chain(&self.synonyms)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// A whitelisted feed item tagged with its canonical identity.
///
/// Lives for one cycle; at most one per canonical title is emitted.
#[derive(Debug, Clone)]
pub struct DownloadCandidate {
    pub guid: String,
    pub raw_title: String,
    pub link: String,
    pub canonical_title: String,
    pub canonical_episode: u32,
    pub parsed_title: String,
    pub episode_title: Option<String>,
    pub release_group: Option<String>,
    pub resolution: Option<String>,
    pub checksum: Option<String>,
    pub entry_id: i64,
    pub entry_title: String,
    /// Normalized title variations used for duplicate detection.
    pub title_variations: Vec<String>,
    pub override_applied: bool,
}

/// What the download collaborator receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub torrent_link: String,
    pub raw_title: String,
    pub display_title: String,
    /// The feed item's guid.
    pub source_ref: String,
}

/// Lifecycle of a processed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "downloading" => Self::Downloading,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A persisted download, keyed by canonical episode and title variations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub entry_id: i64,
    pub original_filename: String,
    pub final_title: String,
    pub canonical_episode: u32,
    /// The primary variation (normalized canonical title).
    pub canonical_title_variation: String,
    /// All variations the record is indexed under.
    pub variations: Vec<String>,
    pub release_group: Option<String>,
    pub resolution: Option<String>,
    pub checksum: Option<String>,
    pub link: String,
    pub status: RecordStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lists() {
        let mut entry = WhitelistEntry::new("Title");
        entry.keywords = "1080p, HEVC ,".into();
        assert_eq!(entry.keywords().collect::<Vec<_>>(), ["1080p", "HEVC"]);
        assert_eq!(entry.exclude_keywords().count(), 0);
    }

    #[test]
    fn test_requests_group() {
        let mut entry = WhitelistEntry::new("Title");
        assert!(!entry.requests_group("SubsPlease"));
        entry.group = "SubsPlease".into();
        assert!(entry.requests_group("SubsPlease"));
        entry.group = ANY.into();
        entry.group_overrides = vec!["erai-raws".into()];
        assert!(entry.requests_group("Erai-raws"));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RecordStatus::Queued,
            RecordStatus::Downloading,
            RecordStatus::Completed,
            RecordStatus::Failed,
        ] {
            assert_eq!(RecordStatus::from_db_str(status.as_db_str()), status);
        }
    }

    #[test]
    fn test_anime_titles_all() {
        let titles = AnimeTitles {
            anilist_id: 1,
            romaji: Some("Sousou no Frieren".into()),
            romaji_cleaned: None,
            english: Some("Frieren: Beyond Journey's End".into()),
            synonyms: vec!["".into(), "Frieren".into()],
        };
        assert_eq!(titles.all().count(), 3);
    }
}
