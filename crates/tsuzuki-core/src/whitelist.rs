use tracing::{debug, warn};

use crate::error::TsuzukiError;
use crate::models::WhitelistEntry;
use crate::relations::RelationDatabase;

/// Source of alternate titles for an AniList entry.
pub trait TitleCatalog {
    fn alternate_titles(&self, anilist_id: u64) -> Result<Vec<String>, TsuzukiError>;
}

/// Release groups accepted for entries that take any group.
#[derive(Debug, Clone, Default)]
pub struct GroupPolicy {
    /// Fixed allow-list. Empty allows every group.
    pub allowed: Vec<String>,
    /// User block-list.
    pub blocked: Vec<String>,
}

impl GroupPolicy {
    pub fn new(allowed: Vec<String>, blocked: Vec<String>) -> Self {
        Self { allowed, blocked }
    }

    pub fn is_allowed(&self, group: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|g| g.eq_ignore_ascii_case(group))
    }

    pub fn is_blocked(&self, group: &str) -> bool {
        self.blocked.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

/// How an entry matched, in the order tiers are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// Raw release title contains the entry title.
    RawTitle,
    /// Canonical title contains the entry title.
    CanonicalTitle,
    /// Canonical title equals one of the entry's stored title variants.
    TitleVariant,
    /// An AniList alternate title overlaps the canonical title and a relation
    /// rule covers the episode.
    AlternateTitle,
}

/// What the matcher looks at for one release.
#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub raw_title: &'a str,
    pub canonical_title: &'a str,
    pub canonical_episode: u32,
    pub release_group: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct WhitelistMatch<'a> {
    pub entry: &'a WhitelistEntry,
    pub tier: MatchTier,
}

/// Matches releases against whitelist entries.
pub struct WhitelistMatcher<'a, C> {
    entries: &'a [WhitelistEntry],
    policy: &'a GroupPolicy,
    catalog: &'a C,
    relations: &'a RelationDatabase,
}

impl<'a, C: TitleCatalog> WhitelistMatcher<'a, C> {
    pub fn new(
        entries: &'a [WhitelistEntry],
        policy: &'a GroupPolicy,
        catalog: &'a C,
        relations: &'a RelationDatabase,
    ) -> Self {
        Self {
            entries,
            policy,
            catalog,
            relations,
        }
    }

    /// Whether some entry names `group` as its preferred or overridden group.
    pub fn requests_group(&self, group: &str) -> bool {
        self.entries.iter().any(|e| e.requests_group(group))
    }

    /// First entry that matches and passes its filter. An entry that errors
    /// is logged and skipped.
    pub fn find(&self, input: &MatchInput<'_>) -> Option<WhitelistMatch<'a>> {
        self.entries.iter().find_map(|entry| {
            match self.match_entry(entry, input) {
                Ok(Some(tier)) => Some(WhitelistMatch { entry, tier }),
                Ok(None) => None,
                Err(e) => {
                    warn!(entry = %entry.title, error = %e, "Whitelist entry failed, skipping");
                    None
                }
            }
        })
    }

    fn match_entry(
        &self,
        entry: &WhitelistEntry,
        input: &MatchInput<'_>,
    ) -> Result<Option<MatchTier>, TsuzukiError> {
        let Some(tier) = self.match_tier(entry, input)? else {
            return Ok(None);
        };
        if !self.passes_filter(entry, input) {
            debug!(entry = %entry.title, raw_title = input.raw_title, ?tier, "Matched but filtered out");
            return Ok(None);
        }
        Ok(Some(tier))
    }

    fn match_tier(
        &self,
        entry: &WhitelistEntry,
        input: &MatchInput<'_>,
    ) -> Result<Option<MatchTier>, TsuzukiError> {
        let wanted = entry.title.trim().to_lowercase();
        if wanted.is_empty() {
            return Err(TsuzukiError::Config(format!(
                "whitelist entry {} has an empty title",
                entry.id
            )));
        }
        let canonical = input.canonical_title.to_lowercase();

        if input.raw_title.to_lowercase().contains(&wanted) {
            return Ok(Some(MatchTier::RawTitle));
        }
        if canonical.contains(&wanted) {
            return Ok(Some(MatchTier::CanonicalTitle));
        }
        if entry
            .title_variants
            .iter()
            .any(|v| v.to_lowercase() == canonical)
        {
            return Ok(Some(MatchTier::TitleVariant));
        }

        if let Some(id) = entry.anilist_id.filter(|_| !canonical.is_empty()) {
            let overlaps = self
                .catalog
                .alternate_titles(id)?
                .iter()
                .map(|t| t.to_lowercase())
                .filter(|t| !t.is_empty())
                .any(|t| t.contains(&canonical) || canonical.contains(&t));
            if overlaps && self.relations.has_rule_for(id, input.canonical_episode) {
                return Ok(Some(MatchTier::AlternateTitle));
            }
        }

        Ok(None)
    }

    fn passes_filter(&self, entry: &WhitelistEntry, input: &MatchInput<'_>) -> bool {
        let raw = input.raw_title.to_lowercase();
        let has = |needle: &str| raw.contains(&needle.to_lowercase());

        if !entry.keywords().all(has) {
            return false;
        }
        if entry.exclude_keywords().any(has) {
            return false;
        }
        if !entry.wants_any_quality() && !has(&entry.quality) {
            return false;
        }

        if !entry.wants_any_group() {
            return input.release_group == Some(entry.group.as_str());
        }

        match input.release_group {
            Some(group) if entry.requests_group(group) => true,
            Some(group) => self.policy.is_allowed(group) && !self.policy.is_blocked(group),
            None => self.policy.allowed.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::ANY;

    #[derive(Default)]
    struct Catalog {
        titles: HashMap<u64, Vec<String>>,
        failing: Vec<u64>,
    }

    impl TitleCatalog for Catalog {
        fn alternate_titles(&self, anilist_id: u64) -> Result<Vec<String>, TsuzukiError> {
            if self.failing.contains(&anilist_id) {
                return Err(TsuzukiError::Parse("catalog unavailable".into()));
            }
            Ok(self.titles.get(&anilist_id).cloned().unwrap_or_default())
        }
    }

    fn policy() -> GroupPolicy {
        GroupPolicy::new(
            vec!["SubsPlease".into(), "Erai-raws".into()],
            vec!["Erai-raws".into()],
        )
    }

    fn input<'a>(raw: &'a str, canonical: &'a str, group: Option<&'a str>) -> MatchInput<'a> {
        MatchInput {
            raw_title: raw,
            canonical_title: canonical,
            canonical_episode: 5,
            release_group: group,
        }
    }

    fn find_tier(entries: &[WhitelistEntry], catalog: &Catalog, input: MatchInput<'_>) -> Option<MatchTier> {
        let policy = policy();
        let relations = RelationDatabase::parse("::rules\n- 1|1|100:1-12 -> 2|2|200:1-12").unwrap();
        WhitelistMatcher::new(entries, &policy, catalog, &relations)
            .find(&input)
            .map(|m| m.tier)
    }

    const RAW: &str = "[SubsPlease] Sousou no Frieren - 05 (1080p) [ABCD1234].mkv";

    #[test]
    fn test_tiers_in_order() {
        let catalog = Catalog::default();
        let entries = [WhitelistEntry::new("frieren")];
        assert_eq!(
            find_tier(&entries, &catalog, input(RAW, "Sousou no Frieren", Some("SubsPlease"))),
            Some(MatchTier::RawTitle)
        );

        let entries = [WhitelistEntry::new("Renamed Show")];
        assert_eq!(
            find_tier(&entries, &catalog, input("[SubsPlease] Other - 05", "Renamed Show S2", Some("SubsPlease"))),
            Some(MatchTier::CanonicalTitle)
        );

        let mut entry = WhitelistEntry::new("Frieren: Beyond Journey's End");
        entry.title_variants = vec!["Sousou no Frieren".into()];
        assert_eq!(
            find_tier(&[entry], &catalog, input(RAW, "sousou no frieren", Some("SubsPlease"))),
            Some(MatchTier::TitleVariant)
        );
    }

    #[test]
    fn test_alternate_title_needs_relation() {
        let mut catalog = Catalog::default();
        catalog.titles.insert(100, vec!["Kusuriya no Hitorigoto".into()]);
        let mut entry = WhitelistEntry::new("The Apothecary Diaries");
        entry.anilist_id = Some(100);

        let release = input("[SubsPlease] Kusuriya - 05", "Kusuriya no Hitorigoto", Some("SubsPlease"));
        assert_eq!(
            find_tier(&[entry.clone()], &catalog, release),
            Some(MatchTier::AlternateTitle)
        );

        // Episode outside every relation rule.
        let release = MatchInput {
            canonical_episode: 30,
            ..release
        };
        assert_eq!(find_tier(&[entry.clone()], &catalog, release), None);

        // A title rewritten to nothing overlaps no alternate title.
        let blank = input("[SubsPlease] Kusuriya - 05", "", Some("SubsPlease"));
        assert_eq!(find_tier(&[entry], &catalog, blank), None);
    }

    #[test]
    fn test_keyword_filters() {
        let catalog = Catalog::default();
        let mut entry = WhitelistEntry::new("Frieren");
        entry.keywords = "1080p, ABCD".into();
        assert!(find_tier(&[entry.clone()], &catalog, input(RAW, "Sousou no Frieren", Some("SubsPlease"))).is_some());

        entry.exclude_keywords = "abcd1234".into();
        assert!(find_tier(&[entry.clone()], &catalog, input(RAW, "Sousou no Frieren", Some("SubsPlease"))).is_none());

        entry.exclude_keywords.clear();
        entry.quality = "720p".into();
        assert!(find_tier(&[entry], &catalog, input(RAW, "Sousou no Frieren", Some("SubsPlease"))).is_none());
    }

    #[test]
    fn test_group_preferences() {
        let catalog = Catalog::default();
        let release = |group| input(RAW, "Sousou no Frieren", group);

        let mut entry = WhitelistEntry::new("Frieren");
        entry.group = "SubsPlease".into();
        assert!(find_tier(&[entry.clone()], &catalog, release(Some("SubsPlease"))).is_some());
        assert!(find_tier(&[entry.clone()], &catalog, release(Some("subsplease"))).is_none());
        assert!(find_tier(&[entry], &catalog, release(None)).is_none());

        let mut entry = WhitelistEntry::new("Frieren");
        entry.group = ANY.into();
        // Not on the allow-list.
        assert!(find_tier(&[entry.clone()], &catalog, release(Some("Unknown"))).is_none());
        // Allowed but blocked.
        assert!(find_tier(&[entry.clone()], &catalog, release(Some("Erai-raws"))).is_none());
        // Override lifts the block.
        entry.group_overrides = vec!["Erai-raws".into()];
        assert!(find_tier(&[entry], &catalog, release(Some("Erai-raws"))).is_some());
    }

    #[test]
    fn test_failing_entry_does_not_stop_others() {
        let catalog = Catalog {
            failing: vec![7],
            ..Default::default()
        };
        let mut broken = WhitelistEntry::new("Nothing Like It");
        broken.anilist_id = Some(7);
        let empty = WhitelistEntry::new("  ");
        let good = WhitelistEntry::new("Frieren");

        assert_eq!(
            find_tier(&[broken, empty, good], &catalog, input(RAW, "Sousou no Frieren", Some("SubsPlease"))),
            Some(MatchTier::RawTitle)
        );
    }

    #[test]
    fn test_empty_allow_list_accepts_all() {
        let policy = GroupPolicy::default();
        assert!(policy.is_allowed("Anyone"));
        assert!(!policy.is_blocked("Anyone"));
    }
}
