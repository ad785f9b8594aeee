use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::TsuzukiError;
use crate::models::{
    DownloadCandidate, DownloadRequest, FeedItem, ProcessedRecord, RecordStatus, WhitelistEntry,
};
use crate::normalize::{variation_key, variation_set};
use crate::resolver::{IdentityResolver, ResolveQuery, Resolution};
use crate::sources::RuleSet;
use crate::whitelist::{GroupPolicy, MatchInput, TitleCatalog, WhitelistMatcher};

/// Record of downloads already handed off, keyed by canonical episode and
/// title variation. Records with status `failed` are ignored by both lookups.
pub trait ProcessedStore {
    /// Whether `episode` is recorded under any of `variations`.
    fn is_processed(&self, episode: u32, variations: &[String]) -> Result<bool, TsuzukiError>;

    /// Highest episode recorded with `variation` as its canonical variation.
    fn episode_floor(&self, variation: &str) -> Result<Option<u32>, TsuzukiError>;

    fn record_processed(&self, record: &ProcessedRecord) -> Result<(), TsuzukiError>;
}

/// Receives the releases chosen for download.
pub trait DownloadClient {
    fn submit(&self, request: &DownloadRequest) -> Result<(), TsuzukiError>;
}

/// Why a feed item did not become a candidate.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("title could not be parsed")]
    Unparsable,

    #[error("no episode number")]
    NoEpisode,

    #[error("release group {0:?} is not allowed")]
    GroupNotAllowed(Option<String>),

    #[error("no whitelist entry matched")]
    NotWhitelisted,

    #[error("episode {episode} of {title} already processed")]
    Duplicate { title: String, episode: u32 },

    #[error("duplicate check failed: {0}")]
    Store(TsuzukiError),
}

impl Rejection {
    /// Whether the same item may succeed in a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

// ── Phase 1: collect ────────────────────────────────────────────

/// Turns feed items into candidates tagged with their canonical identity.
pub struct Collector<'a, C, P> {
    rules: &'a RuleSet,
    matcher: WhitelistMatcher<'a, C>,
    policy: &'a GroupPolicy,
    catalog: &'a C,
    store: &'a P,
}

impl<'a, C: TitleCatalog, P: ProcessedStore> Collector<'a, C, P> {
    pub fn new(
        rules: &'a RuleSet,
        entries: &'a [WhitelistEntry],
        policy: &'a GroupPolicy,
        catalog: &'a C,
        store: &'a P,
    ) -> Self {
        Self {
            rules,
            matcher: WhitelistMatcher::new(entries, policy, catalog, &rules.relations),
            policy,
            catalog,
            store,
        }
    }

    pub fn collect(&self, item: &FeedItem) -> Result<DownloadCandidate, Rejection> {
        let elements = tsuzuki_parse::parse(&item.title).ok_or(Rejection::Unparsable)?;
        let parsed_title = elements.anime_title().ok_or(Rejection::Unparsable)?;
        let episode = elements.episode().ok_or(Rejection::NoEpisode)?;

        let group = elements.release_group();
        if !self.group_allowed(group) {
            return Err(Rejection::GroupNotAllowed(group.map(str::to_string)));
        }

        let resolver = IdentityResolver::new(self.rules);
        let query = ResolveQuery {
            release_group: group,
            ..ResolveQuery::new(parsed_title, episode)
        };
        let resolution = resolver.resolve(&query);

        let found = self
            .matcher
            .find(&MatchInput {
                raw_title: &item.title,
                canonical_title: &resolution.title,
                canonical_episode: resolution.episode,
                release_group: group,
            })
            .ok_or(Rejection::NotWhitelisted)?;
        let entry = found.entry;

        // The entry's id unlocks id-keyed rules the title alone did not hit.
        let resolution = match entry.anilist_id {
            Some(id) if !resolution.override_applied() => resolver.resolve(&ResolveQuery {
                anilist_id: Some(id),
                ..query
            }),
            _ => resolution,
        };

        let variations = self.variations(&resolution, entry);
        match self.store.is_processed(resolution.episode, &variations) {
            Ok(false) => {}
            Ok(true) => {
                return Err(Rejection::Duplicate {
                    title: resolution.title,
                    episode: resolution.episode,
                })
            }
            Err(e) => return Err(Rejection::Store(e)),
        }

        debug!(
            raw_title = %item.title,
            title = %resolution.title,
            episode = resolution.episode,
            entry = %entry.title,
            tier = ?found.tier,
            "Candidate collected"
        );

        Ok(DownloadCandidate {
            guid: item.guid.clone(),
            raw_title: item.title.clone(),
            link: item.link.clone(),
            override_applied: resolution.override_applied(),
            canonical_title: resolution.title,
            canonical_episode: resolution.episode,
            parsed_title: parsed_title.to_string(),
            episode_title: elements.episode_title().map(str::to_string),
            release_group: group.map(str::to_string),
            resolution: elements.resolution().map(str::to_string),
            checksum: elements.checksum().map(str::to_string),
            entry_id: entry.id,
            entry_title: entry.title.clone(),
            title_variations: variations,
        })
    }

    fn group_allowed(&self, group: Option<&str>) -> bool {
        match group {
            Some(g) if self.matcher.requests_group(g) => true,
            Some(g) => self.policy.is_allowed(g) && !self.policy.is_blocked(g),
            None => self.policy.allowed.is_empty(),
        }
    }

    /// Canonical title first, then the entry's own titles and cached alternates.
    fn variations(&self, resolution: &Resolution, entry: &WhitelistEntry) -> Vec<String> {
        let alternates = match entry.anilist_id {
            Some(id) => self.catalog.alternate_titles(id).unwrap_or_else(|e| {
                warn!(anilist_id = id, error = %e, "Alternate titles unavailable");
                Vec::new()
            }),
            None => Vec::new(),
        };

        variation_set(
            std::iter::once(resolution.title.as_str())
                .chain(std::iter::once(entry.title.as_str()))
                .chain(entry.title_variants.iter().map(String::as_str))
                .chain(alternates.iter().map(String::as_str)),
        )
    }
}

// ── Phase 2: select ─────────────────────────────────────────────

/// Result of choosing at most one candidate per canonical title.
#[derive(Debug, Default)]
pub struct Selection {
    pub chosen: Vec<DownloadCandidate>,
    /// Beaten by a higher episode of the same title in this batch.
    pub superseded: Vec<DownloadCandidate>,
    /// At or below an episode already recorded for the title.
    pub stale: Vec<DownloadCandidate>,
    /// Not decided this cycle because the floor lookup failed.
    pub deferred: Vec<DownloadCandidate>,
}

/// Group candidates by canonical title and keep the highest episode above
/// each group's floor. Ties go to the candidate seen first in feed order.
pub fn select<P: ProcessedStore>(candidates: Vec<DownloadCandidate>, store: &P) -> Selection {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<DownloadCandidate>> = HashMap::new();
    for candidate in candidates {
        let key = variation_key(&candidate.canonical_title);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(candidate);
    }

    let mut selection = Selection::default();
    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };

        let floor = match store.episode_floor(&key) {
            Ok(floor) => floor,
            Err(e) => {
                warn!(title = %key, error = %e, "Floor lookup failed, deferring title to next cycle");
                selection.deferred.extend(group);
                continue;
            }
        };

        let mut best: Option<DownloadCandidate> = None;
        let mut losers = Vec::new();
        for candidate in group {
            if floor.is_some_and(|f| candidate.canonical_episode <= f) {
                debug!(
                    raw_title = %candidate.raw_title,
                    title = %candidate.canonical_title,
                    episode = candidate.canonical_episode,
                    floor,
                    "At or below floor, dropping"
                );
                selection.stale.push(candidate);
                continue;
            }
            match best.take() {
                Some(current) if candidate.canonical_episode > current.canonical_episode => {
                    losers.push(current);
                    best = Some(candidate);
                }
                Some(current) => {
                    losers.push(candidate);
                    best = Some(current);
                }
                None => best = Some(candidate),
            }
        }

        if let Some(chosen) = best {
            for loser in &losers {
                info!(
                    raw_title = %loser.raw_title,
                    title = %loser.canonical_title,
                    episode = loser.canonical_episode,
                    kept = chosen.canonical_episode,
                    "Superseded by a newer episode"
                );
            }
            selection.chosen.push(chosen);
        }
        selection.superseded.append(&mut losers);
    }
    selection
}

// ── Phase 3: emit ───────────────────────────────────────────────

/// What happened to one chosen candidate.
#[derive(Debug, Clone)]
pub struct Emitted {
    pub request: DownloadRequest,
    pub status: RecordStatus,
}

/// Title shown to the user and the download client: the entry title, the
/// zero-padded episode and the episode title if one was parsed.
pub fn display_title(candidate: &DownloadCandidate) -> String {
    let mut title = format!("{} - {:02}", candidate.entry_title, candidate.canonical_episode);
    if let Some(episode_title) = &candidate.episode_title {
        title.push_str(" - ");
        title.push_str(episode_title);
    }
    title
}

/// Hand each chosen candidate to the download client and record it.
///
/// A rejected submission is recorded as `failed`, which does not block a
/// later retry of the same episode.
pub fn emit<D, P>(chosen: Vec<DownloadCandidate>, downloader: &D, store: &P) -> Vec<Emitted>
where
    D: DownloadClient + ?Sized,
    P: ProcessedStore,
{
    chosen
        .into_iter()
        .map(|candidate| {
            let request = DownloadRequest {
                torrent_link: candidate.link.clone(),
                raw_title: candidate.raw_title.clone(),
                display_title: display_title(&candidate),
                source_ref: candidate.guid.clone(),
            };

            let status = match downloader.submit(&request) {
                Ok(()) => {
                    info!(
                        title = %request.display_title,
                        raw_title = %request.raw_title,
                        override_applied = candidate.override_applied,
                        "Queued download"
                    );
                    RecordStatus::Queued
                }
                Err(e) => {
                    warn!(title = %request.display_title, error = %e, "Download submission failed");
                    RecordStatus::Failed
                }
            };

            let record = ProcessedRecord {
                entry_id: candidate.entry_id,
                original_filename: candidate.raw_title,
                final_title: request.display_title.clone(),
                canonical_episode: candidate.canonical_episode,
                canonical_title_variation: variation_key(&candidate.canonical_title),
                variations: candidate.title_variations,
                release_group: candidate.release_group,
                resolution: candidate.resolution,
                checksum: candidate.checksum,
                link: candidate.link,
                status,
            };
            if let Err(e) = store.record_processed(&record) {
                warn!(title = %record.final_title, error = %e, "Failed to record download");
            }

            Emitted { request, status }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        records: RefCell<Vec<ProcessedRecord>>,
        broken: bool,
    }

    impl MemoryStore {
        fn with(records: Vec<ProcessedRecord>) -> Self {
            Self {
                records: RefCell::new(records),
                broken: false,
            }
        }

        fn check(&self) -> Result<(), TsuzukiError> {
            if self.broken {
                return Err(TsuzukiError::Config("database is locked".into()));
            }
            Ok(())
        }
    }

    impl ProcessedStore for MemoryStore {
        fn is_processed(&self, episode: u32, variations: &[String]) -> Result<bool, TsuzukiError> {
            self.check()?;
            Ok(self.records.borrow().iter().any(|r| {
                r.status != RecordStatus::Failed
                    && r.canonical_episode == episode
                    && r.variations.iter().any(|v| variations.contains(v))
            }))
        }

        fn episode_floor(&self, variation: &str) -> Result<Option<u32>, TsuzukiError> {
            self.check()?;
            Ok(self
                .records
                .borrow()
                .iter()
                .filter(|r| r.status != RecordStatus::Failed && r.canonical_title_variation == variation)
                .map(|r| r.canonical_episode)
                .max())
        }

        fn record_processed(&self, record: &ProcessedRecord) -> Result<(), TsuzukiError> {
            self.records.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    struct NoCatalog;

    impl TitleCatalog for NoCatalog {
        fn alternate_titles(&self, _anilist_id: u64) -> Result<Vec<String>, TsuzukiError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        fail: bool,
        requests: RefCell<Vec<DownloadRequest>>,
    }

    impl DownloadClient for Recorder {
        fn submit(&self, request: &DownloadRequest) -> Result<(), TsuzukiError> {
            if self.fail {
                return Err(TsuzukiError::Download("client offline".into()));
            }
            self.requests.borrow_mut().push(request.clone());
            Ok(())
        }
    }

    fn item(guid: &str, title: &str) -> FeedItem {
        FeedItem {
            guid: guid.into(),
            title: title.into(),
            link: format!("https://example.org/{guid}.torrent"),
            pub_date: None,
        }
    }

    fn candidate(guid: &str, title: &str, episode: u32) -> DownloadCandidate {
        DownloadCandidate {
            guid: guid.into(),
            raw_title: format!("[Group] {title} - {episode:02}"),
            link: format!("https://example.org/{guid}.torrent"),
            canonical_title: title.into(),
            canonical_episode: episode,
            parsed_title: title.into(),
            episode_title: None,
            release_group: Some("Group".into()),
            resolution: None,
            checksum: None,
            entry_id: 1,
            entry_title: title.into(),
            title_variations: vec![variation_key(title)],
            override_applied: false,
        }
    }

    fn record(title: &str, episode: u32, status: RecordStatus) -> ProcessedRecord {
        ProcessedRecord {
            entry_id: 1,
            original_filename: String::new(),
            final_title: String::new(),
            canonical_episode: episode,
            canonical_title_variation: variation_key(title),
            variations: vec![variation_key(title)],
            release_group: None,
            resolution: None,
            checksum: None,
            link: String::new(),
            status,
        }
    }

    fn collect_one(
        entries: &[WhitelistEntry],
        policy: &GroupPolicy,
        store: &MemoryStore,
        title: &str,
    ) -> Result<DownloadCandidate, Rejection> {
        let rules = RuleSet::default();
        Collector::new(&rules, entries, policy, &NoCatalog, store).collect(&item("g", title))
    }

    #[test]
    fn test_collect_tags_identity() {
        let store = MemoryStore::default();
        let mut entry = WhitelistEntry::new("Kimetsu no Yaiba");
        entry.id = 3;
        let c = collect_one(
            &[entry],
            &GroupPolicy::default(),
            &store,
            "[Erai-raws] Kimetsu no Yaiba - 05 [1080p][ABCD1234].mkv",
        )
        .unwrap();
        assert_eq!(c.canonical_title, "Kimetsu no Yaiba");
        assert_eq!(c.canonical_episode, 5);
        assert_eq!(c.release_group.as_deref(), Some("Erai-raws"));
        assert_eq!(c.resolution.as_deref(), Some("1080p"));
        assert_eq!(c.entry_id, 3);
        assert_eq!(c.title_variations, ["kimetsu no yaiba"]);
        assert!(!c.override_applied);
    }

    #[test]
    fn test_collect_rejections() {
        let store = MemoryStore::default();
        let entries = [WhitelistEntry::new("Frieren")];
        let policy = GroupPolicy::new(vec!["SubsPlease".into()], Vec::new());

        assert!(matches!(
            collect_one(&entries, &policy, &store, "[SubsPlease] Sousou no Frieren (1080p).mkv"),
            Err(Rejection::NoEpisode)
        ));
        assert!(matches!(
            collect_one(&entries, &policy, &store, "[Unknown] Sousou no Frieren - 05.mkv"),
            Err(Rejection::GroupNotAllowed(Some(g))) if g == "Unknown"
        ));
        assert!(matches!(
            collect_one(&entries, &policy, &store, "[SubsPlease] Other Show - 05.mkv"),
            Err(Rejection::NotWhitelisted)
        ));
    }

    #[test]
    fn test_blocked_group_rejected_unless_requested() {
        let store = MemoryStore::default();
        let policy = GroupPolicy::new(vec!["BadSubs".into()], vec!["BadSubs".into()]);
        let title = "[BadSubs] Sousou no Frieren - 05.mkv";

        assert!(matches!(
            collect_one(&[WhitelistEntry::new("Frieren")], &policy, &store, title),
            Err(Rejection::GroupNotAllowed(Some(g))) if g == "BadSubs"
        ));

        let mut entry = WhitelistEntry::new("Frieren");
        entry.group_overrides = vec!["badsubs".into()];
        assert!(collect_one(&[entry], &policy, &store, title).is_ok());
    }

    #[test]
    fn test_store_failures_are_transient() {
        let store = MemoryStore {
            broken: true,
            ..Default::default()
        };
        let entries = [WhitelistEntry::new("Show Title")];
        let result = collect_one(&entries, &GroupPolicy::default(), &store, "[Group] Show Title - 06.mkv");
        assert!(matches!(&result, Err(r) if r.is_transient()));
        assert!(!Rejection::NotWhitelisted.is_transient());

        let selection = select(vec![candidate("a", "Show", 5)], &store);
        assert!(selection.chosen.is_empty());
        assert_eq!(selection.deferred.len(), 1);
        assert_eq!(selection.deferred[0].guid, "a");
    }

    #[test]
    fn test_requested_group_bypasses_allow_list() {
        let store = MemoryStore::default();
        let mut entry = WhitelistEntry::new("Frieren");
        entry.group = "Unknown".into();
        let policy = GroupPolicy::new(vec!["SubsPlease".into()], Vec::new());
        assert!(collect_one(&[entry], &policy, &store, "[Unknown] Sousou no Frieren - 05.mkv").is_ok());
    }

    #[test]
    fn test_duplicate_under_equivalent_variant() {
        let store = MemoryStore::with(vec![record("show title", 6, RecordStatus::Completed)]);
        let entries = [WhitelistEntry::new("Show: Title")];
        let result = collect_one(
            &entries,
            &GroupPolicy::default(),
            &store,
            "[Group] Show: Title - 06 [1080p].mkv",
        );
        assert!(matches!(result, Err(Rejection::Duplicate { episode: 6, .. })));
    }

    #[test]
    fn test_failed_record_does_not_block() {
        let store = MemoryStore::with(vec![record("Show Title", 6, RecordStatus::Failed)]);
        let entries = [WhitelistEntry::new("Show Title")];
        assert!(collect_one(&entries, &GroupPolicy::default(), &store, "[Group] Show Title - 06.mkv").is_ok());
    }

    #[test]
    fn test_select_highest_episode() {
        let store = MemoryStore::default();
        let selection = select(
            vec![
                candidate("a", "Show", 5),
                candidate("b", "Other", 1),
                candidate("c", "Show", 6),
            ],
            &store,
        );
        let chosen: Vec<_> = selection.chosen.iter().map(|c| c.guid.as_str()).collect();
        assert_eq!(chosen, ["c", "b"]);
        assert_eq!(selection.superseded.len(), 1);
        assert_eq!(selection.superseded[0].canonical_episode, 5);
    }

    #[test]
    fn test_select_tie_goes_to_first_in_feed() {
        let store = MemoryStore::default();
        let selection = select(
            vec![candidate("first", "Show", 6), candidate("second", "show", 6)],
            &store,
        );
        assert_eq!(selection.chosen.len(), 1);
        assert_eq!(selection.chosen[0].guid, "first");
        assert_eq!(selection.superseded[0].guid, "second");
    }

    #[test]
    fn test_select_never_at_or_below_floor() {
        let store = MemoryStore::with(vec![
            record("Show", 7, RecordStatus::Queued),
            record("Show", 9, RecordStatus::Failed),
        ]);
        for episodes in [vec![3, 7], vec![7, 8, 2], vec![10, 8]] {
            let candidates = episodes
                .iter()
                .enumerate()
                .map(|(i, &ep)| candidate(&i.to_string(), "Show", ep))
                .collect();
            let selection = select(candidates, &store);
            for chosen in &selection.chosen {
                assert!(chosen.canonical_episode > 7);
            }
            assert!(selection.stale.iter().all(|c| c.canonical_episode <= 7));
        }
    }

    #[test]
    fn test_display_title() {
        let mut c = candidate("a", "Show", 5);
        c.entry_title = "My Show".into();
        assert_eq!(display_title(&c), "My Show - 05");
        c.episode_title = Some("The Start".into());
        c.canonical_episode = 112;
        assert_eq!(display_title(&c), "My Show - 112 - The Start");
    }

    #[test]
    fn test_emit_records_status() {
        let store = MemoryStore::default();
        let ok = Recorder::default();
        let emitted = emit(vec![candidate("a", "Show", 5)], &ok, &store);
        assert_eq!(emitted[0].status, RecordStatus::Queued);
        assert_eq!(ok.requests.borrow()[0].source_ref, "a");
        assert_eq!(ok.requests.borrow()[0].display_title, "Show - 05");

        let failing = Recorder {
            fail: true,
            ..Default::default()
        };
        let emitted = emit(vec![candidate("b", "Other", 2)], &failing, &store);
        assert_eq!(emitted[0].status, RecordStatus::Failed);

        let records = store.records.borrow();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].canonical_title_variation, "show");
        assert_eq!(records[1].status, RecordStatus::Failed);
    }
}
