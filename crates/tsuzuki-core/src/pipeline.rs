use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::TsuzukiError;
use crate::models::{FeedItem, RecordStatus, WhitelistEntry};
use crate::selector::{self, Collector, DownloadClient, Emitted, ProcessedStore, Rejection};
use crate::sources::RuleSet;
use crate::whitelist::{GroupPolicy, TitleCatalog};

/// Archive of feed items already processed by an earlier cycle.
pub trait FeedArchive {
    fn is_seen(&self, guid: &str) -> Result<bool, TsuzukiError>;
    fn mark_seen(&self, item: &FeedItem) -> Result<(), TsuzukiError>;
}

/// Outcome counts and emitted downloads of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub seen: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub superseded: usize,
    pub stale: usize,
    /// Items left unarchived so the next cycle retries them.
    pub retry: usize,
    pub emitted: Vec<Emitted>,
}

/// One polling cycle over a batch of feed items: collect, select, emit.
pub struct Pipeline<'a, S, D: ?Sized> {
    store: &'a S,
    downloader: &'a D,
    policy: &'a GroupPolicy,
}

impl<'a, S, D> Pipeline<'a, S, D>
where
    S: ProcessedStore + FeedArchive + TitleCatalog,
    D: DownloadClient + ?Sized,
{
    pub fn new(store: &'a S, downloader: &'a D, policy: &'a GroupPolicy) -> Self {
        Self {
            store,
            downloader,
            policy,
        }
    }

    /// Run a cycle against one rule snapshot. Per-item failures are logged
    /// and never abort the batch. Unseen items are archived afterwards,
    /// except those that failed for a reason a later cycle may not hit.
    pub fn run_cycle(
        &self,
        rules: &RuleSet,
        entries: &[WhitelistEntry],
        items: &[FeedItem],
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let collector = Collector::new(rules, entries, self.policy, self.store, self.store);

        let mut unseen = Vec::new();
        let mut retry: Vec<String> = Vec::new();
        let mut candidates = Vec::new();
        for item in items {
            match self.store.is_seen(&item.guid) {
                Ok(true) => {
                    report.seen += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(guid = %item.guid, error = %e, "Seen lookup failed, treating as new"),
            }
            // Feeds repeat items across pages and mirrors.
            if unseen.iter().any(|i: &&FeedItem| i.guid == item.guid) {
                continue;
            }
            unseen.push(item);

            match collector.collect(item) {
                Ok(candidate) => candidates.push(candidate),
                Err(rejection) => {
                    if matches!(rejection, Rejection::Duplicate { .. }) {
                        report.duplicates += 1;
                    } else {
                        report.rejected += 1;
                    }
                    if rejection.is_transient() {
                        warn!(raw_title = %item.title, reason = %rejection, "Item skipped, retrying next cycle");
                        retry.push(item.guid.clone());
                    } else {
                        debug!(raw_title = %item.title, reason = %rejection, "Item rejected");
                    }
                }
            }
        }

        let selection = selector::select(candidates, self.store);
        report.superseded = selection.superseded.len();
        report.stale = selection.stale.len();
        retry.extend(selection.deferred.into_iter().map(|c| c.guid));
        report.emitted = selector::emit(selection.chosen, self.downloader, self.store);
        retry.extend(
            report
                .emitted
                .iter()
                .filter(|e| e.status == RecordStatus::Failed)
                .map(|e| e.request.source_ref.clone()),
        );

        for item in unseen {
            if retry.contains(&item.guid) {
                report.retry += 1;
                continue;
            }
            if let Err(e) = self.store.mark_seen(item) {
                warn!(guid = %item.guid, error = %e, "Failed to archive feed item");
            }
        }

        info!(
            items = items.len(),
            seen = report.seen,
            rejected = report.rejected,
            duplicates = report.duplicates,
            superseded = report.superseded,
            stale = report.stale,
            retry = report.retry,
            emitted = report.emitted.len(),
            "Cycle finished"
        );
        report
    }
}

/// Ensures cycles never overlap. A trigger that arrives while a cycle is
/// running is dropped rather than queued.
#[derive(Debug, Default)]
pub struct CycleGate {
    running: Mutex<()>,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for one cycle, or `None` if a cycle is in progress.
    pub fn try_enter(&self) -> Option<MutexGuard<'_, ()>> {
        self.running.try_lock().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::models::DownloadRequest;
    use crate::overrides::OverrideRules;
    use crate::relations::RelationDatabase;
    use crate::storage::Storage;

    #[derive(Default)]
    struct Recorder {
        requests: RefCell<Vec<DownloadRequest>>,
    }

    impl DownloadClient for Recorder {
        fn submit(&self, request: &DownloadRequest) -> Result<(), TsuzukiError> {
            self.requests.borrow_mut().push(request.clone());
            Ok(())
        }
    }

    impl Recorder {
        fn titles(&self) -> Vec<String> {
            self.requests
                .borrow()
                .iter()
                .map(|r| r.display_title.clone())
                .collect()
        }
    }

    fn item(guid: &str, title: &str) -> FeedItem {
        FeedItem {
            guid: guid.into(),
            title: title.into(),
            link: format!("magnet:?xt=urn:btih:{guid}"),
            pub_date: Some(Utc::now()),
        }
    }

    fn storage_with(titles: &[&str]) -> (Storage, Vec<WhitelistEntry>) {
        let db = Storage::open_memory().unwrap();
        for title in titles {
            db.add_whitelist_entry(&WhitelistEntry::new(*title)).unwrap();
        }
        let entries = db.whitelist_entries().unwrap();
        (db, entries)
    }

    fn run(db: &Storage, rules: &RuleSet, entries: &[WhitelistEntry], items: &[FeedItem]) -> (CycleReport, Recorder) {
        let recorder = Recorder::default();
        let policy = GroupPolicy::default();
        let report = Pipeline::new(db, &recorder, &policy).run_cycle(rules, entries, items);
        (report, recorder)
    }

    #[test]
    fn test_newest_episode_supersedes_older() {
        let (db, entries) = storage_with(&["Kimetsu no Yaiba"]);
        let items = [
            item("a", "[Erai-raws] Kimetsu no Yaiba - 05 [1080p].mkv"),
            item("b", "[Erai-raws] Kimetsu no Yaiba - 06 [1080p].mkv"),
        ];
        let (report, recorder) = run(&db, &RuleSet::default(), &entries, &items);

        assert_eq!(recorder.titles(), ["Kimetsu no Yaiba - 06"]);
        assert_eq!(report.superseded, 1);
        assert_eq!(report.emitted[0].status, RecordStatus::Queued);
        assert!(db.is_seen("a").unwrap());
        assert!(db.is_seen("b").unwrap());
    }

    #[test]
    fn test_seen_items_skipped_next_cycle() {
        let (db, entries) = storage_with(&["Kimetsu no Yaiba"]);
        let items = [item("a", "[Erai-raws] Kimetsu no Yaiba - 05 [1080p].mkv")];
        run(&db, &RuleSet::default(), &entries, &items);

        let (report, recorder) = run(&db, &RuleSet::default(), &entries, &items);
        assert_eq!(report.seen, 1);
        assert!(recorder.titles().is_empty());
    }

    #[test]
    fn test_equivalent_variant_is_duplicate() {
        // Matches both spellings by substring.
        let (db, entries) = storage_with(&["Title"]);
        let (_, first) = run(&db, &RuleSet::default(), &entries, &[item("a", "[Group] show title - 06.mkv")]);
        assert_eq!(first.titles(), ["Title - 06"]);

        let (report, recorder) = run(
            &db,
            &RuleSet::default(),
            &entries,
            &[item("b", "[Other] Show: Title - 06 [720p].mkv")],
        );
        assert_eq!(report.duplicates, 1);
        assert!(recorder.titles().is_empty());
    }

    #[test]
    fn test_floor_is_monotonic_across_cycles() {
        let (db, entries) = storage_with(&["Kimetsu no Yaiba"]);
        run(&db, &RuleSet::default(), &entries, &[item("a", "[Erai-raws] Kimetsu no Yaiba - 07.mkv")]);

        let (report, recorder) = run(
            &db,
            &RuleSet::default(),
            &entries,
            &[
                item("b", "[Erai-raws] Kimetsu no Yaiba - 03.mkv"),
                item("c", "[SubsPlease] Kimetsu no Yaiba - 08 (1080p).mkv"),
            ],
        );
        assert_eq!(report.stale, 1);
        assert_eq!(recorder.titles(), ["Kimetsu no Yaiba - 08"]);
    }

    #[test]
    fn test_override_renames_before_matching() {
        let (db, entries) = storage_with(&["Bar"]);
        let rules = RuleSet {
            global: Arc::new(
                OverrideRules::parse(
                    r#"{"overrides": {"pattern_match": [{"pattern": "^Foo$", "replacement": "Bar"}]}}"#,
                )
                .unwrap(),
            ),
            ..RuleSet::default()
        };
        let (_, recorder) = run(&db, &rules, &entries, &[item("a", "[Group] Foo - 02.mkv")]);
        assert_eq!(recorder.titles(), ["Bar - 02"]);
    }

    #[test]
    fn test_continuous_numbering_redirected() {
        let (db, entries) = storage_with(&["Kimetsu no Yaiba S2"]);
        let rules = RuleSet {
            relations: Arc::new(
                RelationDatabase::parse(
                    "::rules\n\
                     # Kimetsu no Yaiba -> Kimetsu no Yaiba S1\n- 1|1|1:1-26 -> 1|1|1:1-26\n\n\
                     # Kimetsu no Yaiba -> Kimetsu no Yaiba S2\n- 1|1|1:27-44 -> 2|2|2:1-18\n",
                )
                .unwrap(),
            ),
            ..RuleSet::default()
        };
        let (_, recorder) = run(
            &db,
            &rules,
            &entries,
            &[item("a", "[Erai-raws] Kimetsu no Yaiba - 28 [1080p].mkv")],
        );
        assert_eq!(recorder.titles(), ["Kimetsu no Yaiba S2 - 02"]);

        let recent = db.recent_processed(1).unwrap();
        assert_eq!(recent[0].canonical_episode, 2);
        assert_eq!(recent[0].canonical_title_variation, "kimetsu no yaiba s2");
    }

    struct Offline;

    impl DownloadClient for Offline {
        fn submit(&self, _request: &DownloadRequest) -> Result<(), TsuzukiError> {
            Err(TsuzukiError::Download("client offline".into()))
        }
    }

    #[test]
    fn test_failed_download_retried_next_cycle() {
        let (db, entries) = storage_with(&["Kimetsu no Yaiba"]);
        let items = [item("a", "[Erai-raws] Kimetsu no Yaiba - 05 [1080p].mkv")];
        let policy = GroupPolicy::default();

        let report = Pipeline::new(&db, &Offline, &policy).run_cycle(&RuleSet::default(), &entries, &items);
        assert_eq!(report.emitted[0].status, RecordStatus::Failed);
        assert_eq!(report.retry, 1);
        assert!(!db.is_seen("a").unwrap());

        let (report, recorder) = run(&db, &RuleSet::default(), &entries, &items);
        assert_eq!(report.seen, 0);
        assert_eq!(recorder.titles(), ["Kimetsu no Yaiba - 05"]);
        assert!(db.is_seen("a").unwrap());
    }

    #[tokio::test]
    async fn test_gate_coalesces_overlapping_cycles() {
        let gate = CycleGate::new();
        let first = gate.try_enter();
        assert!(first.is_some());
        assert!(gate.try_enter().is_none());
        drop(first);
        assert!(gate.try_enter().is_some());
    }
}
