use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::TsuzukiError;
use crate::models::{AnimeTitles, FeedItem, ProcessedRecord, RecordStatus, WhitelistEntry};
use crate::pipeline::FeedArchive;
use crate::selector::ProcessedStore;
use crate::whitelist::TitleCatalog;

const SCHEMA_V1: &str = include_str!("../../../migrations/001_initial.sql");

/// SQLite-backed storage for the whitelist, title cache and download history.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, TsuzukiError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, TsuzukiError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ── Whitelist ───────────────────────────────────────────────

    /// Insert a whitelist entry, returning its auto-generated ID.
    pub fn add_whitelist_entry(&self, entry: &WhitelistEntry) -> Result<i64, TsuzukiError> {
        self.conn.execute(
            "INSERT INTO whitelist (title, release_group, keywords, exclude_keywords, quality,
             anilist_id, title_variants, group_overrides)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.title,
                entry.group,
                entry.keywords,
                entry.exclude_keywords,
                entry.quality,
                entry.anilist_id.map(|v| v as i64),
                serde_json::to_string(&entry.title_variants)?,
                serde_json::to_string(&entry.group_overrides)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All whitelist entries, oldest first.
    pub fn whitelist_entries(&self) -> Result<Vec<WhitelistEntry>, TsuzukiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, release_group, keywords, exclude_keywords, quality,
             anilist_id, title_variants, group_overrides
             FROM whitelist ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(row_to_whitelist_entry(row)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete a whitelist entry. Returns whether it existed.
    pub fn remove_whitelist_entry(&self, id: i64) -> Result<bool, TsuzukiError> {
        let changed = self
            .conn
            .execute("DELETE FROM whitelist WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ── Anime Titles ────────────────────────────────────────────

    /// Insert or replace the cached titles for an AniList entry.
    pub fn upsert_anime_titles(&self, titles: &AnimeTitles) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "INSERT INTO anime_titles (anilist_id, romaji, romaji_cleaned, english, synonyms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(anilist_id) DO UPDATE SET
                romaji = excluded.romaji,
                romaji_cleaned = excluded.romaji_cleaned,
                english = excluded.english,
                synonyms = excluded.synonyms,
                updated_at = datetime('now')",
            params![
                titles.anilist_id as i64,
                titles.romaji,
                titles.romaji_cleaned,
                titles.english,
                serde_json::to_string(&titles.synonyms)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_anime_titles(&self, anilist_id: u64) -> Result<Option<AnimeTitles>, TsuzukiError> {
        self.conn
            .query_row(
                "SELECT anilist_id, romaji, romaji_cleaned, english, synonyms
                 FROM anime_titles WHERE anilist_id = ?1",
                params![anilist_id as i64],
                |row| Ok(row_to_anime_titles(row)),
            )
            .optional()
            .map_err(Into::into)
    }

    // ── Seen Items ──────────────────────────────────────────────

    /// Check if a feed item GUID has been looked at before.
    pub fn is_item_seen(&self, guid: &str) -> Result<bool, TsuzukiError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seen_items WHERE guid = ?1",
            params![guid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn mark_item_seen(&self, item: &FeedItem) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO seen_items (guid, title, link) VALUES (?1, ?2, ?3)",
            params![item.guid, item.title, item.link],
        )?;
        Ok(())
    }

    // ── Processed Files ─────────────────────────────────────────

    /// Persist a processed download and index it under each variation.
    pub fn insert_processed(&self, record: &ProcessedRecord) -> Result<i64, TsuzukiError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO processed_files (whitelist_id, original_filename, final_title,
             canonical_episode, canonical_title_variation, release_group, resolution,
             checksum, link, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.entry_id,
                record.original_filename,
                record.final_title,
                record.canonical_episode,
                record.canonical_title_variation,
                record.release_group,
                record.resolution,
                record.checksum,
                record.link,
                record.status.as_db_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO processed_variations (processed_id, canonical_episode, variation)
                 VALUES (?1, ?2, ?3)",
            )?;
            let primary = std::iter::once(&record.canonical_title_variation);
            for variation in primary.chain(&record.variations) {
                stmt.execute(params![id, record.canonical_episode, variation])?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    /// Move a processed download to a new status.
    pub fn update_processed_status(&self, id: i64, status: RecordStatus) -> Result<(), TsuzukiError> {
        self.conn.execute(
            "UPDATE processed_files SET status = ?1 WHERE id = ?2",
            params![status.as_db_str(), id],
        )?;
        Ok(())
    }

    /// Most recent processed downloads, newest first.
    pub fn recent_processed(&self, limit: u32) -> Result<Vec<ProcessedRecord>, TsuzukiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, whitelist_id, original_filename, final_title, canonical_episode,
             canonical_title_variation, release_group, resolution, checksum, link, status
             FROM processed_files ORDER BY id DESC LIMIT ?1",
        )?;
        let rows: Vec<(i64, ProcessedRecord)> = stmt
            .query_map(params![limit], |row| Ok((row.get(0)?, row_to_processed(row))))?
            .filter_map(|r| r.ok())
            .collect();

        let mut variations = self
            .conn
            .prepare("SELECT variation FROM processed_variations WHERE processed_id = ?1 ORDER BY rowid")?;
        let mut records = Vec::with_capacity(rows.len());
        for (id, mut record) in rows {
            record.variations = variations
                .query_map(params![id], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            records.push(record);
        }
        Ok(records)
    }
}

impl ProcessedStore for Storage {
    fn is_processed(&self, episode: u32, variations: &[String]) -> Result<bool, TsuzukiError> {
        if variations.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; variations.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM processed_variations v
             JOIN processed_files p ON p.id = v.processed_id
             WHERE v.canonical_episode = ? AND p.status != 'failed'
               AND v.variation IN ({placeholders})"
        );
        let values = std::iter::once(rusqlite::types::Value::from(episode as i64)).chain(
            variations
                .iter()
                .map(|v| rusqlite::types::Value::from(v.clone())),
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count > 0)
    }

    fn episode_floor(&self, variation: &str) -> Result<Option<u32>, TsuzukiError> {
        self.conn
            .query_row(
                "SELECT MAX(canonical_episode) FROM processed_files
                 WHERE canonical_title_variation = ?1 AND status != 'failed'",
                params![variation],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn record_processed(&self, record: &ProcessedRecord) -> Result<(), TsuzukiError> {
        self.insert_processed(record).map(|_| ())
    }
}

impl FeedArchive for Storage {
    fn is_seen(&self, guid: &str) -> Result<bool, TsuzukiError> {
        self.is_item_seen(guid)
    }

    fn mark_seen(&self, item: &FeedItem) -> Result<(), TsuzukiError> {
        self.mark_item_seen(item)
    }
}

impl TitleCatalog for Storage {
    fn alternate_titles(&self, anilist_id: u64) -> Result<Vec<String>, TsuzukiError> {
        Ok(self
            .get_anime_titles(anilist_id)?
            .map(|titles| titles.all().map(str::to_string).collect())
            .unwrap_or_default())
    }
}

// ── Migrations ──────────────────────────────────────────────────

/// Run schema migrations using `PRAGMA user_version` for version tracking.
fn run_migrations(conn: &Connection) -> Result<(), TsuzukiError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

// ── Row mapping helpers ─────────────────────────────────────────

fn json_list(row: &rusqlite::Row<'_>, idx: usize) -> Vec<String> {
    let raw: String = row.get(idx).unwrap_or_default();
    serde_json::from_str(&raw).unwrap_or_default()
}

fn row_to_whitelist_entry(row: &rusqlite::Row<'_>) -> WhitelistEntry {
    WhitelistEntry {
        id: row.get(0).unwrap_or(0),
        title: row.get(1).unwrap_or_default(),
        group: row.get(2).unwrap_or_default(),
        keywords: row.get(3).unwrap_or_default(),
        exclude_keywords: row.get(4).unwrap_or_default(),
        quality: row.get(5).unwrap_or_default(),
        anilist_id: row
            .get::<_, Option<i64>>(6)
            .unwrap_or(None)
            .map(|v| v as u64),
        title_variants: json_list(row, 7),
        group_overrides: json_list(row, 8),
    }
}

fn row_to_anime_titles(row: &rusqlite::Row<'_>) -> AnimeTitles {
    AnimeTitles {
        anilist_id: row.get::<_, i64>(0).unwrap_or(0) as u64,
        romaji: row.get(1).unwrap_or(None),
        romaji_cleaned: row.get(2).unwrap_or(None),
        english: row.get(3).unwrap_or(None),
        synonyms: json_list(row, 4),
    }
}

fn row_to_processed(row: &rusqlite::Row<'_>) -> ProcessedRecord {
    let status: String = row.get(10).unwrap_or_default();
    ProcessedRecord {
        entry_id: row.get::<_, Option<i64>>(1).unwrap_or(None).unwrap_or(0),
        original_filename: row.get(2).unwrap_or_default(),
        final_title: row.get(3).unwrap_or_default(),
        canonical_episode: row.get(4).unwrap_or(0),
        canonical_title_variation: row.get(5).unwrap_or_default(),
        variations: Vec::new(),
        release_group: row.get(6).unwrap_or(None),
        resolution: row.get(7).unwrap_or(None),
        checksum: row.get(8).unwrap_or(None),
        link: row.get(9).unwrap_or_default(),
        status: RecordStatus::from_db_str(&status),
    }
}
