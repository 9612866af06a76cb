use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RdlinkError;
use crate::models::{Job, NotificationDedup, Preferences};

const SCHEMA_V1: &str = include_str!("../../../migrations/001_kv_store.sql");

/// Keys of the whole-record key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Jobs,
    Preferences,
    NotificationDedup,
}

impl StoreKey {
    pub const ALL: &[StoreKey] = &[Self::Jobs, Self::Preferences, Self::NotificationDedup];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jobs => "jobs",
            Self::Preferences => "preferences",
            Self::NotificationDedup => "notification_dedup",
        }
    }
}

/// SQLite-backed record storage.
///
/// Every value is a JSON document that is read and replaced as a whole.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, RdlinkError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, RdlinkError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ── Raw records ─────────────────────────────────────────────

    fn read_record<T: DeserializeOwned + Default>(
        conn: &Connection,
        key: StoreKey,
    ) -> Result<T, RdlinkError> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(T::default()),
        }
    }

    fn write_record<T: Serialize>(
        conn: &Connection,
        key: StoreKey,
        value: &T,
    ) -> Result<(), RdlinkError> {
        let json = serde_json::to_string(value)?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key.as_str(), json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Whether a record has ever been written under `key`.
    pub fn has_record(&self, key: StoreKey) -> Result<bool, RdlinkError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM kv_store WHERE key = ?1",
            params![key.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ── Jobs ────────────────────────────────────────────────────

    /// The full job list, most recent first. Empty if never written.
    pub fn load_jobs(&self) -> Result<Vec<Job>, RdlinkError> {
        Self::read_record(&self.conn, StoreKey::Jobs)
    }

    /// Replace the full job list.
    pub fn save_jobs(&self, jobs: &[Job]) -> Result<(), RdlinkError> {
        Self::write_record(&self.conn, StoreKey::Jobs, &jobs)
    }

    /// Read-modify-write the job list inside one transaction.
    ///
    /// `apply` returns whether it changed the list; the list is written only
    /// then. Returns the resulting list and the change flag.
    pub fn update_jobs<F>(&self, apply: F) -> Result<(Vec<Job>, bool), RdlinkError>
    where
        F: FnOnce(&mut Vec<Job>) -> bool,
    {
        let tx = self.conn.unchecked_transaction()?;
        let mut jobs: Vec<Job> = Self::read_record(&tx, StoreKey::Jobs)?;
        let changed = apply(&mut jobs);
        if changed {
            Self::write_record(&tx, StoreKey::Jobs, &jobs)?;
        }
        tx.commit()?;
        Ok((jobs, changed))
    }

    // ── Preferences ─────────────────────────────────────────────

    pub fn load_preferences(&self) -> Result<Preferences, RdlinkError> {
        Self::read_record(&self.conn, StoreKey::Preferences)
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<(), RdlinkError> {
        Self::write_record(&self.conn, StoreKey::Preferences, prefs)
    }

    // ── Notification dedup ──────────────────────────────────────

    pub fn load_dedup(&self) -> Result<NotificationDedup, RdlinkError> {
        Self::read_record(&self.conn, StoreKey::NotificationDedup)
    }

    pub fn save_dedup(&self, dedup: &NotificationDedup) -> Result<(), RdlinkError> {
        Self::write_record(&self.conn, StoreKey::NotificationDedup, dedup)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), RdlinkError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
        tracing::info!(from = version, to = 1, "Migrated database schema");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use chrono::TimeZone;

    fn test_job(id: &str, hash_char: char) -> Job {
        let hash: String = std::iter::repeat(hash_char).take(40).collect();
        Job::new(
            id,
            format!("magnet:?xt=urn:btih:{hash}"),
            Some(hash),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        )
    }

    #[test]
    fn test_missing_records_read_as_defaults() {
        let db = Storage::open_memory().unwrap();
        assert!(db.load_jobs().unwrap().is_empty());
        assert_eq!(db.load_preferences().unwrap(), Preferences::default());
        assert!(db.load_dedup().unwrap().notified.is_empty());
        assert!(!db.has_record(StoreKey::Jobs).unwrap());
    }

    #[test]
    fn test_jobs_roundtrip_preserves_order() {
        let db = Storage::open_memory().unwrap();
        let jobs = vec![test_job("B", 'b'), test_job("A", 'a')];
        db.save_jobs(&jobs).unwrap();

        let loaded = db.load_jobs().unwrap();
        assert_eq!(loaded, jobs);
        assert!(db.has_record(StoreKey::Jobs).unwrap());
    }

    #[test]
    fn test_save_replaces_whole_list() {
        let db = Storage::open_memory().unwrap();
        db.save_jobs(&[test_job("A", 'a'), test_job("B", 'b')]).unwrap();
        db.save_jobs(&[test_job("C", 'c')]).unwrap();

        let loaded = db.load_jobs().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "C");
    }

    #[test]
    fn test_update_jobs_writes_only_on_change() {
        let db = Storage::open_memory().unwrap();

        let (jobs, changed) = db.update_jobs(|_| false).unwrap();
        assert!(jobs.is_empty());
        assert!(!changed);
        assert!(!db.has_record(StoreKey::Jobs).unwrap());

        let (jobs, changed) = db
            .update_jobs(|jobs| {
                jobs.push(test_job("A", 'a'));
                true
            })
            .unwrap();
        assert!(changed);
        assert_eq!(jobs.len(), 1);

        db.update_jobs(|jobs| {
            jobs[0].status = JobStatus::Ready;
            true
        })
        .unwrap();
        assert_eq!(db.load_jobs().unwrap()[0].status, JobStatus::Ready);
    }

    #[test]
    fn test_preferences_and_dedup_roundtrip() {
        let db = Storage::open_memory().unwrap();
        let prefs = Preferences {
            api_token: Some("tok".into()),
            always_save_all_files: true,
            ..Default::default()
        };
        db.save_preferences(&prefs).unwrap();
        assert_eq!(db.load_preferences().unwrap(), prefs);

        let mut dedup = NotificationDedup::default();
        dedup.record("A", Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        db.save_dedup(&dedup).unwrap();
        assert_eq!(db.load_dedup().unwrap(), dedup);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdlink.db");
        {
            let db = Storage::open(&path).unwrap();
            db.save_jobs(&[test_job("A", 'a')]).unwrap();
        }
        let db = Storage::open(&path).unwrap();
        assert_eq!(db.load_jobs().unwrap()[0].id, "A");
    }
}
