//! L1 execution record store: SQLite-backed "already done" ledger.
//!
//! One record per identity (path), `INSERT OR REPLACE` upsert, hit only when
//! the stored fingerprint still matches the current one. The connection lives
//! behind a mutex so concurrent upserts for the same identity serialize.

use crate::errors::StoreError;
use crate::model::{Fingerprint, MTIME_TOLERANCE_SECS};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS completed_items (
    path         TEXT PRIMARY KEY,
    size         INTEGER NOT NULL,
    mtime        REAL NOT NULL,
    completed_at REAL NOT NULL,
    success      INTEGER NOT NULL,
    result_json  TEXT
);
CREATE INDEX IF NOT EXISTS idx_completed_at ON completed_items(completed_at);
"#;

#[derive(Clone)]
pub struct ExecutionRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl ExecutionRecordStore {
    /// Open a file-backed store, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<(), StoreError> {
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// True when a successful record exists for `path` and its stored
    /// fingerprint still matches `current`. A replaced file with the same name
    /// fails the match and is reprocessed.
    pub fn is_completed(&self, path: &Path, current: &Fingerprint) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, f64)> = conn
            .query_row(
                "SELECT size, mtime FROM completed_items WHERE path = ?1 AND success = 1",
                params![path.to_string_lossy()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((size, mtime)) => {
                size as u64 == current.size
                    && (mtime - current.mtime_secs).abs() < MTIME_TOLERANCE_SECS
            }
            None => false,
        })
    }

    /// Stored result payload for a current, successful record.
    pub fn completed_result(
        &self,
        path: &Path,
        current: &Fingerprint,
    ) -> Result<Option<Value>, StoreError> {
        if !self.is_completed(path, current)? {
            return Ok(None);
        }
        let conn = self.conn.lock().unwrap();
        let text: Option<String> = conn
            .query_row(
                "SELECT result_json FROM completed_items WHERE path = ?1 AND success = 1",
                params![path.to_string_lossy()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(match text {
            Some(t) => Some(serde_json::from_str(&t)?),
            None => None,
        })
    }

    /// Atomic upsert: at most one record per identity, last write wins.
    pub fn record(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
        success: bool,
        result: Option<&Value>,
    ) -> Result<(), StoreError> {
        let result_json = result.map(|v| v.to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO completed_items \
             (path, size, mtime, completed_at, success, result_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                path.to_string_lossy(),
                fingerprint.size as i64,
                fingerprint.mtime_secs,
                crate::model::unix_now_secs(),
                success as i32,
                result_json,
            ],
        )?;
        Ok(())
    }

    /// Delete records older than `max_age_days`. Returns how many were removed.
    pub fn retention_sweep(&self, max_age_days: u32) -> Result<usize, StoreError> {
        let cutoff = crate::model::unix_now_secs() - f64::from(max_age_days) * 24.0 * 3600.0;
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM completed_items WHERE completed_at < ?1",
            params![cutoff],
        )?;
        if deleted > 0 {
            tracing::info!(deleted, "removed old execution records");
        }
        Ok(deleted)
    }

    #[cfg(test)]
    fn backdate(&self, path: &Path, completed_at: f64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE completed_items SET completed_at = ?1 WHERE path = ?2",
            params![completed_at, path.to_string_lossy()],
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn fp(size: u64, mtime_secs: f64) -> Fingerprint {
        Fingerprint { size, mtime_secs }
    }

    #[test]
    fn record_then_is_completed_with_matching_fingerprint() {
        let store = ExecutionRecordStore::memory().unwrap();
        let path = PathBuf::from("/music/Eno - Another Green World");
        let f = fp(4096, 1_700_000_000.0);
        store.record(&path, &f, true, Some(&json!({"artist": "Eno"}))).unwrap();

        assert!(store.is_completed(&path, &f).unwrap());
        assert_eq!(
            store.completed_result(&path, &f).unwrap(),
            Some(json!({"artist": "Eno"}))
        );
    }

    #[test]
    fn changed_fingerprint_is_not_a_hit() {
        let store = ExecutionRecordStore::memory().unwrap();
        let path = PathBuf::from("/music/album");
        store.record(&path, &fp(4096, 1_700_000_000.0), true, None).unwrap();

        assert!(!store.is_completed(&path, &fp(8192, 1_700_000_000.0)).unwrap());
        assert!(!store.is_completed(&path, &fp(4096, 1_700_000_010.0)).unwrap());
        // sub-second drift is within tolerance
        assert!(store.is_completed(&path, &fp(4096, 1_700_000_000.4)).unwrap());
    }

    #[test]
    fn failed_record_is_never_a_hit() {
        let store = ExecutionRecordStore::memory().unwrap();
        let path = PathBuf::from("/music/album");
        let f = fp(1, 1.0);
        store.record(&path, &f, false, None).unwrap();
        assert!(!store.is_completed(&path, &f).unwrap());
    }

    #[test]
    fn upsert_keeps_a_single_record_and_last_write_wins() {
        let store = ExecutionRecordStore::memory().unwrap();
        let path = PathBuf::from("/music/album");
        let f1 = fp(1, 1.0);
        let f2 = fp(2, 2.0);
        store.record(&path, &f1, true, None).unwrap();
        store.record(&path, &f2, true, None).unwrap();

        assert!(!store.is_completed(&path, &f1).unwrap());
        assert!(store.is_completed(&path, &f2).unwrap());
    }

    #[test]
    fn failure_overwrites_previous_success() {
        let store = ExecutionRecordStore::memory().unwrap();
        let path = PathBuf::from("/music/album");
        let f = fp(1, 1.0);
        store.record(&path, &f, true, None).unwrap();
        store.record(&path, &f, false, None).unwrap();
        assert!(!store.is_completed(&path, &f).unwrap());
    }

    #[test]
    fn retention_sweep_deletes_only_old_records() {
        let store = ExecutionRecordStore::memory().unwrap();
        let old = PathBuf::from("/music/old");
        let new = PathBuf::from("/music/new");
        let f = fp(1, 1.0);
        store.record(&old, &f, true, None).unwrap();
        store.record(&new, &f, true, None).unwrap();
        store.backdate(&old, crate::model::unix_now_secs() - 40.0 * 24.0 * 3600.0);

        assert_eq!(store.retention_sweep(30).unwrap(), 1);
        assert!(!store.is_completed(&old, &f).unwrap());
        assert!(store.is_completed(&new, &f).unwrap());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("execution.db");
        let path = PathBuf::from("/music/album");
        let f = fp(1, 1.0);
        {
            let store = ExecutionRecordStore::open(&db).unwrap();
            store.record(&path, &f, true, Some(&json!({"ok": true}))).unwrap();
        }
        let store = ExecutionRecordStore::open(&db).unwrap();
        assert!(store.is_completed(&path, &f).unwrap());
        assert_eq!(store.completed_result(&path, &f).unwrap(), Some(json!({"ok": true})));
    }
}
