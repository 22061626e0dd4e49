use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::utils::now_rfc3339;

use super::schema::{ensure_schema, SCHEMA_VERSION};

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub page_size: u32,
    /// Passed to `cache_size` as KiB (negative pragma form).
    pub cache_kib: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            cache_kib: 8192,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub note_count: u64,
    pub link_count: u64,
    pub file_size_bytes: u64,
    pub schema_version: i64,
    pub last_vacuum: Option<String>,
}

/// One process-wide connection in WAL mode; writes are serialized here,
/// reads ride along. The index file is derived state and may be deleted
/// and rebuilt from the vault at any time.
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path, opts: &DatabaseOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Write)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "page_size", opts.page_size)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "cache_size", -(i64::from(opts.cache_kib)))?;
        ensure_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_temp() -> (tempfile::TempDir, Self) {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Self::open(&dir.path().join("index.db"), &DatabaseOptions::default()).unwrap();
        (dir, db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        f(&conn)
    }

    /// Runs `f` inside a transaction; any error rolls the whole unit back.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut tx = conn.transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                Err(e)
            }
        }
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM index_metadata WHERE key = ? LIMIT 1",
                    [key],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            Ok(value)
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO index_metadata(key, value) VALUES(?, ?)",
                [key, value],
            )?;
            Ok(())
        })
    }

    /// VACUUM + ANALYZE, recording the vacuum time in `index_metadata`.
    pub fn optimize(&self) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
            conn.execute_batch("VACUUM; ANALYZE;")?;
        }
        self.set_meta("last_vacuum", &now_rfc3339())
    }

    pub fn check_integrity(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let verdict: String =
                conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok(verdict == "ok")
        })
    }

    pub fn stats(&self) -> Result<DbStats> {
        let (note_count, link_count) = self.with_conn(|conn| {
            let notes: i64 = conn.query_row("SELECT count(*) FROM notes", [], |r| r.get(0))?;
            let links: i64 = conn.query_row("SELECT count(*) FROM links", [], |r| r.get(0))?;
            Ok((notes as u64, links as u64))
        })?;
        let file_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(DbStats {
            note_count,
            link_count,
            file_size_bytes,
            schema_version: SCHEMA_VERSION,
            last_vacuum: self.get_meta("last_vacuum")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_rolls_back_on_error() {
        let (_dir, db) = Database::open_temp();

        let result: Result<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO notes(uid, title, category, file_path, content_hash, created_at, updated_at, indexed_at)
                 VALUES('u1', 't', 'Resources', 'p.md', 'h', 'now', 'now', 'now')",
                [],
            )?;
            Err(Error::Internal("boom".to_string()))
        });
        assert!(result.is_err());

        let count: u64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM notes", [], |r| r.get::<_, i64>(0))? as u64)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn optimize_records_last_vacuum() {
        let (_dir, db) = Database::open_temp();
        assert!(db.stats().unwrap().last_vacuum.is_none());
        db.optimize().unwrap();
        assert!(db.stats().unwrap().last_vacuum.is_some());
    }

    #[test]
    fn integrity_check_passes_on_fresh_db() {
        let (_dir, db) = Database::open_temp();
        assert!(db.check_integrity().unwrap());
    }

    #[test]
    fn meta_round_trip() {
        let (_dir, db) = Database::open_temp();
        assert_eq!(db.get_meta("k").unwrap(), None);
        db.set_meta("k", "v").unwrap();
        assert_eq!(db.get_meta("k").unwrap(), Some("v".to_string()));
    }
}
