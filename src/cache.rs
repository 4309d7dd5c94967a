//! Disk cache for cleaned code, keyed by conversation fingerprint.
//!
//! A small key-value table in a SQLite file at `<project>/cache/cache_db`.
//! Last write wins; one writer per process is assumed.

use crate::config::FileManager;
use crate::dataset::Dataset;
use crate::error::{AgentError, Result};
use crate::memory::Memory;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::debug;

pub struct Cache {
    conn: Option<Connection>,
    path: PathBuf,
}

impl Cache {
    pub fn open(file_manager: &FileManager) -> Result<Self> {
        file_manager.ensure_layout()?;
        let path = file_manager.cache_db_path();
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Some(conn),
            path,
        })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| AgentError::Cache("cache is closed".to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM cache WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        debug!(hit = value.is_some(), "cache lookup");
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO cache (key, value, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, created_at = ?3",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM cache WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn()?.execute("DELETE FROM cache", [])?;
        Ok(())
    }

    pub fn close(&mut self) {
        self.conn = None;
    }

    /// Close and remove the backing file.
    pub fn destroy(mut self) -> Result<()> {
        self.close();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Fingerprint of one turn: sha256 over the full memory JSON concatenated
/// with each dataset's column hash in registration order.
pub fn fingerprint(memory: &Memory, datasets: &[Dataset]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(memory.to_json().to_string().as_bytes());
    for dataset in datasets {
        hasher.update(dataset.column_hash().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn cache_in(dir: &tempfile::TempDir) -> Cache {
        Cache::open(&FileManager::new(dir.path())).unwrap()
    }

    #[test]
    fn set_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        assert_eq!(cache.get("k").unwrap(), None);
        cache.set("k", "v1").unwrap();
        assert_eq!(cache.get("k").unwrap(), Some("v1".to_string()));
        cache.set("k", "v2").unwrap();
        assert_eq!(cache.get("k").unwrap(), Some("v2".to_string()));
        cache.delete("k").unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.set("a", "1").unwrap();
        cache.set("b", "2").unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.get("a").unwrap(), None);
        assert_eq!(cache.get("b").unwrap(), None);
    }

    #[test]
    fn closed_cache_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(&dir);
        cache.close();
        assert!(matches!(cache.get("k"), Err(AgentError::Cache(_))));
    }

    #[test]
    fn destroy_removes_the_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path());
        let cache = Cache::open(&fm).unwrap();
        cache.set("k", "v").unwrap();
        cache.destroy().unwrap();
        assert!(!fm.cache_db_path().exists());
    }

    #[test]
    fn fingerprint_tracks_memory_and_columns() {
        let ds = Dataset::from_dataframe("t", df!("x" => &[1i64]).unwrap()).unwrap();
        let mut memory = Memory::new(10, None);
        let before = fingerprint(&memory, std::slice::from_ref(&ds));
        memory.add("show totals", true);
        let after = fingerprint(&memory, std::slice::from_ref(&ds));
        assert_ne!(before, after);

        let other = Dataset::from_dataframe("t", df!("y" => &[1i64]).unwrap()).unwrap();
        assert_ne!(
            fingerprint(&memory, std::slice::from_ref(&ds)),
            fingerprint(&memory, std::slice::from_ref(&other))
        );
    }
}
