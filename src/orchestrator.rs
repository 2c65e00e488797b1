// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The process-wide orchestrator: a single SQLite database mapping content
//! hash to owning topic, enforcing global uniqueness across all topics.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS asset_index (
    hash       TEXT PRIMARY KEY,
    topic      TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

/// One row of the orchestrator's `asset_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorRow {
    /// Owning topic.
    pub topic: String,
    /// Unix-seconds registration time.
    pub created_at: i64,
}

/// The cross-topic uniqueness gate.
pub struct Orchestrator {
    conn: Mutex<Connection>,
}

impl Orchestrator {
    /// Opens (creating if necessary) the orchestrator database at `path`.
    pub fn open(path: &Path) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -8000;",
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        conn.execute_batch(SCHEMA)?;

        let orchestrator = Self {
            conn: Mutex::new(conn),
        };
        orchestrator.migrate()?;
        Ok(orchestrator)
    }

    /// Applies additive schema migrations idempotently, probing column
    /// existence with `PRAGMA table_info` rather than matching driver error
    /// text (the latter is fragile across SQLite driver versions).
    fn migrate(&self) -> crate::Result<()> {
        // No additive columns yet; this is the hook future schema growth
        // hangs off of. Example of how a future column would be added:
        //
        // self.ensure_column("asset_index", "size", "INTEGER")?;
        Ok(())
    }

    #[allow(dead_code)]
    fn ensure_column(&self, table: &str, column: &str, decl: &str) -> crate::Result<()> {
        let conn = self.conn.lock().expect("orchestrator lock poisoned");
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let has_column = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .iter()
            .any(|name| name == column);

        if !has_column {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
        }
        Ok(())
    }

    /// Looks up a hash without mutating anything.
    pub fn check_hash(&self, hash: &str) -> crate::Result<Option<OrchestratorRow>> {
        let conn = self.conn.lock().expect("orchestrator lock poisoned");
        Ok(conn
            .query_row(
                "SELECT topic, created_at FROM asset_index WHERE hash = ?1",
                params![hash],
                |row| {
                    Ok(OrchestratorRow {
                        topic: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    /// Registers ownership of `hash` by `topic`. Fails with
    /// [`crate::Error::AssetDuplicate`]-shaped data if already registered.
    pub fn register_hash(&self, hash: &str, topic: &str, created_at: i64) -> crate::Result<()> {
        let conn = self.conn.lock().expect("orchestrator lock poisoned");
        let tx = conn
            .unchecked_transaction()
            .map_err(crate::Error::from)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO asset_index (hash, topic, created_at) VALUES (?1, ?2, ?3)",
            params![hash, topic, created_at],
        )?;

        if inserted == 0 {
            let existing: (String, i64) = tx.query_row(
                "SELECT topic, created_at FROM asset_index WHERE hash = ?1",
                params![hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            return Err(crate::Error::AssetDuplicate {
                topic: existing.0,
                size: 0,
                segment_id: 0,
                offset: 0,
            });
        }

        tx.commit()?;
        Ok(())
    }

    /// Used by the verifier's repair pass: inserts a row if (and only if)
    /// it's missing, without erroring on a pre-existing one.
    pub fn reinsert_if_missing(&self, hash: &str, topic: &str, created_at: i64) -> crate::Result<bool> {
        let conn = self.conn.lock().expect("orchestrator lock poisoned");
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO asset_index (hash, topic, created_at) VALUES (?1, ?2, ?3)",
            params![hash, topic, created_at],
        )?;
        Ok(inserted > 0)
    }

    /// Resolves the topic owning a hash.
    pub fn lookup_topic(&self, hash: &str) -> crate::Result<String> {
        self.check_hash(hash)?
            .map(|row| row.topic)
            .ok_or(crate::Error::AssetNotFound)
    }

    /// Total number of registered hashes.
    pub fn count_hashes(&self) -> crate::Result<u64> {
        let conn = self.conn.lock().expect("orchestrator lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM asset_index", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn register_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::open(&dir.path().join("orchestrator.db")).unwrap();

        orch.register_hash("h1", "photos", 0).unwrap();
        assert_eq!(orch.lookup_topic("h1").unwrap(), "photos");
        assert_eq!(orch.count_hashes().unwrap(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::open(&dir.path().join("orchestrator.db")).unwrap();

        orch.register_hash("h1", "a", 0).unwrap();
        let err = orch.register_hash("h1", "b", 0).unwrap_err();
        assert!(matches!(err, crate::Error::AssetDuplicate { ref topic, .. } if topic == "a"));
    }

    #[test]
    fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.db");
        {
            let orch = Orchestrator::open(&path).unwrap();
            orch.register_hash("h1", "a", 0).unwrap();
        }
        // Reopening re-runs migrate(); must not error on already-applied schema.
        let orch = Orchestrator::open(&path).unwrap();
        assert_eq!(orch.lookup_topic("h1").unwrap(), "a");
    }
}
