// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-topic SQLite index: the asset table, the segment hash chain, and the
//! metadata event log + its materialized view.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One row of `asset_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRow {
    /// Hex BLAKE3 content hash; primary key.
    pub hash: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Caller-supplied origin filename.
    pub origin_name: String,
    /// Resolved MIME type.
    pub mime: String,
    /// Segment the payload lives in.
    pub segment_id: u32,
    /// Absolute offset of the payload's first byte within that segment.
    pub offset: u64,
    /// Optional same-topic lineage parent.
    pub parent_hash: Option<String>,
    /// Unix-seconds creation time.
    pub created_at: i64,
}

/// A metadata set/delete operation as it appears in `metadata_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOp {
    /// Sets a key to a value.
    Set,
    /// Removes a key.
    Delete,
}

impl MetadataOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
        }
    }

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "set" => Ok(Self::Set),
            "delete" => Ok(Self::Delete),
            other => Err(crate::Error::Internal(format!(
                "unrecognized metadata_log op {other:?}"
            ))),
        }
    }
}

/// One row appended to `metadata_log`.
#[derive(Debug, Clone)]
pub struct MetadataLogRow {
    pub asset_id: String,
    pub op: MetadataOp,
    pub key: String,
    pub value_text: Option<String>,
    pub value_num: Option<f64>,
    pub processor: String,
    pub processor_version: String,
    pub timestamp: i64,
}

/// Owns one topic's `index.db` connection.
///
/// The write path (ingest, batch metadata) always goes through
/// [`TopicIndex::write_conn`], which is the single logical writer guarded by
/// `BEGIN IMMEDIATE` semantics (`TransactionBehavior::Immediate`). Readers
/// open their own short-lived connection via [`TopicIndex::read_conn`] and
/// see committed data through SQLite's WAL snapshot isolation.
pub struct TopicIndex {
    path: PathBuf,
    write_conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS asset_index (
    hash        TEXT PRIMARY KEY,
    size        INTEGER NOT NULL,
    origin_name TEXT NOT NULL,
    mime        TEXT NOT NULL,
    segment_id  INTEGER NOT NULL,
    offset      INTEGER NOT NULL,
    parent_hash TEXT,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dat_hashes (
    segment_id      INTEGER PRIMARY KEY,
    cumulative_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata_log (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id           TEXT NOT NULL REFERENCES asset_index(hash),
    op                 TEXT NOT NULL CHECK (op IN ('set', 'delete')),
    key                TEXT NOT NULL,
    value_text         TEXT,
    value_num          REAL,
    processor          TEXT NOT NULL,
    processor_version  TEXT NOT NULL,
    timestamp          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata_computed (
    asset_id      TEXT PRIMARY KEY,
    metadata_json TEXT NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metadata_log_asset ON metadata_log(asset_id, id);
";

fn apply_pragmas(conn: &Connection) -> crate::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -8000;",
    )?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    Ok(())
}

impl TopicIndex {
    /// Opens (creating schema if necessary) the index at `path`.
    pub fn open(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_path_buf(),
            write_conn: Mutex::new(conn),
        })
    }

    /// Opens a fresh read-only-by-convention connection for a single query.
    pub fn read_conn(&self) -> crate::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        apply_pragmas(&conn)?;
        Ok(conn)
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction on the single write
    /// connection, committing on `Ok` and rolling back (implicitly, via
    /// `Transaction::drop`) on `Err`.
    pub fn with_write_txn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> crate::Result<T>,
    ) -> crate::Result<T> {
        let mut conn = self.write_conn.lock().expect("topic write lock poisoned");
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Inserts a new asset row. Fails with [`crate::Error::AssetDuplicate`]-shaped
/// data if the hash already exists in this topic (should not happen in
/// practice, since the orchestrator gates uniqueness before this is called,
/// but a topic-local race is still reported cleanly rather than panicking).
pub fn put_asset(conn: &Connection, row: &AssetRow) -> crate::Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO asset_index
            (hash, size, origin_name, mime, segment_id, offset, parent_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.hash,
            row.size,
            row.origin_name,
            row.mime,
            row.segment_id,
            row.offset,
            row.parent_hash,
            row.created_at,
        ],
    )?;

    if inserted == 0 {
        let existing = get_asset(conn, &row.hash)?;
        return Err(crate::Error::AssetDuplicate {
            topic: String::new(),
            size: existing.size,
            segment_id: existing.segment_id,
            offset: existing.offset,
        });
    }

    Ok(())
}

/// Extends the rolling per-segment hash chain with one more record hash.
///
/// `cumulative_hash_n = BLAKE3(cumulative_hash_{n-1} || record_hash_n)`. The
/// first record of a segment folds on top of the previous segment's
/// terminal value (or the empty genesis value, for segment 1).
pub fn extend_hash_chain(conn: &Connection, segment_id: u32, record_hash: &str) -> crate::Result<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT cumulative_hash FROM dat_hashes WHERE segment_id = ?1",
            params![segment_id],
            |row| row.get(0),
        )
        .optional()?;

    let prev = match current {
        Some(cumulative) => cumulative,
        None if segment_id > 1 => conn
            .query_row(
                "SELECT cumulative_hash FROM dat_hashes WHERE segment_id = ?1",
                params![segment_id - 1],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_default(),
        None => String::new(),
    };

    let mut hasher = blake3::Hasher::new();
    hasher.update(prev.as_bytes());
    hasher.update(record_hash.as_bytes());
    let next = hasher.finalize().to_hex().to_string();

    conn.execute(
        "INSERT INTO dat_hashes (segment_id, cumulative_hash) VALUES (?1, ?2)
         ON CONFLICT(segment_id) DO UPDATE SET cumulative_hash = excluded.cumulative_hash",
        params![segment_id, next],
    )?;

    Ok(())
}

/// Fetches the stored cumulative hash for a segment, if any.
pub fn chain_value(conn: &Connection, segment_id: u32) -> crate::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT cumulative_hash FROM dat_hashes WHERE segment_id = ?1",
            params![segment_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Looks up one asset by hash.
pub fn get_asset(conn: &Connection, hash: &str) -> crate::Result<AssetRow> {
    conn.query_row(
        "SELECT hash, size, origin_name, mime, segment_id, offset, parent_hash, created_at
         FROM asset_index WHERE hash = ?1",
        params![hash],
        row_to_asset,
    )
    .optional()?
    .ok_or(crate::Error::AssetNotFound)
}

/// Lists all assets in hash order, for the verifier.
pub fn all_assets(conn: &Connection) -> crate::Result<Vec<AssetRow>> {
    let mut stmt = conn.prepare(
        "SELECT hash, size, origin_name, mime, segment_id, offset, parent_hash, created_at
         FROM asset_index ORDER BY hash",
    )?;
    let rows = stmt.query_map([], row_to_asset)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRow> {
    Ok(AssetRow {
        hash: row.get(0)?,
        size: row.get(1)?,
        origin_name: row.get(2)?,
        mime: row.get(3)?,
        segment_id: row.get(4)?,
        offset: row.get(5)?,
        parent_hash: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Appends one metadata log row, returning its assigned id.
pub fn log_metadata(conn: &Connection, row: &MetadataLogRow) -> crate::Result<i64> {
    conn.execute(
        "INSERT INTO metadata_log
            (asset_id, op, key, value_text, value_num, processor, processor_version, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.asset_id,
            row.op.as_str(),
            row.key,
            row.value_text,
            row.value_num,
            row.processor,
            row.processor_version,
            row.timestamp,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Recomputes `metadata_computed[asset_id]` by folding `metadata_log` for
/// that asset, in id order: `set` writes the value (numeric preferred over
/// text on read), `delete` removes the key.
pub fn recompute_metadata(conn: &Connection, asset_id: &str, updated_at: i64) -> crate::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT op, key, value_text, value_num FROM metadata_log
         WHERE asset_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![asset_id], |row| {
        let op: String = row.get(0)?;
        let key: String = row.get(1)?;
        let value_text: Option<String> = row.get(2)?;
        let value_num: Option<f64> = row.get(3)?;
        Ok((op, key, value_text, value_num))
    })?;

    let mut map: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();
    for row in rows {
        let (op, key, value_text, value_num) = row?;
        match MetadataOp::from_str(&op)? {
            MetadataOp::Delete => {
                map.remove(&key);
            }
            MetadataOp::Set => {
                let value = if let Some(n) = value_num {
                    serde_json::Number::from_f64(n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                } else {
                    serde_json::Value::String(value_text.unwrap_or_default())
                };
                map.insert(key, value);
            }
        }
    }

    let json = serde_json::to_string(&serde_json::Value::Object(map))
        .map_err(|e| crate::Error::Internal(format!("metadata serialization failed: {e}")))?;

    conn.execute(
        "INSERT INTO metadata_computed (asset_id, metadata_json, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(asset_id) DO UPDATE SET
            metadata_json = excluded.metadata_json,
            updated_at = excluded.updated_at",
        params![asset_id, json, updated_at],
    )?;

    Ok(())
}

/// Reads the computed metadata JSON for an asset, if it has ever been set.
pub fn computed_metadata(conn: &Connection, asset_id: &str) -> crate::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT metadata_json FROM metadata_computed WHERE asset_id = ?1",
            params![asset_id],
            |row| row.get(0),
        )
        .optional()?)
}
