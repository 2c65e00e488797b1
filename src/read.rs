// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Read path (`Store::get`/`Store::stat`): hash to topic to asset row to
//! segment bytes, with optional end-to-end re-verification.

use crate::hash;
use crate::store::Store;
use crate::topic::{self, AssetRow};

/// A byte range requested of [`Store::get`], half-open on the stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    fn len(self) -> crate::Result<usize> {
        if self.end < self.start {
            return Err(crate::Error::InvalidRequest(
                "range end precedes range start".to_string(),
            ));
        }
        Ok((self.end - self.start) as usize)
    }
}

/// Stat metadata for an asset, without reading its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStat {
    pub hash: String,
    pub topic: String,
    pub size: u64,
    pub origin_name: String,
    pub mime: String,
    pub parent_hash: Option<String>,
    pub created_at: i64,
}

impl Store {
    /// Fetches an asset's full payload (or a byte range of it, if `range` is
    /// supplied). When `verify` is `true`, recomputes BLAKE3 over the bytes
    /// read and compares against the stored hash, failing with
    /// [`crate::Error::VerificationFailed`] on mismatch — only meaningful
    /// over the full payload, since a partial range cannot be independently
    /// re-hashed against the whole-payload digest.
    pub fn get(&self, asset_hash: &str, range: Option<ByteRange>, verify: bool) -> crate::Result<Vec<u8>> {
        if !hash::is_valid_hash(asset_hash) {
            return Err(crate::Error::InvalidHash(asset_hash.to_string()));
        }

        let topic_name = self.orchestrator.lookup_topic(asset_hash)?;
        let handle = self.topic(&topic_name)?;

        let conn = handle.index.read_conn()?;
        let row = topic::get_asset(&conn, asset_hash)?;
        drop(conn);

        let (read_offset, read_len) = match range {
            Some(r) => {
                let len = r.len()?;
                if r.end > row.size {
                    return Err(crate::Error::InvalidRequest(format!(
                        "range end {} exceeds asset size {}",
                        r.end, row.size
                    )));
                }
                (row.offset + r.start, len)
            }
            None => (row.offset, row.size as usize),
        };

        let bytes = handle.segments.read_at(row.segment_id, read_offset, read_len)?;

        if verify {
            if range.is_some() {
                return Err(crate::Error::InvalidRequest(
                    "end-to-end verification requires reading the full payload".to_string(),
                ));
            }
            let actual = hash::hash_payload(&bytes);
            if actual != row.hash {
                return Err(crate::Error::VerificationFailed(format!(
                    "stored hash {} does not match recomputed hash {actual}",
                    row.hash
                )));
            }
        }

        Ok(bytes)
    }

    /// Fetches an asset's metadata without touching its segment bytes.
    pub fn stat(&self, asset_hash: &str) -> crate::Result<AssetStat> {
        if !hash::is_valid_hash(asset_hash) {
            return Err(crate::Error::InvalidHash(asset_hash.to_string()));
        }

        let topic_name = self.orchestrator.lookup_topic(asset_hash)?;
        let handle = self.topic(&topic_name)?;
        let conn = handle.index.read_conn()?;
        let row: AssetRow = topic::get_asset(&conn, asset_hash)?;

        Ok(AssetStat {
            hash: row.hash,
            topic: topic_name,
            size: row.size,
            origin_name: row.origin_name,
            mime: row.mime,
            parent_hash: row.parent_hash,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use test_log::test;

    #[test]
    fn get_returns_full_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello world", "hi.txt", None).unwrap();

        let bytes = store.get(&put.hash, None, false).unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn get_with_verify_succeeds_on_intact_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello world", "hi.txt", None).unwrap();

        let bytes = store.get(&put.hash, None, true).unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn get_with_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello world", "hi.txt", None).unwrap();

        let bytes = store.get(&put.hash, Some(ByteRange::new(6, 11)), false).unwrap();
        assert_eq!(bytes, b"world");
    }

    #[test]
    fn get_range_beyond_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        assert!(matches!(
            store.get(&put.hash, Some(ByteRange::new(0, 100)), false),
            Err(crate::Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn get_unknown_hash_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        let unknown = "a".repeat(64);
        assert!(matches!(
            store.get(&unknown, None, false),
            Err(crate::Error::AssetNotFound)
        ));
    }

    #[test]
    fn stat_reports_metadata_without_reading_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.png", None).unwrap();

        let stat = store.stat(&put.hash).unwrap();
        assert_eq!(stat.topic, "photos");
        assert_eq!(stat.size, 5);
        assert_eq!(stat.mime, "image/png");
    }

    #[test]
    fn malformed_hash_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        assert!(matches!(
            store.get("not-a-hash", None, false),
            Err(crate::Error::InvalidHash(_))
        ));
    }
}
