// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The ingest pipeline (`Store::put`): hash, dedup-check, append, index,
//! register — in that order, under one per-topic write lock.

use crate::hash;
use crate::mime;
use crate::store::Store;
use crate::topic::{self, AssetRow};
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Result of a successful [`Store::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Hex BLAKE3 content hash.
    pub hash: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Segment the payload was written to.
    pub segment_id: u32,
    /// Absolute offset of the payload's first byte.
    pub offset: u64,
}

impl Store {
    /// Ingests `payload` into `topic`, returning its content-addressed
    /// coordinates. Returns the existing coordinates (as
    /// [`crate::Error::AssetDuplicate`]) if identical bytes were already
    /// stored anywhere in the store.
    pub fn put(
        &self,
        topic: &str,
        payload: &[u8],
        origin_name: &str,
        parent_hash: Option<&str>,
    ) -> crate::Result<PutResult> {
        self.put_with_mime(topic, payload, origin_name, parent_hash, None)
    }

    /// As [`Store::put`], but with an explicit MIME hint used when the
    /// origin filename's extension is not in the known table.
    pub fn put_with_mime(
        &self,
        topic_name: &str,
        payload: &[u8],
        origin_name: &str,
        parent_hash: Option<&str>,
        mime_hint: Option<&str>,
    ) -> crate::Result<PutResult> {
        if self.rejecting_new_work() {
            return Err(crate::Error::Internal("store is shutting down".to_string()));
        }

        if payload.is_empty() {
            return Err(crate::Error::InvalidRequest(
                "payload must not be empty".to_string(),
            ));
        }

        let limit = self.config.max_dat_size.saturating_sub(crate::record::HEADER_LEN as u64);
        if payload.len() as u64 > limit {
            return Err(crate::Error::AssetTooLarge {
                size: payload.len() as u64,
                limit,
            });
        }

        let handle = self.topic(topic_name)?;

        let content_hash = hash::hash_payload(payload);

        if let Some(existing) = self.orchestrator.check_hash(&content_hash)? {
            // Already stored somewhere; report the asset's actual coordinates.
            let owner = self.topic(&existing.topic)?;
            let conn = owner.index.read_conn()?;
            let row = topic::get_asset(&conn, &content_hash)?;
            return Err(crate::Error::AssetDuplicate {
                topic: existing.topic,
                size: row.size,
                segment_id: row.segment_id,
                offset: row.offset,
            });
        }

        let _ingest_guard = handle.ingest_lock.lock().expect("ingest lock poisoned");

        // Re-check under the lock: another thread may have raced us between
        // the lock-free check above and acquiring the per-topic mutex.
        if let Some(existing) = self.orchestrator.check_hash(&content_hash)? {
            let conn = handle.index.read_conn()?;
            let row = topic::get_asset(&conn, &content_hash)?;
            return Err(crate::Error::AssetDuplicate {
                topic: existing.topic,
                size: row.size,
                segment_id: row.segment_id,
                offset: row.offset,
            });
        }

        if let Some(parent) = parent_hash {
            let conn = handle.index.read_conn()?;
            topic::get_asset(&conn, parent).map_err(|e| match e {
                crate::Error::AssetNotFound => crate::Error::ParentNotFound,
                other => other,
            })?;
        }

        let (segment_id, offset) = handle.segments.append(payload)?;

        let mime = mime::resolve(origin_name, mime_hint);
        let created_at = unix_now();
        let row = AssetRow {
            hash: content_hash.clone(),
            size: payload.len() as u64,
            origin_name: origin_name.to_string(),
            mime,
            segment_id,
            offset,
            parent_hash: parent_hash.map(str::to_string),
            created_at,
        };

        handle.index.with_write_txn(|tx| {
            topic::put_asset(tx, &row).map_err(|e| fill_duplicate_topic(e, topic_name))?;
            topic::extend_hash_chain(tx, segment_id, &content_hash)
        })?;

        // The topic transaction is durable; register globally. If this
        // fails (process crash, I/O), the asset remains discoverable via its
        // topic and the verifier's repair pass restores this row later.
        if let Err(e) = self.orchestrator.register_hash(&content_hash, topic_name, created_at) {
            log::error!(
                "orchestrator registration failed for {content_hash} in topic {topic_name:?}: {e}; \
                 asset is durable in its topic and will be repaired by the verifier"
            );
        }

        Ok(PutResult {
            hash: content_hash,
            size: payload.len() as u64,
            segment_id,
            offset,
        })
    }
}

fn fill_duplicate_topic(err: crate::Error, topic_name: &str) -> crate::Error {
    match err {
        crate::Error::AssetDuplicate {
            size,
            segment_id,
            offset,
            ..
        } => crate::Error::AssetDuplicate {
            topic: topic_name.to_string(),
            size,
            segment_id,
            offset,
        },
        other => other,
    }
}
