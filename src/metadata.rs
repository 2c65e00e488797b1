// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Batch metadata mutation (`Store::batch_metadata`): group by topic, cap
//! the batch size, validate each operation, fold into the materialized view.

use crate::store::Store;
use crate::topic::{self, MetadataLogRow, MetadataOp};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One requested metadata mutation.
#[derive(Debug, Clone)]
pub struct MetadataOperation {
    pub asset_hash: String,
    pub op: MetadataOp,
    pub key: String,
    /// Present for `Set`; ignored for `Delete`.
    pub value: Option<MetadataValue>,
    pub processor: String,
    pub processor_version: String,
}

/// A metadata value, numeric-preferred per the store's canonical JSON
/// representation: a caller-supplied number is stored numeric, anything else
/// as text.
#[derive(Debug, Clone)]
pub enum MetadataValue {
    Number(f64),
    Text(String),
}

impl MetadataValue {
    fn byte_len(&self) -> usize {
        match self {
            Self::Number(_) => 8,
            Self::Text(s) => s.len(),
        }
    }
}

/// Outcome of one operation within a batch.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub index: usize,
    pub result: Result<(), String>,
}

/// Result of a [`Store::batch_metadata`] call.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<OperationOutcome>,
}

impl BatchResult {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

impl Store {
    /// Applies a batch of metadata operations, grouped and transacted
    /// per-topic. A failure in one topic's transaction does not affect
    /// operations against other topics; within a topic's transaction, a
    /// single operation failing (bad key/value, unknown asset) fails only
    /// that operation unless [`crate::Config::strict_metadata_recompute`] is
    /// set, in which case a recompute failure aborts the whole topic batch.
    pub fn batch_metadata(&self, ops: Vec<MetadataOperation>) -> crate::Result<BatchResult> {
        if ops.len() > self.config.batch_max_operations {
            return Err(crate::Error::BatchTooManyOperations {
                count: ops.len(),
                limit: self.config.batch_max_operations,
            });
        }

        // Resolve each op's owning topic up front, preserving original
        // indices so outcomes can be reassembled in request order.
        let mut by_topic: HashMap<String, Vec<(usize, MetadataOperation)>> = HashMap::new();
        let mut outcomes: Vec<Option<OperationOutcome>> = (0..ops.len()).map(|_| None).collect();

        for (index, op) in ops.into_iter().enumerate() {
            match self.orchestrator.lookup_topic(&op.asset_hash) {
                Ok(topic_name) => {
                    by_topic.entry(topic_name).or_default().push((index, op));
                }
                Err(e) => {
                    outcomes[index] = Some(OperationOutcome {
                        index,
                        result: Err(e.to_string()),
                    });
                }
            }
        }

        for (topic_name, topic_ops) in by_topic {
            let handle = self.topic(&topic_name)?;
            let _guard = handle.ingest_lock.lock().expect("ingest lock poisoned");

            let now = unix_now();
            let strict = self.config.strict_metadata_recompute;

            let txn_result = handle.index.with_write_txn(|tx| {
                let mut touched_assets: Vec<String> = Vec::new();
                for (index, op) in &topic_ops {
                    let outcome = apply_one(tx, op, now, &self.config);
                    match outcome {
                        Ok(()) => {
                            if !touched_assets.contains(&op.asset_hash) {
                                touched_assets.push(op.asset_hash.clone());
                            }
                            outcomes[*index] = Some(OperationOutcome {
                                index: *index,
                                result: Ok(()),
                            });
                        }
                        Err(e) => {
                            outcomes[*index] = Some(OperationOutcome {
                                index: *index,
                                result: Err(e.to_string()),
                            });
                        }
                    }
                }

                for asset_hash in &touched_assets {
                    if let Err(e) = topic::recompute_metadata(tx, asset_hash, now) {
                        if strict {
                            return Err(e);
                        }
                        log::warn!(
                            "metadata recompute failed for {asset_hash} in topic {topic_name:?}: {e}"
                        );
                    }
                }

                Ok(())
            });

            if let Err(e) = txn_result {
                // The whole topic's operations are rolled back; report the
                // shared failure on each of its outcomes that hasn't already
                // recorded one (it always will not have, since this only
                // happens under `strict_metadata_recompute`).
                for (index, _) in &topic_ops {
                    outcomes[*index] = Some(OperationOutcome {
                        index: *index,
                        result: Err(format!("topic transaction aborted: {e}")),
                    });
                }
            }
        }

        Ok(BatchResult {
            outcomes: outcomes.into_iter().map(|o| o.expect("every index assigned")).collect(),
        })
    }
}

fn apply_one(
    tx: &rusqlite::Transaction<'_>,
    op: &MetadataOperation,
    now: i64,
    config: &crate::Config,
) -> crate::Result<()> {
    if op.key.is_empty() {
        return Err(crate::Error::InvalidRequest("metadata key must not be empty".to_string()));
    }
    if op.key.len() > config.max_metadata_key_length {
        return Err(crate::Error::MetadataKeyTooLong);
    }

    topic::get_asset(tx, &op.asset_hash)?;

    let (value_text, value_num) = match (&op.op, &op.value) {
        (MetadataOp::Set, Some(value)) => {
            if value.byte_len() > config.max_metadata_value_bytes {
                return Err(crate::Error::MetadataValueTooLong);
            }
            match value {
                MetadataValue::Number(n) => (None, Some(*n)),
                MetadataValue::Text(s) => (Some(s.clone()), None),
            }
        }
        (MetadataOp::Set, None) => {
            return Err(crate::Error::InvalidRequest(
                "set operation requires a value".to_string(),
            ))
        }
        (MetadataOp::Delete, _) => (None, None),
    };

    topic::log_metadata(
        tx,
        &MetadataLogRow {
            asset_id: op.asset_hash.clone(),
            op: op.op,
            key: op.key.clone(),
            value_text,
            value_num,
            processor: op.processor.clone(),
            processor_version: op.processor_version.clone(),
            timestamp: now,
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use test_log::test;

    fn op(hash: &str, key: &str, value: f64) -> MetadataOperation {
        MetadataOperation {
            asset_hash: hash.to_string(),
            op: MetadataOp::Set,
            key: key.to_string(),
            value: Some(MetadataValue::Number(value)),
            processor: "test".to_string(),
            processor_version: "1".to_string(),
        }
    }

    #[test]
    fn applies_set_and_computes_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let result = store
            .batch_metadata(vec![op(&put.hash, "width", 1920.0)])
            .unwrap();
        assert!(result.all_succeeded());
    }

    #[test]
    fn unknown_asset_fails_only_that_operation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();
        let unknown = "a".repeat(64);

        let result = store
            .batch_metadata(vec![op(&put.hash, "width", 1920.0), op(&unknown, "width", 1.0)])
            .unwrap();

        assert!(result.outcomes[0].result.is_ok());
        assert!(result.outcomes[1].result.is_err());
    }

    #[test]
    fn operations_span_multiple_topics_independently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("a").unwrap();
        store.create_topic("b").unwrap();
        let put_a = store.put("a", b"x", "x.txt", None).unwrap();
        let put_b = store.put("b", b"y", "y.txt", None).unwrap();

        let result = store
            .batch_metadata(vec![op(&put_a.hash, "k", 1.0), op(&put_b.hash, "k", 2.0)])
            .unwrap();
        assert!(result.all_succeeded());
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).batch_max_operations(1).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let result = store.batch_metadata(vec![
            op(&put.hash, "a", 1.0),
            op(&put.hash, "b", 2.0),
        ]);
        assert!(matches!(
            result,
            Err(crate::Error::BatchTooManyOperations { count: 2, limit: 1 })
        ));
    }

    #[test]
    fn key_too_long_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path())
            .max_metadata_key_length(4)
            .open()
            .unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let result = store
            .batch_metadata(vec![op(&put.hash, "toolong", 1.0)])
            .unwrap();
        assert!(result.outcomes[0].result.is_err());
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let result = store
            .batch_metadata(vec![op(&put.hash, "", 1.0)])
            .unwrap();
        assert!(result.outcomes[0].result.is_err());
    }

    #[test]
    fn delete_removes_key_from_computed_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        store
            .batch_metadata(vec![op(&put.hash, "width", 1920.0)])
            .unwrap();
        let result = store.batch_metadata(vec![MetadataOperation {
            asset_hash: put.hash.clone(),
            op: MetadataOp::Delete,
            key: "width".to_string(),
            value: None,
            processor: "test".to_string(),
            processor_version: "1".to_string(),
        }]);
        assert!(result.unwrap().all_succeeded());
    }
}
