// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Offline integrity verification and repair for a topic: per-asset record
//! checks, segment hash-chain reconstruction, and orchestrator cross-checks.

use crate::record;
use crate::store::Store;
use crate::topic::{self, AssetRow};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Cap on how many individual issues a report carries in detail; beyond this
/// only the running total is tracked, so a badly corrupted topic doesn't
/// blow up memory building a report nobody can read anyway.
const MAX_REPORTED_ISSUES: usize = 100;

const DEFAULT_PARALLELISM: usize = 4;

/// A handle to cancel an ongoing verification from another thread.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Progress reported every `verify_progress_interval` assets checked.
#[derive(Debug, Clone)]
pub struct VerifyProgress {
    pub assets_checked: usize,
    pub assets_total: usize,
    pub issues_found: usize,
    pub elapsed: Duration,
}

/// The kind of integrity problem an [`Issue`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// The stored payload's recomputed hash does not match the asset's hash.
    HashMismatch,
    /// No readable record exists at the asset's recorded coordinates.
    MissingRecord,
    /// A record's header failed structural validation.
    CorruptHeader,
    /// A segment's reconstructed hash chain does not match `dat_hashes`.
    ChainDrift,
    /// An asset exists in the topic index but not in the orchestrator (or is
    /// registered there under a different topic).
    OrchestratorGap,
}

impl IssueKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HashMismatch => "HASH_MISMATCH",
            Self::MissingRecord => "MISSING_RECORD",
            Self::CorruptHeader => "CORRUPT_HEADER",
            Self::ChainDrift => "CHAIN_DRIFT",
            Self::OrchestratorGap => "ORCHESTRATOR_GAP",
        }
    }
}

/// One concrete integrity problem found during verification.
#[derive(Debug, Clone)]
pub struct Issue {
    pub kind: IssueKind,
    pub asset_hash: Option<String>,
    pub segment_id: Option<u32>,
    pub detail: String,
}

/// The result of verifying one topic.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub assets_checked: usize,
    /// Issues found, capped at [`MAX_REPORTED_ISSUES`].
    pub issues: Vec<Issue>,
    /// Total issue count, which may exceed `issues.len()`.
    pub total_issues: usize,
    pub was_cancelled: bool,
    pub duration: Duration,
}

impl VerificationReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.total_issues == 0
    }
}

/// The result of a [`Store::recover`] pass.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Bytes truncated from a torn trailing record, if any was found.
    pub truncated_bytes: u64,
    /// Segment truncation was applied to, if any.
    pub truncated_segment: Option<u32>,
    /// Number of orchestrator rows restored for assets that were missing one.
    pub orchestrator_rows_restored: usize,
}

struct Collector {
    issues: Mutex<Vec<Issue>>,
    total: AtomicUsize,
}

impl Collector {
    fn new() -> Self {
        Self {
            issues: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
        }
    }

    fn report(&self, issue: Issue) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut issues = self.issues.lock().expect("issue collector poisoned");
        if issues.len() < MAX_REPORTED_ISSUES {
            issues.push(issue);
        }
    }

    fn into_parts(self) -> (Vec<Issue>, usize) {
        (
            self.issues.into_inner().expect("issue collector poisoned"),
            self.total.load(Ordering::Relaxed),
        )
    }
}

impl Store {
    /// Verifies one topic: every asset's record is independently re-read and
    /// re-hashed, every segment's hash chain is reconstructed from scratch,
    /// and every asset is cross-checked against the orchestrator.
    ///
    /// Runs with [`DEFAULT_PARALLELISM`] worker threads over the asset list;
    /// `progress` is invoked roughly every `verify_progress_interval` assets
    /// (per [`crate::Config`]), and may be called concurrently from multiple
    /// worker threads.
    pub fn verify<F>(
        &self,
        topic_name: &str,
        cancel: &CancellationToken,
        progress: Option<F>,
    ) -> crate::Result<VerificationReport>
    where
        F: Fn(VerifyProgress) + Send + Sync + 'static,
    {
        let start = Instant::now();
        let handle = self.topic(topic_name)?;

        let conn = handle.index.read_conn()?;
        let assets = topic::all_assets(&conn)?;
        drop(conn);

        let total = assets.len();
        let collector = Arc::new(Collector::new());
        let checked = Arc::new(AtomicUsize::new(0));
        let progress = progress.map(Arc::new);
        let progress_interval = self.config.verify_progress_interval;

        let parallelism = DEFAULT_PARALLELISM.min(total.max(1));
        let chunk_size = total.div_ceil(parallelism.max(1)).max(1);

        thread::scope(|scope| {
            for chunk in assets.chunks(chunk_size) {
                let collector = Arc::clone(&collector);
                let checked = Arc::clone(&checked);
                let progress = progress.clone();
                let cancel = cancel.clone();
                let handle = Arc::clone(&handle);
                let topic_name = topic_name.to_string();

                scope.spawn(move || {
                    for asset in chunk {
                        if cancel.is_cancelled() {
                            break;
                        }
                        check_asset(&handle, &topic_name, asset, &collector, &self.orchestrator);

                        let n = checked.fetch_add(1, Ordering::Relaxed) + 1;
                        if n % progress_interval == 0 {
                            if let Some(cb) = &progress {
                                cb(VerifyProgress {
                                    assets_checked: n,
                                    assets_total: total,
                                    issues_found: collector.total.load(Ordering::Relaxed),
                                    elapsed: start.elapsed(),
                                });
                            }
                        }
                    }
                });
            }
        });

        check_chains(&handle, topic_name, &collector)?;

        let (issues, total_issues) = Arc::try_unwrap(collector)
            .unwrap_or_else(|arc| {
                // Only reachable if a spawned thread panicked and leaked its
                // clone; rebuild an empty collector rather than panic here.
                log::error!("verification collector had outstanding references after scope exit");
                Arc::new(Collector::new())
            })
            .into_parts();

        Ok(VerificationReport {
            assets_checked: checked.load(Ordering::Relaxed),
            issues,
            total_issues,
            was_cancelled: cancel.is_cancelled(),
            duration: start.elapsed(),
        })
    }

    /// Attempts to repair a topic: truncates a torn trailing record from the
    /// active segment (if one is found), and restores any orchestrator rows
    /// missing for assets that are otherwise durably stored in this topic.
    pub fn recover(&self, topic_name: &str) -> crate::Result<RecoveryReport> {
        let handle = self.topic(topic_name)?;
        let mut report = RecoveryReport::default();

        let (active_id, active_size) = handle.segments.active();
        let path = handle.segments.segment_path(active_id)?;
        let file = File::open(&path)?;
        let mut good_end: u64 = 0;
        let mut saw_torn = false;

        for item in record::ScanIter::new(BufReader::new(file)) {
            match item {
                Ok((offset, header, _payload)) => {
                    good_end = offset + record::HEADER_LEN as u64 + header.data_length;
                }
                Err(crate::Error::ShortRead) => {
                    saw_torn = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if saw_torn && good_end < active_size {
            let truncated = active_size - good_end;
            handle.segments.truncate_segment(active_id, good_end)?;
            report.truncated_bytes = truncated;
            report.truncated_segment = Some(active_id);
            log::warn!(
                "recovered topic {topic_name:?}: truncated {truncated} torn trailing bytes from segment {active_id}"
            );
        }

        let conn = handle.index.read_conn()?;
        let assets = topic::all_assets(&conn)?;
        drop(conn);

        for asset in &assets {
            if self.orchestrator.reinsert_if_missing(&asset.hash, topic_name, asset.created_at)? {
                report.orchestrator_rows_restored += 1;
            }
        }

        Ok(report)
    }
}

fn check_asset(
    handle: &crate::store::TopicHandle,
    topic_name: &str,
    asset: &AssetRow,
    collector: &Collector,
    orchestrator: &crate::orchestrator::Orchestrator,
) {
    let record_offset = asset.offset - record::HEADER_LEN as u64;
    let record_len = record::HEADER_LEN + asset.size as usize;

    match handle.segments.read_at(asset.segment_id, record_offset, record_len) {
        Ok(bytes) => match record::decode(&mut std::io::Cursor::new(&bytes), true) {
            Ok((header, _payload)) => {
                if header.hash != asset.hash {
                    collector.report(Issue {
                        kind: IssueKind::HashMismatch,
                        asset_hash: Some(asset.hash.clone()),
                        segment_id: Some(asset.segment_id),
                        detail: format!(
                            "record header hash {} does not match index hash {}",
                            header.hash, asset.hash
                        ),
                    });
                }
            }
            Err(crate::Error::HashMismatch { expected, actual }) => {
                collector.report(Issue {
                    kind: IssueKind::HashMismatch,
                    asset_hash: Some(asset.hash.clone()),
                    segment_id: Some(asset.segment_id),
                    detail: format!("payload re-hash {actual} does not match header hash {expected}"),
                });
            }
            Err(crate::Error::ShortRead) | Err(crate::Error::CorruptMagic) | Err(crate::Error::UnsupportedVersion(_)) => {
                collector.report(Issue {
                    kind: IssueKind::CorruptHeader,
                    asset_hash: Some(asset.hash.clone()),
                    segment_id: Some(asset.segment_id),
                    detail: "record header failed structural validation".to_string(),
                });
            }
            Err(e) => {
                collector.report(Issue {
                    kind: IssueKind::MissingRecord,
                    asset_hash: Some(asset.hash.clone()),
                    segment_id: Some(asset.segment_id),
                    detail: format!("unreadable record: {e}"),
                });
            }
        },
        Err(_) => {
            collector.report(Issue {
                kind: IssueKind::MissingRecord,
                asset_hash: Some(asset.hash.clone()),
                segment_id: Some(asset.segment_id),
                detail: format!(
                    "no record found at segment {} offset {}",
                    asset.segment_id, record_offset
                ),
            });
        }
    }

    match orchestrator.check_hash(&asset.hash) {
        Ok(Some(row)) if row.topic == topic_name => {}
        Ok(Some(row)) => collector.report(Issue {
            kind: IssueKind::OrchestratorGap,
            asset_hash: Some(asset.hash.clone()),
            segment_id: None,
            detail: format!("orchestrator attributes this hash to topic {:?}, not {topic_name:?}", row.topic),
        }),
        Ok(None) => collector.report(Issue {
            kind: IssueKind::OrchestratorGap,
            asset_hash: Some(asset.hash.clone()),
            segment_id: None,
            detail: "asset exists in topic index but is unregistered in the orchestrator".to_string(),
        }),
        Err(e) => collector.report(Issue {
            kind: IssueKind::OrchestratorGap,
            asset_hash: Some(asset.hash.clone()),
            segment_id: None,
            detail: format!("orchestrator lookup failed: {e}"),
        }),
    }
}

fn check_chains(handle: &crate::store::TopicHandle, _topic_name: &str, collector: &Collector) -> crate::Result<()> {
    let conn = handle.index.read_conn()?;
    let segment_ids = handle.segments.list_segments()?;

    let mut prev = String::new();
    for &segment_id in &segment_ids {
        let path = handle.segments.segment_path(segment_id)?;
        let file = File::open(&path)?;

        let mut cumulative = prev.clone();
        for item in record::ScanIter::new(BufReader::new(file)) {
            let (_, header, _) = match item {
                Ok(v) => v,
                Err(crate::Error::ShortRead) => break, // torn tail handled by recover(), not a chain fault
                Err(e) => return Err(e),
            };
            let mut hasher = blake3::Hasher::new();
            hasher.update(cumulative.as_bytes());
            hasher.update(header.hash.as_bytes());
            cumulative = hasher.finalize().to_hex().to_string();
        }

        let stored = topic::chain_value(&conn, segment_id)?;
        if stored.as_deref() != Some(cumulative.as_str()) {
            collector.report(Issue {
                kind: IssueKind::ChainDrift,
                asset_hash: None,
                segment_id: Some(segment_id),
                detail: format!(
                    "reconstructed chain {cumulative} does not match stored chain {stored:?}"
                ),
            });
        }

        prev = cumulative;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::os::unix::fs::FileExt;
    use test_log::test;

    #[test]
    fn healthy_topic_reports_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        store.put("photos", b"hello", "hi.txt", None).unwrap();
        store.put("photos", b"world", "w.txt", None).unwrap();

        let report = store.verify("photos", &CancellationToken::new(), None::<fn(VerifyProgress)>).unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.assets_checked, 2);
    }

    #[test]
    fn detects_hash_mismatch_from_corrupted_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let path = dir.path().join("topics/photos/000001.dat");
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all_at(b"X", put.offset).unwrap();

        let report = store.verify("photos", &CancellationToken::new(), None::<fn(VerifyProgress)>).unwrap();
        assert!(!report.is_healthy());
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::HashMismatch));
    }

    #[test]
    fn detects_orchestrator_gap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let conn = rusqlite::Connection::open(dir.path().join(".internal/orchestrator.db")).unwrap();
        conn.execute("DELETE FROM asset_index WHERE hash = ?1", [&put.hash]).unwrap();

        let report = store.verify("photos", &CancellationToken::new(), None::<fn(VerifyProgress)>).unwrap();
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::OrchestratorGap));
    }

    #[test]
    fn recover_truncates_torn_trailing_record_and_restores_orchestrator_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = Config::new(dir.path()).open().unwrap();
        store.create_topic("photos").unwrap();
        let put = store.put("photos", b"hello", "hi.txt", None).unwrap();

        let path = dir.path().join("topics/photos/000001.dat");
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 1).unwrap();

        let conn = rusqlite::Connection::open(dir.path().join(".internal/orchestrator.db")).unwrap();
        conn.execute("DELETE FROM asset_index WHERE hash = ?1", [&put.hash]).unwrap();
        drop(conn);

        let report = store.recover("photos").unwrap();
        assert_eq!(report.truncated_segment, Some(1));
        assert_eq!(report.orchestrator_rows_restored, 1);
        assert_eq!(store.orchestrator.lookup_topic(&put.hash).unwrap(), "photos");
    }
}
