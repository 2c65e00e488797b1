// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Store configuration, built with the same chained-setter idiom the
//! underlying value-log and tree configs use.

use std::path::PathBuf;

/// Default segment size cap: 1 GiB.
pub const DEFAULT_MAX_DAT_SIZE: u64 = 1_073_741_824;

/// Default maximum metadata key length.
pub const DEFAULT_MAX_METADATA_KEY_LENGTH: usize = 256;

/// Default maximum metadata value size: 10 MiB.
pub const DEFAULT_MAX_METADATA_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Default maximum operations per metadata batch.
pub const DEFAULT_BATCH_MAX_OPERATIONS: usize = 100_000;

/// Default progress-reporting interval for the verifier.
pub const DEFAULT_VERIFY_PROGRESS_INTERVAL: usize = 100;

/// Configuration for a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) work_dir: PathBuf,
    pub(crate) topics_root: PathBuf,
    pub(crate) orchestrator_path: PathBuf,
    pub(crate) max_dat_size: u64,
    pub(crate) max_metadata_key_length: usize,
    pub(crate) max_metadata_value_bytes: usize,
    pub(crate) batch_max_operations: usize,
    pub(crate) verify_progress_interval: usize,
    pub(crate) strict_metadata_recompute: bool,
}

impl Config {
    /// Creates a configuration rooted at `work_dir`, with `topics/` and
    /// `.internal/orchestrator.db` nested underneath it by default.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            topics_root: work_dir.join("topics"),
            orchestrator_path: work_dir.join(".internal").join("orchestrator.db"),
            work_dir,
            max_dat_size: DEFAULT_MAX_DAT_SIZE,
            max_metadata_key_length: DEFAULT_MAX_METADATA_KEY_LENGTH,
            max_metadata_value_bytes: DEFAULT_MAX_METADATA_VALUE_BYTES,
            batch_max_operations: DEFAULT_BATCH_MAX_OPERATIONS,
            verify_progress_interval: DEFAULT_VERIFY_PROGRESS_INTERVAL,
            strict_metadata_recompute: false,
        }
    }

    /// Overrides where topic directories live (default: `<work_dir>/topics`).
    #[must_use]
    pub fn topics_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.topics_root = path.into();
        self
    }

    /// Overrides where the orchestrator database lives.
    #[must_use]
    pub fn orchestrator_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.orchestrator_path = path.into();
        self
    }

    /// Sets the segment size cap in bytes.
    #[must_use]
    pub fn max_dat_size(mut self, bytes: u64) -> Self {
        self.max_dat_size = bytes;
        self
    }

    /// Sets the maximum metadata key length in bytes.
    #[must_use]
    pub fn max_metadata_key_length(mut self, bytes: usize) -> Self {
        self.max_metadata_key_length = bytes;
        self
    }

    /// Sets the maximum metadata value size in bytes.
    #[must_use]
    pub fn max_metadata_value_bytes(mut self, bytes: usize) -> Self {
        self.max_metadata_value_bytes = bytes;
        self
    }

    /// Sets the maximum number of operations accepted in one metadata batch.
    #[must_use]
    pub fn batch_max_operations(mut self, max: usize) -> Self {
        self.batch_max_operations = max;
        self
    }

    /// Sets how often the verifier reports progress, in rows scanned.
    #[must_use]
    pub fn verify_progress_interval(mut self, interval: usize) -> Self {
        self.verify_progress_interval = interval.max(1);
        self
    }

    /// When `true`, a `metadata_computed` rebuild failure aborts the whole
    /// topic transaction instead of only marking the affected ops as failed.
    ///
    /// Default `false`, matching the original behavior: the log is durable
    /// and canonical, so a rebuildable view failing to rebuild is not, by
    /// itself, a reason to lose otherwise-successful writes.
    #[must_use]
    pub fn strict_metadata_recompute(mut self, strict: bool) -> Self {
        self.strict_metadata_recompute = strict;
        self
    }

    /// Opens (creating if necessary) the store described by this configuration.
    pub fn open(self) -> crate::Result<crate::Store> {
        crate::Store::open(self)
    }
}
