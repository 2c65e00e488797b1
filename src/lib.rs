// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A single-node, content-addressed asset store.
//!
//! Assets are written once, identified by their BLAKE3 content hash, and
//! grouped into topics — each topic gets its own append-only segment files
//! and its own SQLite index. A single orchestrator database enforces that a
//! given hash is owned by exactly one topic across the whole store.
//!
//! ```no_run
//! use silobang::Config;
//!
//! let store = Config::new("/var/lib/silobang").open()?;
//! store.create_topic("photos")?;
//! let put = store.put("photos", b"...", "photo.png", None)?;
//! let bytes = store.get(&put.hash, None, true)?;
//! # Ok::<(), silobang::Error>(())
//! ```

mod config;
mod error;
mod hash;
mod ingest;
mod metadata;
mod mime;
mod orchestrator;
mod read;
mod record;
mod segment;
mod store;
mod topic;
mod verify;

pub use config::Config;
pub use error::{Error, Result};
pub use hash::{hash_payload, is_valid_hash, HASH_HEX_LEN};
pub use ingest::PutResult;
pub use metadata::{BatchResult, MetadataOperation, MetadataValue, OperationOutcome};
pub use read::{AssetStat, ByteRange};
pub use store::Store;
pub use topic::MetadataOp;
pub use verify::{CancellationToken, Issue, IssueKind, RecoveryReport, VerificationReport, VerifyProgress};
