// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Crate-wide error type.
//!
//! Every variant corresponds to one of the stable, user-visible error-kind
//! identifiers the HTTP collaborator maps onto status codes; see [`Error::kind`].

/// Errors that can occur anywhere in the store.
#[derive(Debug)]
pub enum Error {
    /// Generic malformed request (e.g. zero-length payload).
    InvalidRequest(String),
    /// Topic name fails `^[a-z0-9_-]{1,64}$`.
    InvalidTopicName(String),
    /// Hash is not 64 lowercase hex characters.
    InvalidHash(String),
    /// Filename contains characters that are not safe to store.
    InvalidFilename(String),
    /// A required parameter was not supplied.
    MissingParam(String),

    /// No topic with this name has been created.
    TopicNotFound(String),
    /// No asset with this hash exists.
    AssetNotFound,
    /// `parent_hash` does not exist in the target topic.
    ParentNotFound,

    /// The hash already exists, owned by the given topic.
    AssetDuplicate {
        /// Topic the asset already lives in.
        topic: String,
        /// Size of the already-stored asset.
        size: u64,
        /// Segment the already-stored asset lives in.
        segment_id: u32,
        /// Offset of the already-stored asset's payload.
        offset: u64,
    },
    /// A topic with this name already exists.
    TopicAlreadyExists(String),

    /// Payload exceeds the configured maximum asset size.
    AssetTooLarge {
        /// Size of the rejected payload.
        size: u64,
        /// Configured limit.
        limit: u64,
    },
    /// Not enough disk space remains to accept the write.
    DiskLimitExceeded,
    /// Metadata key exceeds `max_metadata_key_length`.
    MetadataKeyTooLong,
    /// Metadata value exceeds `max_metadata_value_bytes`.
    MetadataValueTooLong,
    /// Batch request exceeds `batch_max_operations`.
    BatchTooManyOperations {
        /// Number of operations submitted.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// End-to-end content verification on read did not match the stored hash.
    VerificationFailed(String),
    /// The verifier found a topic in a state it cannot safely serve from.
    TopicUnhealthy(String),
    /// A record header failed structural validation.
    CorruptHeader,
    /// A record's magic bytes were not `MSHB`.
    CorruptMagic,
    /// A record advertises a version newer than this build supports.
    UnsupportedVersion(u16),
    /// Fewer bytes were available than a record's header advertised.
    ShortRead,
    /// A record's payload hash did not match its header.
    HashMismatch {
        /// Hash recorded in the header.
        expected: String,
        /// Hash recomputed from the payload.
        actual: String,
    },
    /// The rolling `dat_hashes` chain for a segment does not reconstruct.
    ChainDrift {
        /// Segment whose chain failed to reconstruct.
        segment_id: u32,
    },

    /// Underlying I/O failure.
    Io(std::io::Error),
    /// Underlying SQLite failure.
    Sqlite(rusqlite::Error),
    /// Anything else that should surface as a fatal, opaque failure.
    Internal(String),
}

impl Error {
    /// The stable, user-visible identifier for this error, as listed in the
    /// store's error handling design (e.g. `"ASSET_DUPLICATE"`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidTopicName(_) => "INVALID_TOPIC_NAME",
            Self::InvalidHash(_) => "INVALID_HASH",
            Self::InvalidFilename(_) => "INVALID_FILENAME",
            Self::MissingParam(_) => "MISSING_PARAM",
            Self::TopicNotFound(_) => "TOPIC_NOT_FOUND",
            Self::AssetNotFound => "ASSET_NOT_FOUND",
            Self::ParentNotFound => "PARENT_NOT_FOUND",
            Self::AssetDuplicate { .. } => "ASSET_DUPLICATE",
            Self::TopicAlreadyExists(_) => "TOPIC_ALREADY_EXISTS",
            Self::AssetTooLarge { .. } => "ASSET_TOO_LARGE",
            Self::DiskLimitExceeded => "DISK_LIMIT_EXCEEDED",
            Self::MetadataKeyTooLong => "METADATA_KEY_TOO_LONG",
            Self::MetadataValueTooLong => "METADATA_VALUE_TOO_LONG",
            Self::BatchTooManyOperations { .. } => "BATCH_TOO_MANY_OPERATIONS",
            Self::VerificationFailed(_) => "VERIFICATION_FAILED",
            Self::TopicUnhealthy(_) => "TOPIC_UNHEALTHY",
            Self::CorruptHeader => "CORRUPT_HEADER",
            Self::CorruptMagic => "CORRUPT_HEADER",
            Self::UnsupportedVersion(_) => "CORRUPT_HEADER",
            Self::ShortRead => "CORRUPT_HEADER",
            Self::HashMismatch { .. } => "HASH_MISMATCH",
            Self::ChainDrift { .. } => "CHAIN_DRIFT",
            Self::Io(_) | Self::Sqlite(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {self:?}", self.kind())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Store-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
