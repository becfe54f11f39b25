//! Error types for the compaction pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for compaction operations
pub type Result<T> = std::result::Result<T, CompactError>;

/// Main error type for reading, filtering and writing databases
#[derive(Error, Debug)]
pub enum CompactError {
    /// The source database could not be obtained (missing file, failed download)
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source bytes are not a valid database
    #[error("malformed source at offset {offset}: {reason}")]
    MalformedSource {
        /// Byte offset (within the buffer being decoded) where the problem was found
        offset: usize,
        /// What was expected and what was found
        reason: String,
    },

    /// Declared IP version is neither 4 nor 6
    #[error("unsupported IP version {0} (expected 4 or 6)")]
    UnsupportedIpVersion(u64),

    /// No supported record size can address the tree and data section
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// I/O failure while emitting the output database
    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        /// Destination that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected before the pipeline started
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Network is not representable (prefix too long, host bits set, wrong family)
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

impl CompactError {
    /// Shorthand for a [`CompactError::MalformedSource`]
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        CompactError::MalformedSource {
            offset,
            reason: reason.into(),
        }
    }

    /// True for errors caused by the contents of the source database
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            CompactError::MalformedSource { .. } | CompactError::UnsupportedIpVersion(_)
        )
    }
}
