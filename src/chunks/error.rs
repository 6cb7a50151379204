//! Error taxonomy for chunk operations
//!
//! Store failures are classified exactly once, at the point where the
//! object store returns them, and carry the operation name. Structural
//! failures (too many chunks, merge safety limit) are never degraded into
//! truncated or partial output.

use std::io::{Error as IoError, ErrorKind};
use thiserror::Error;

/// Error type for chunk operations
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The object (or its bucket) does not exist
    #[error("{operation}: object not found")]
    NotFound {
        operation: String,
        #[source]
        source: IoError,
    },

    /// Credentials were rejected or lack permission
    #[error("{operation}: access denied")]
    AccessDenied {
        operation: String,
        #[source]
        source: IoError,
    },

    /// Connectivity problem talking to the store
    #[error("{operation} network issue: network error")]
    Network {
        operation: String,
        #[source]
        source: IoError,
    },

    /// Any other store failure
    #[error("{operation} failed: {source}")]
    Unknown {
        operation: String,
        #[source]
        source: IoError,
    },

    /// Per-file listing exceeded the configured cap
    #[error("list chunks: file has too many chunks (limit: {limit})")]
    TooManyChunks { limit: usize },

    /// Highest line number is beyond what a merge may allocate
    #[error("maxLine {max_line} exceeds safety limit {limit}")]
    MergeSafetyLimit { max_line: u64, limit: u64 },

    /// Rejected before any store call
    #[error("invalid chunk range: first_line {first_line}, last_line {last_line}")]
    InvalidRange { first_line: u64, last_line: u64 },

    /// A download task panicked or was aborted
    #[error("download task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Fieldless view of `ChunkError` for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkErrorKind {
    NotFound,
    AccessDenied,
    Network,
    Unknown,
    TooManyChunks,
    MergeSafetyLimit,
    InvalidRange,
    Task,
}

/// Message fragments that mark a transport failure when the kind is uninformative
const NETWORK_HINTS: [&str; 5] = ["connection", "timeout", "network", "dial", "refused"];

impl ChunkError {
    /// Map an object store I/O error onto the taxonomy
    pub fn classify(err: IoError, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        match err.kind() {
            ErrorKind::NotFound => ChunkError::NotFound {
                operation,
                source: err,
            },
            ErrorKind::PermissionDenied => ChunkError::AccessDenied {
                operation,
                source: err,
            },
            ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable => ChunkError::Network {
                operation,
                source: err,
            },
            _ => {
                let message = err.to_string().to_lowercase();
                if NETWORK_HINTS.iter().any(|hint| message.contains(hint)) {
                    ChunkError::Network {
                        operation,
                        source: err,
                    }
                } else {
                    ChunkError::Unknown {
                        operation,
                        source: err,
                    }
                }
            }
        }
    }

    pub fn kind(&self) -> ChunkErrorKind {
        match self {
            ChunkError::NotFound { .. } => ChunkErrorKind::NotFound,
            ChunkError::AccessDenied { .. } => ChunkErrorKind::AccessDenied,
            ChunkError::Network { .. } => ChunkErrorKind::Network,
            ChunkError::Unknown { .. } => ChunkErrorKind::Unknown,
            ChunkError::TooManyChunks { .. } => ChunkErrorKind::TooManyChunks,
            ChunkError::MergeSafetyLimit { .. } => ChunkErrorKind::MergeSafetyLimit,
            ChunkError::InvalidRange { .. } => ChunkErrorKind::InvalidRange,
            ChunkError::Task(_) => ChunkErrorKind::Task,
        }
    }
}

pub type ChunkResult<T> = Result<T, ChunkError>;
