//! Error types for torrent core services.

use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::bencode::BencodeError;

/// Primary error type for metadata and engine operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Filesystem I/O failed while reading, hashing, or writing.
    #[error("torrent i/o failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Operation exceeded its wall-clock bound.
    #[error("torrent operation timed out")]
    Timeout {
        /// Operation identifier.
        operation: &'static str,
        /// Bound that was exceeded.
        limit: Duration,
    },
    /// Operation was cancelled because the engine stopped.
    #[error("torrent operation interrupted")]
    Interrupted {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Operation is not supported by the underlying engine.
    #[error("torrent operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Too few peers hold the object to attempt a transfer.
    #[error("not enough peers")]
    NotEnoughPeers {
        /// Minimum peers the caller asked for.
        required: usize,
        /// Peers found when the attempt gave up.
        found: usize,
    },
    /// Engine has not been started.
    #[error("distribution engine is not running")]
    NotRunning {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Request arguments were rejected before any work was done.
    #[error("invalid torrent request")]
    InvalidRequest {
        /// Operation identifier.
        operation: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Metadata bytes did not decode.
    #[error("malformed torrent metadata")]
    Bencode {
        /// Underlying decode failure.
        #[source]
        source: BencodeError,
    },
    /// Metadata decoded but is structurally invalid.
    #[error("invalid torrent metadata")]
    InvalidMetadata {
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Downloaded data failed verification against the metadata.
    #[error("piece verification failed")]
    Corrupt {
        /// Index of the first piece that could not be verified.
        piece: usize,
    },
    /// Unrecoverable engine failure.
    #[error("internal engine failure")]
    Internal {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl TorrentError {
    /// Build an [`TorrentError::Io`] for the given operation and path.
    #[must_use]
    pub fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error is an unrecoverable engine failure.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<BencodeError> for TorrentError {
    fn from(source: BencodeError) -> Self {
        Self::Bencode { source }
    }
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;
