//! # Design
//!
//! - Two outcomes matter to callers: retry via direct transfer, or give up.
//! - Keep the requested URL as context and the engine error as the source.

use artimirror_torrent_core::TorrentError;
use thiserror::Error;

/// Result type for consumer transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by the consumer transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Peer transfer failed; the artifact should be fetched directly instead.
    #[error("peer download failed")]
    DownloadFailed {
        /// Requested artifact URL.
        url: String,
        /// Engine failure behind the download error.
        #[source]
        source: TorrentError,
    },
    /// Unrecoverable engine failure that must not be retried.
    #[error("peer transport failed fatally")]
    Fatal {
        /// Requested artifact URL.
        url: String,
        /// Engine failure.
        #[source]
        source: TorrentError,
    },
    /// HTTP client could not be constructed.
    #[error("direct fetch client unavailable")]
    Client {
        /// Builder failure.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Classify an engine failure raised while downloading `url`.
    #[must_use]
    pub fn from_engine(url: &str, source: TorrentError) -> Self {
        if source.is_internal() {
            Self::Fatal {
                url: url.to_string(),
                source,
            }
        } else {
            Self::DownloadFailed {
                url: url.to_string(),
                source,
            }
        }
    }

    /// Whether the caller may retry with a direct transfer.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DownloadFailed { .. })
    }
}
