//! # Design
//!
//! - Provide structured, constant-message errors for the seeder and publisher.
//! - Capture operation context (paths, fields, inputs) to make failures reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::{Path, PathBuf};

use artimirror_torrent_core::TorrentError;
use thiserror::Error;

/// Result type for seeder operations.
pub type SeederResult<T> = Result<T, SeederError>;

/// Errors produced by the link store, directory seeder, and publisher.
#[derive(Debug, Error)]
pub enum SeederError {
    /// IO failures while interacting with the filesystem.
    #[error("seeder io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Link entry could not be encoded or decoded.
    #[error("seeder link entry malformed")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path of the link entry.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Walkdir traversal failures.
    #[error("seeder walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        #[source]
        source: walkdir::Error,
    },
    /// Announce endpoint or size threshold is not yet known.
    #[error("seeder configuration incomplete")]
    ConfigurationIncomplete {
        /// Setting that is still missing.
        missing: &'static str,
    },
    /// Metadata declares a size that differs from the artifact on disk.
    #[error("metadata size does not match artifact")]
    SizeMismatch {
        /// Artifact that was checked.
        artifact: PathBuf,
        /// Length recorded in the metadata.
        declared: u64,
        /// Length found on disk.
        actual: u64,
    },
    /// Seeder start was requested without any local address.
    #[error("no local addresses to seed from")]
    NoAddresses,
    /// Operation requires a running seeder.
    #[error("directory seeder is not running")]
    NotRunning {
        /// Operation that required the seeder.
        operation: &'static str,
    },
    /// Input validation failures.
    #[error("seeder invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Distribution engine failures.
    #[error("distribution engine failure")]
    Engine {
        /// Operation that called into the engine.
        operation: &'static str,
        /// Underlying engine error.
        #[source]
        source: TorrentError,
    },
    /// Blocking task was cancelled or panicked.
    #[error("seeder background task failed")]
    Task {
        /// Operation that spawned the task.
        operation: &'static str,
        /// Underlying join error.
        #[source]
        source: tokio::task::JoinError,
    },
}

impl SeederError {
    pub(crate) fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(operation: &'static str, path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn walkdir(operation: &'static str, path: &Path, source: walkdir::Error) -> Self {
        Self::Walkdir {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) const fn engine(operation: &'static str, source: TorrentError) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: &str) -> Self {
        Self::InvalidInput {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }
}
