//! # Design
//!
//! - Centralize host-level errors for bootstrap and lifecycle hooks.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for host operations.
pub type AppResult<T> = Result<T, AppError>;

/// Host-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: artimirror_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: artimirror_telemetry::TelemetryError,
    },
    /// Seeder or publication operations failed.
    #[error("seeder operation failed")]
    Seeder {
        /// Operation identifier.
        operation: &'static str,
        /// Source seeder error.
        source: artimirror_seeder::SeederError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Required runtime state was missing.
    #[error("missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
        /// Optional value associated with the missing state.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: artimirror_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: artimirror_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn seeder(
        operation: &'static str,
        source: artimirror_seeder::SeederError,
    ) -> Self {
        Self::Seeder { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "host.config_changed",
            artimirror_config::ConfigError::UnknownField {
                field: "colour".to_string(),
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert!(config.source().is_some());

        let seeder = AppError::seeder("host.publish", artimirror_seeder::SeederError::NoAddresses);
        assert!(matches!(seeder, AppError::Seeder { .. }));
        assert_eq!(seeder.to_string(), "seeder operation failed");

        let missing = AppError::MissingEnv {
            name: "ARTIMIRROR_STORAGE_ROOT",
        };
        assert_eq!(missing.to_string(), "missing environment configuration");
    }
}
