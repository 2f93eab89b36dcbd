//! Environment-backed loading of [`SeederSettings`].

use std::time::Duration;

use tracing::warn;

use crate::error::ConfigResult;
use crate::model::{DEFAULT_FETCH_TIMEOUT, SeederSettings, SettingsChange, SettingsField};

/// Prefix applied to every environment variable read by the loader.
pub const ENV_PREFIX: &str = "ARTIMIRROR_";

/// Environment variable name carrying a setting.
#[must_use]
pub fn env_key(field: SettingsField) -> String {
    let suffix = match field {
        SettingsField::AnnounceUrl => "ANNOUNCE_URL",
        SettingsField::FileSizeThresholdMb => "FILE_SIZE_THRESHOLD_MB",
        SettingsField::MaxSeededTorrents => "MAX_SEEDED_TORRENTS",
        SettingsField::AnnounceIntervalSecs => "ANNOUNCE_INTERVAL_SECS",
        SettingsField::ScanIntervalSecs => "SCAN_INTERVAL_SECS",
        SettingsField::SeederEnabled => "SEEDER_ENABLED",
        SettingsField::FetchTimeoutSecs => "FETCH_TIMEOUT_SECS",
    };
    format!("{ENV_PREFIX}{suffix}")
}

impl SeederSettings {
    /// Load settings from the process environment on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when a present variable fails validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup on top of the defaults.
    ///
    /// An unparsable fetch timeout falls back to the default instead of
    /// failing the whole load.
    ///
    /// # Errors
    ///
    /// Returns an error when a present value fails validation.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        for field in SettingsField::ALL {
            let key = env_key(field);
            let Some(raw) = lookup(&key) else {
                continue;
            };
            if field == SettingsField::FetchTimeoutSecs {
                settings.fetch_timeout = fetch_timeout_or_default(&raw);
                continue;
            }
            settings = SettingsChange::parse(field, &raw)?.apply_to(&settings);
        }
        settings.revision = 0;
        Ok(settings)
    }
}

/// Parse a fetch timeout, falling back to the default for bad input.
#[must_use]
pub fn fetch_timeout_or_default(raw: &str) -> Duration {
    match SettingsChange::parse(SettingsField::FetchTimeoutSecs, raw) {
        Ok(SettingsChange::FetchTimeout(timeout)) => timeout,
        _ => {
            warn!(value = raw, "invalid fetch timeout; using default");
            DEFAULT_FETCH_TIMEOUT
        }
    }
}
