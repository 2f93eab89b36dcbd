//! Typed seeder settings and change payloads.
//!
//! # Design
//! - Pure data carriers; snapshots are immutable once published.
//! - Every change produces a new snapshot with a bumped revision.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::validate::{parse_bool, parse_max_seeded, parse_secs, parse_threshold_mb, parse_url};

/// Bytes per megabyte used by the size threshold.
pub const BYTES_PER_MB: u64 = 1024 * 1024;
/// Default announce interval advertised to the engine.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(60);
/// Default pause between storage directory scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);
/// Default hard bound on a peer fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Immutable snapshot of the live seeder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeederSettings {
    /// Monotonic revision bumped on every change.
    pub revision: u64,
    /// Tracker announce endpoint; `None` until known.
    pub announce_url: Option<Url>,
    /// Minimum artifact size (MB) worth creating metadata for; `None` until known.
    pub file_size_threshold_mb: Option<u64>,
    /// Maximum number of concurrently seeded objects; `None` is unlimited.
    pub max_seeded_torrents: Option<usize>,
    /// Interval the engine announces to the tracker.
    pub announce_interval: Duration,
    /// Pause between storage directory scans.
    pub scan_interval: Duration,
    /// Whether the directory seeder should run at all.
    pub seeder_enabled: bool,
    /// Hard wall-clock bound on a single peer fetch.
    pub fetch_timeout: Duration,
}

impl Default for SeederSettings {
    fn default() -> Self {
        Self {
            revision: 0,
            announce_url: None,
            file_size_threshold_mb: None,
            max_seeded_torrents: None,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            seeder_enabled: false,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl SeederSettings {
    /// Size threshold in bytes, when the threshold is known.
    #[must_use]
    pub const fn threshold_bytes(&self) -> Option<u64> {
        match self.file_size_threshold_mb {
            Some(mb) => Some(mb.saturating_mul(BYTES_PER_MB)),
            None => None,
        }
    }

    /// Whether both the announce endpoint and the threshold are known.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.announce_url.is_some() && self.file_size_threshold_mb.is_some()
    }
}

/// Individually addressable setting names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsField {
    /// Tracker announce endpoint.
    AnnounceUrl,
    /// Size threshold in MB.
    FileSizeThresholdMb,
    /// Seeded-set capacity.
    MaxSeededTorrents,
    /// Engine announce interval.
    AnnounceIntervalSecs,
    /// Directory scan interval.
    ScanIntervalSecs,
    /// Seeder on/off switch.
    SeederEnabled,
    /// Peer fetch timeout.
    FetchTimeoutSecs,
}

impl SettingsField {
    /// Every known field, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::AnnounceUrl,
        Self::FileSizeThresholdMb,
        Self::MaxSeededTorrents,
        Self::AnnounceIntervalSecs,
        Self::ScanIntervalSecs,
        Self::SeederEnabled,
        Self::FetchTimeoutSecs,
    ];

    /// Canonical `snake_case` name of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnnounceUrl => "announce_url",
            Self::FileSizeThresholdMb => "file_size_threshold_mb",
            Self::MaxSeededTorrents => "max_seeded_torrents",
            Self::AnnounceIntervalSecs => "announce_interval_secs",
            Self::ScanIntervalSecs => "scan_interval_secs",
            Self::SeederEnabled => "seeder_enabled",
            Self::FetchTimeoutSecs => "fetch_timeout_secs",
        }
    }
}

impl fmt::Display for SettingsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingsField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace(['.', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == normalised)
            .ok_or_else(|| ConfigError::UnknownField {
                field: s.to_string(),
            })
    }
}

/// A single typed settings mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    /// Replace the announce endpoint.
    AnnounceUrl(Option<Url>),
    /// Replace the size threshold.
    FileSizeThresholdMb(u64),
    /// Replace the seeded-set capacity.
    MaxSeededTorrents(Option<usize>),
    /// Replace the announce interval.
    AnnounceInterval(Duration),
    /// Replace the scan interval.
    ScanInterval(Duration),
    /// Toggle the seeder.
    SeederEnabled(bool),
    /// Replace the fetch timeout.
    FetchTimeout(Duration),
}

impl SettingsChange {
    /// Parse a raw `(field, value)` notification into a typed change.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the value does not parse for
    /// the given field.
    pub fn parse(field: SettingsField, raw: &str) -> ConfigResult<Self> {
        let field_name = field.as_str();
        Ok(match field {
            SettingsField::AnnounceUrl => Self::AnnounceUrl(parse_url(field_name, raw)?),
            SettingsField::FileSizeThresholdMb => {
                Self::FileSizeThresholdMb(parse_threshold_mb(field_name, raw)?)
            }
            SettingsField::MaxSeededTorrents => {
                Self::MaxSeededTorrents(parse_max_seeded(field_name, raw)?)
            }
            SettingsField::AnnounceIntervalSecs => {
                Self::AnnounceInterval(parse_secs(field_name, raw)?)
            }
            SettingsField::ScanIntervalSecs => Self::ScanInterval(parse_secs(field_name, raw)?),
            SettingsField::SeederEnabled => Self::SeederEnabled(parse_bool(field_name, raw)?),
            SettingsField::FetchTimeoutSecs => Self::FetchTimeout(parse_secs(field_name, raw)?),
        })
    }

    /// Field this change targets.
    #[must_use]
    pub const fn field(&self) -> SettingsField {
        match self {
            Self::AnnounceUrl(_) => SettingsField::AnnounceUrl,
            Self::FileSizeThresholdMb(_) => SettingsField::FileSizeThresholdMb,
            Self::MaxSeededTorrents(_) => SettingsField::MaxSeededTorrents,
            Self::AnnounceInterval(_) => SettingsField::AnnounceIntervalSecs,
            Self::ScanInterval(_) => SettingsField::ScanIntervalSecs,
            Self::SeederEnabled(_) => SettingsField::SeederEnabled,
            Self::FetchTimeout(_) => SettingsField::FetchTimeoutSecs,
        }
    }

    /// Produce the successor snapshot with this change applied and the revision bumped.
    #[must_use]
    pub fn apply_to(&self, current: &SeederSettings) -> SeederSettings {
        let mut next = current.clone();
        next.revision = current.revision.wrapping_add(1);
        match self {
            Self::AnnounceUrl(url) => next.announce_url.clone_from(url),
            Self::FileSizeThresholdMb(mb) => next.file_size_threshold_mb = Some(*mb),
            Self::MaxSeededTorrents(max) => next.max_seeded_torrents = *max,
            Self::AnnounceInterval(interval) => next.announce_interval = *interval,
            Self::ScanInterval(interval) => next.scan_interval = *interval,
            Self::SeederEnabled(enabled) => next.seeder_enabled = *enabled,
            Self::FetchTimeout(timeout) => next.fetch_timeout = *timeout,
        }
        next
    }
}
