//! Event payloads emitted by the seeder, publisher, and transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Why an object stopped being advertised to peers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Evicted to make room under the seeded-set capacity.
    Evicted,
    /// Withdrawn because the source file is about to be replaced.
    Replaced,
    /// Artifact or metadata disappeared from disk.
    Vanished,
    /// Seeder shutdown withdrew every entry.
    Shutdown,
}

impl StopReason {
    /// Render the reason as its `snake_case` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::Replaced => "replaced",
            Self::Vanished => "vanished",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Metadata was computed for an artifact.
    MetadataCreated {
        /// Hex content identity of the metadata.
        info_hash: String,
        /// Absolute path of the source artifact.
        artifact: String,
    },
    /// An object joined the seeded set.
    SeedingStarted {
        /// Hex content identity of the metadata.
        info_hash: String,
        /// Absolute path of the source artifact.
        artifact: String,
    },
    /// An object left the seeded set.
    SeedingStopped {
        /// Hex content identity of the metadata.
        info_hash: String,
        /// Absolute path of the source artifact.
        artifact: String,
        /// Why advertisement was withdrawn.
        reason: StopReason,
    },
    /// The consumer path chose direct transfer for a URL.
    TransportFallback {
        /// Requested artifact URL.
        url: String,
        /// Machine-readable fallback reason.
        reason: String,
    },
    /// The consumer path fetched an artifact from peers.
    TransportCompleted {
        /// Requested artifact URL.
        url: String,
        /// Hex content identity of the fetched object.
        info_hash: String,
    },
    /// Live settings were replaced.
    SettingsChanged {
        /// Human-readable description of the change.
        description: String,
    },
    /// Component health changed.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for subscribers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MetadataCreated { .. } => "metadata_created",
            Self::SeedingStarted { .. } => "seeding_started",
            Self::SeedingStopped { .. } => "seeding_stopped",
            Self::TransportFallback { .. } => "transport_fallback",
            Self::TransportCompleted { .. } => "transport_completed",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Wrapped payload.
    pub event: Event,
}
