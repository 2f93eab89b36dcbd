#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Live configuration for the artimirror seeder and transport.
//!
//! # Design
//! - Settings are published as immutable snapshots through a watch channel.
//! - Changes arrive as `(field, value)` notifications and are validated before
//!   a new snapshot is built.
//! - Initial values come from `ARTIMIRROR_*` environment variables.

pub mod error;
pub mod loader;
pub mod model;
pub mod service;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, env_key, fetch_timeout_or_default};
pub use model::{
    BYTES_PER_MB, DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_FETCH_TIMEOUT, DEFAULT_SCAN_INTERVAL,
    SeederSettings, SettingsChange, SettingsField,
};
pub use service::{SettingsStore, SettingsWatcher};
