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

//! Artimirror host wiring.
//!
//! Layout: `lifecycle.rs` (host callbacks), `host.rs` (server/agent host),
//! `bootstrap.rs` (environment loading and the binary boot sequence).

/// Self-address discovery.
pub mod addresses;
/// Host bootstrap and environment loading.
pub mod bootstrap;
/// Host-level errors.
pub mod error;
/// Mirror host implementing the lifecycle port.
pub mod host;
/// Host lifecycle port.
pub mod lifecycle;

pub use addresses::self_addresses;
pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use host::{HostConfig, HostRole, MirrorHost};
pub use lifecycle::{BuildRef, HostLifecycle};
