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

//! Consumer-side artifact transport.
//!
//! [`TransportNegotiator`] decides per build whether peer transport applies;
//! the resulting [`TorrentTransport`] fetches artifacts from peers when enough
//! of them hold the content, and otherwise tells the caller to download
//! directly.

pub mod artifact_url;
pub mod error;
pub mod http;
pub mod manifest;
pub mod negotiator;

pub use artifact_url::{ParsedArtifactUrl, is_manifest_url, real_root};
pub use error::{TransportError, TransportResult};
pub use http::HttpFetcher;
pub use manifest::{IvyManifest, MANIFEST_FILE_NAME, ManifestError};
pub use negotiator::{
    MIN_SEEDERS_COUNT_TO_TRY, ResolveContext, TRANSPORT_NAME, TRANSPORT_PARAMETER, TorrentTransport,
    TransportNegotiator, is_loopback_host,
};
