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

//! Engine-agnostic distribution interfaces and metadata model.
//!
//! # Design
//! - Metadata creation, identity, save, and load live on [`TorrentMetadata`].
//! - Peer transfer sits behind [`DistributionEngine`]; direct retrieval behind
//!   [`DirectFetcher`]; user-visible progress behind [`BuildLog`].

pub mod bencode;
pub mod build_log;
pub mod engine;
pub mod error;
pub mod fetcher;
mod info_hash;
pub mod layout;
pub mod metadata;

pub use build_log::{BuildLog, NullBuildLog};
pub use engine::{DistributionEngine, FetchRequest, SeedHandle, default_work_dir};
pub use error::{TorrentError, TorrentResult};
pub use fetcher::{Credentials, DirectFetcher, FetchError};
pub use info_hash::InfoHash;
pub use metadata::{CREATOR_TAG, PIECE_LENGTH, TorrentMetadata};
