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

//! Server-side half of artifact distribution.
//!
//! The [`LinkStore`] caches which metadata file describes which artifact, the
//! [`DirectorySeeder`] keeps a bounded set of those objects advertised, and
//! the [`ArtifactPublisher`] feeds both from finished builds.

pub mod error;
pub mod link;
pub mod publisher;
mod seeded;
pub mod seeder;

pub use error::{SeederError, SeederResult};
pub use link::{BuildScope, FileLink, LINK_EXTENSION, LinkStore};
pub use publisher::{
    ArtifactOutcome, ArtifactPublisher, ArtifactReport, DEFAULT_PUBLISH_CONCURRENCY,
    PublishArtifact, PublishReport, PublishTarget, collect_artifacts,
};
pub use seeded::SeededEntry;
pub use seeder::{DirectorySeeder, ScanSummary, SeedOutcome, SeederState};
