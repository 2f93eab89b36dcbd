//! Distribution engine trait implemented by peer-to-peer adapters.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{TorrentError, TorrentResult};
use crate::info_hash::InfoHash;
use crate::metadata::TorrentMetadata;

/// Opaque handle returned when an object starts being advertised.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeedHandle {
    /// Content identity being advertised.
    pub info_hash: InfoHash,
    /// Engine-assigned advertisement identifier.
    pub slot: u64,
}

/// Parameters of a single peer fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    /// Metadata describing the requested object.
    pub metadata: &'a TorrentMetadata,
    /// Final location of the downloaded content.
    pub target: &'a Path,
    /// Scratch directory for partial data.
    pub work_dir: &'a Path,
    /// Wall-clock bound on the whole transfer.
    pub timeout: Duration,
    /// Minimum number of other peers required before attempting the transfer.
    pub min_peers: usize,
}

/// Peer-to-peer capability used by the seeder and the consumer transport.
#[async_trait]
pub trait DistributionEngine: Send + Sync {
    /// Open listening and advertising on the given local addresses.
    async fn start(&self, addresses: &[IpAddr], announce_interval: Duration) -> TorrentResult<()>;

    /// Withdraw every advertisement and release engine resources.
    async fn stop(&self) -> TorrentResult<()>;

    /// Whether [`DistributionEngine::start`] has succeeded and no stop followed.
    fn is_running(&self) -> bool;

    /// Change how often the engine announces to the tracker.
    async fn set_announce_interval(&self, interval: Duration) -> TorrentResult<()> {
        let _ = interval;
        Ok(())
    }

    /// Hash `file` into new metadata; runs the hashing off the async runtime.
    async fn create_metadata(
        &self,
        file: &Path,
        announce: &str,
        creator: &str,
    ) -> TorrentResult<TorrentMetadata> {
        let file = file.to_path_buf();
        let announce = announce.to_string();
        let creator = creator.to_string();
        tokio::task::spawn_blocking(move || TorrentMetadata::create(&file, &announce, &creator))
            .await
            .map_err(|err| TorrentError::Internal {
                operation: "metadata.create",
                source: Box::new(err),
            })?
    }

    /// Begin advertising `source` as the content described by `metadata`.
    async fn seed(&self, metadata: &TorrentMetadata, source: &Path) -> TorrentResult<SeedHandle>;

    /// Stop advertising a previously seeded object.
    async fn withdraw(&self, handle: &SeedHandle) -> TorrentResult<()>;

    /// Download the object described by the request from peers.
    async fn fetch(&self, request: FetchRequest<'_>) -> TorrentResult<()>;

    /// Number of other peers currently able to serve the object.
    async fn count_reachable_peers(&self, metadata: &TorrentMetadata) -> TorrentResult<usize>;
}

/// Default scratch directory for a fetch targeting `target`.
#[must_use]
pub fn default_work_dir(target: &Path) -> PathBuf {
    target
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
