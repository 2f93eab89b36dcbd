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

//! In-process distribution engine.
//!
//! Every [`LoopbackEngine`] built from the same [`Swarm`] acts as one peer:
//! seeding registers a source file in the swarm, and fetching copies verified
//! pieces from the files other peers advertise. Used for single-host
//! deployments and as the engine behind integration tests.

pub mod swarm;
mod transfer;

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use artimirror_torrent_core::{
    DistributionEngine, FetchRequest, InfoHash, SeedHandle, TorrentError, TorrentMetadata,
    TorrentResult,
};
use async_trait::async_trait;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info};

pub use swarm::{NodeId, Swarm};

use crate::transfer::Transfer;

const PEER_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Peer engine backed by an in-process [`Swarm`].
pub struct LoopbackEngine {
    swarm: Swarm,
    node: NodeId,
    running: Arc<AtomicBool>,
    piece_delay: Duration,
    state: Mutex<EngineState>,
}

#[derive(Default)]
struct EngineState {
    addresses: Vec<IpAddr>,
    announce_interval: Duration,
    slots: HashMap<u64, InfoHash>,
}

impl LoopbackEngine {
    /// Join `swarm` as a new peer.
    #[must_use]
    pub fn new(swarm: Swarm) -> Self {
        Self::with_piece_delay(swarm, Duration::ZERO)
    }

    /// Join `swarm` as a peer that pauses after each transferred piece.
    #[must_use]
    pub fn with_piece_delay(swarm: Swarm, piece_delay: Duration) -> Self {
        let node = swarm.register_node();
        Self {
            swarm,
            node,
            running: Arc::new(AtomicBool::new(false)),
            piece_delay,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Identifier of this peer within its swarm.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node
    }

    /// Swarm this peer belongs to.
    #[must_use]
    pub const fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// Addresses passed to the most recent successful start.
    #[must_use]
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.state().addresses.clone()
    }

    /// Announce interval currently in effect.
    #[must_use]
    pub fn announce_interval(&self) -> Duration {
        self.state().announce_interval
    }

    /// Number of objects this peer currently advertises.
    #[must_use]
    pub fn advertised_count(&self) -> usize {
        self.state().slots.len()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self, operation: &'static str) -> TorrentResult<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TorrentError::NotRunning { operation })
        }
    }

    async fn wait_for_peers(
        &self,
        info_hash: &InfoHash,
        required: usize,
        deadline: Instant,
    ) -> TorrentResult<Vec<std::path::PathBuf>> {
        loop {
            let sources = self.swarm.sources(info_hash, self.node);
            if sources.len() >= required {
                return Ok(sources);
            }
            if Instant::now() >= deadline {
                return Err(TorrentError::NotEnoughPeers {
                    required,
                    found: sources.len(),
                });
            }
            sleep(PEER_POLL_INTERVAL).await;
            if !self.running.load(Ordering::SeqCst) {
                return Err(TorrentError::Interrupted { operation: "fetch" });
            }
        }
    }
}

#[async_trait]
impl DistributionEngine for LoopbackEngine {
    async fn start(&self, addresses: &[IpAddr], announce_interval: Duration) -> TorrentResult<()> {
        if addresses.is_empty() {
            return Err(TorrentError::InvalidRequest {
                operation: "start",
                reason: "no_addresses",
            });
        }
        {
            let mut state = self.state();
            state.addresses = addresses.to_vec();
            state.announce_interval = announce_interval;
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(node = self.node, addresses = ?addresses, "loopback engine started");
        }
        Ok(())
    }

    async fn stop(&self) -> TorrentResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let withdrawn = self.swarm.withdraw_node(self.node);
        self.state().slots.clear();
        info!(node = self.node, withdrawn, "loopback engine stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn set_announce_interval(&self, interval: Duration) -> TorrentResult<()> {
        self.state().announce_interval = interval;
        Ok(())
    }

    async fn seed(&self, metadata: &TorrentMetadata, source: &Path) -> TorrentResult<SeedHandle> {
        self.ensure_running("seed")?;
        let actual = tokio::fs::metadata(source)
            .await
            .map_err(|err| TorrentError::io("seed.stat", source, err))?
            .len();
        if actual != metadata.length() {
            return Err(TorrentError::InvalidRequest {
                operation: "seed",
                reason: "size_mismatch",
            });
        }
        let info_hash = metadata.info_hash();
        let slot = self
            .swarm
            .announce(self.node, info_hash, source.to_path_buf());
        self.state().slots.insert(slot, info_hash);
        debug!(node = self.node, info_hash = %info_hash, slot, "advertising object");
        Ok(SeedHandle { info_hash, slot })
    }

    async fn withdraw(&self, handle: &SeedHandle) -> TorrentResult<()> {
        self.state().slots.remove(&handle.slot);
        if self.swarm.withdraw(&handle.info_hash, handle.slot) {
            debug!(node = self.node, info_hash = %handle.info_hash, "withdrew object");
        }
        Ok(())
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> TorrentResult<()> {
        self.ensure_running("fetch")?;
        let info_hash = request.metadata.info_hash();
        let deadline = Instant::now() + request.timeout;
        let sources = self
            .wait_for_peers(&info_hash, request.min_peers.max(1), deadline)
            .await?;
        debug!(
            node = self.node,
            info_hash = %info_hash,
            peers = sources.len(),
            "fetching from peers"
        );

        let transfer = Transfer {
            metadata: request.metadata,
            sources,
            work_dir: request.work_dir,
            target: request.target,
            running: Arc::clone(&self.running),
            piece_delay: self.piece_delay,
        };
        timeout_at(deadline, transfer.run())
            .await
            .map_err(|_| TorrentError::Timeout {
                operation: "fetch",
                limit: request.timeout,
            })?
    }

    async fn count_reachable_peers(&self, metadata: &TorrentMetadata) -> TorrentResult<usize> {
        Ok(self.swarm.sources(&metadata.info_hash(), self.node).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: [IpAddr; 1] = [IpAddr::V4(Ipv4Addr::LOCALHOST)];

    #[tokio::test]
    async fn start_requires_addresses() {
        let engine = LoopbackEngine::new(Swarm::new());
        let result = engine.start(&[], Duration::from_secs(60)).await;
        assert!(matches!(
            result,
            Err(TorrentError::InvalidRequest {
                reason: "no_addresses",
                ..
            })
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn seed_requires_running_engine() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"payload")?;
        let metadata = TorrentMetadata::create(&path, "http://t/announce", "artimirror")?;

        let engine = LoopbackEngine::new(Swarm::new());
        assert!(matches!(
            engine.seed(&metadata, &path).await,
            Err(TorrentError::NotRunning { .. })
        ));

        engine.start(&LOCAL, Duration::from_secs(5)).await?;
        engine.set_announce_interval(Duration::from_secs(9)).await?;
        assert_eq!(engine.announce_interval(), Duration::from_secs(9));
        let handle = engine.seed(&metadata, &path).await?;
        assert_eq!(engine.swarm().seeder_count(&handle.info_hash), 1);

        engine.stop().await?;
        assert_eq!(engine.swarm().seeder_count(&handle.info_hash), 0);
        assert_eq!(engine.advertised_count(), 0);
        Ok(())
    }
}
