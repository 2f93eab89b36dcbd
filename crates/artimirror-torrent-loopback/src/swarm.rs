//! Process-wide registry of which loopback node holds which object.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use artimirror_torrent_core::InfoHash;

/// Identifier of one loopback engine within a swarm.
pub type NodeId = u64;

/// Shared registry joining every loopback engine of a process.
///
/// Engines built from clones of the same swarm can fetch from each other.
#[derive(Clone, Default)]
pub struct Swarm {
    inner: Arc<Mutex<SwarmInner>>,
}

#[derive(Default)]
struct SwarmInner {
    next_node: NodeId,
    next_slot: u64,
    holders: HashMap<InfoHash, Vec<Holder>>,
}

#[derive(Clone)]
struct Holder {
    node: NodeId,
    slot: u64,
    source: PathBuf,
}

impl Swarm {
    /// Empty swarm.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SwarmInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register_node(&self) -> NodeId {
        let mut inner = self.lock();
        inner.next_node += 1;
        inner.next_node
    }

    /// Advertise `source` for `info_hash`; a node announcing the same object
    /// twice keeps its original slot.
    pub(crate) fn announce(&self, node: NodeId, info_hash: InfoHash, source: PathBuf) -> u64 {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .holders
            .get(&info_hash)
            .and_then(|holders| holders.iter().find(|holder| holder.node == node))
        {
            return existing.slot;
        }
        inner.next_slot += 1;
        let slot = inner.next_slot;
        inner
            .holders
            .entry(info_hash)
            .or_default()
            .push(Holder { node, slot, source });
        slot
    }

    pub(crate) fn withdraw(&self, info_hash: &InfoHash, slot: u64) -> bool {
        let mut inner = self.lock();
        let Some(holders) = inner.holders.get_mut(info_hash) else {
            return false;
        };
        let before = holders.len();
        holders.retain(|holder| holder.slot != slot);
        let removed = holders.len() != before;
        if holders.is_empty() {
            inner.holders.remove(info_hash);
        }
        removed
    }

    pub(crate) fn withdraw_node(&self, node: NodeId) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        inner.holders.retain(|_, holders| {
            let before = holders.len();
            holders.retain(|holder| holder.node != node);
            removed += before - holders.len();
            !holders.is_empty()
        });
        removed
    }

    /// Source files other nodes advertise for `info_hash`.
    pub(crate) fn sources(&self, info_hash: &InfoHash, excluding: NodeId) -> Vec<PathBuf> {
        self.lock()
            .holders
            .get(info_hash)
            .map(|holders| {
                holders
                    .iter()
                    .filter(|holder| holder.node != excluding)
                    .map(|holder| holder.source.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of nodes advertising `info_hash`.
    #[must_use]
    pub fn seeder_count(&self, info_hash: &InfoHash) -> usize {
        self.lock().holders.get(info_hash).map_or(0, Vec::len)
    }
}
