//! Bounded, insertion-ordered record of objects currently advertised.

use std::path::{Path, PathBuf};

use artimirror_torrent_core::{InfoHash, SeedHandle};
use chrono::{DateTime, Utc};

/// One advertised object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededEntry {
    /// Content identity of the metadata.
    pub info_hash: InfoHash,
    /// Metadata file the entry was loaded from.
    pub metadata_path: PathBuf,
    /// Artifact served to peers.
    pub artifact_path: PathBuf,
    /// When advertisement began.
    pub seeded_at: DateTime<Utc>,
    /// Engine handle used to withdraw advertisement.
    pub handle: SeedHandle,
}

/// Seeded objects ordered by seed time, oldest first.
///
/// Callers hold the set behind one lock so the capacity check, eviction and
/// insert happen together.
#[derive(Debug, Default)]
pub(crate) struct SeededSet {
    entries: Vec<SeededEntry>,
}

impl SeededSet {
    pub(crate) fn contains(&self, info_hash: &InfoHash) -> bool {
        self.entries.iter().any(|entry| &entry.info_hash == info_hash)
    }

    /// Remove the oldest entries until one more fits under `capacity`.
    pub(crate) fn make_room(&mut self, capacity: Option<usize>) -> Vec<SeededEntry> {
        match capacity {
            Some(max) => self.shrink_to(max.saturating_sub(1)),
            None => Vec::new(),
        }
    }

    /// Remove the oldest entries until at most `max` remain.
    pub(crate) fn shrink_to(&mut self, max: usize) -> Vec<SeededEntry> {
        let excess = self.entries.len().saturating_sub(max);
        self.entries.drain(..excess).collect()
    }

    pub(crate) fn insert(&mut self, entry: SeededEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn remove_by_path(&mut self, artifact: &Path) -> Vec<SeededEntry> {
        self.remove_where(|entry| entry.artifact_path == artifact)
    }

    pub(crate) fn remove_where(
        &mut self,
        mut predicate: impl FnMut(&SeededEntry) -> bool,
    ) -> Vec<SeededEntry> {
        let (removed, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| predicate(entry));
        self.entries = kept;
        removed
    }

    pub(crate) fn drain(&mut self) -> Vec<SeededEntry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn snapshot(&self) -> Vec<SeededEntry> {
        self.entries.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
