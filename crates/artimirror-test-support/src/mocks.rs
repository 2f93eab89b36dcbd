//! In-memory doubles for the build log, direct fetcher, and engine ports.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use artimirror_torrent_core::{
    BuildLog, Credentials, DirectFetcher, DistributionEngine, FetchError, FetchRequest, SeedHandle,
    TorrentMetadata, TorrentResult,
};
use async_trait::async_trait;
use url::Url;

/// Severity of a recorded build log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `info` line.
    Info,
    /// `warn` line.
    Warn,
    /// Progress block opened.
    ProgressStarted,
    /// Progress block closed.
    ProgressFinished,
}

/// Build log that keeps every line for later assertions.
#[derive(Debug, Default)]
pub struct RecordingBuildLog {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingBuildLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: LogLevel, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }

    /// Every recorded line in order.
    #[must_use]
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether any line at `level` contains `needle`.
    #[must_use]
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|(recorded, line)| *recorded == level && line.contains(needle))
    }
}

impl BuildLog for RecordingBuildLog {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn progress_started(&self, message: &str) {
        self.push(LogLevel::ProgressStarted, message);
    }

    fn progress_finished(&self, message: &str) {
        self.push(LogLevel::ProgressFinished, message);
    }
}

/// Direct fetcher serving canned bodies and logging every request.
///
/// Unknown URLs answer with status 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
}

impl StaticFetcher {
    /// Fetcher with no registered bodies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` as the response for `url`.
    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), body.into());
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `url` was requested at least once.
    #[must_use]
    pub fn requested(&self, url: &str) -> bool {
        self.calls().iter().any(|call| call == url)
    }
}

#[async_trait]
impl DirectFetcher for StaticFetcher {
    async fn get_bytes(
        &self,
        url: &Url,
        _credentials: Option<&Credentials>,
    ) -> Result<Vec<u8>, FetchError> {
        let key = url.to_string();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or(FetchError::Status {
                url: key,
                status: 404,
            })
    }
}

/// Engine wrapper counting fetch and seed calls before delegating.
pub struct CountingEngine {
    inner: Arc<dyn DistributionEngine>,
    fetches: AtomicUsize,
    seeds: AtomicUsize,
}

impl CountingEngine {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn DistributionEngine>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            seeds: AtomicUsize::new(0),
        }
    }

    /// Number of fetch calls observed.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of seed calls observed.
    #[must_use]
    pub fn seed_count(&self) -> usize {
        self.seeds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributionEngine for CountingEngine {
    async fn start(&self, addresses: &[IpAddr], announce_interval: Duration) -> TorrentResult<()> {
        self.inner.start(addresses, announce_interval).await
    }

    async fn stop(&self) -> TorrentResult<()> {
        self.inner.stop().await
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    async fn set_announce_interval(&self, interval: Duration) -> TorrentResult<()> {
        self.inner.set_announce_interval(interval).await
    }

    async fn create_metadata(
        &self,
        file: &Path,
        announce: &str,
        creator: &str,
    ) -> TorrentResult<TorrentMetadata> {
        self.inner.create_metadata(file, announce, creator).await
    }

    async fn seed(&self, metadata: &TorrentMetadata, source: &Path) -> TorrentResult<SeedHandle> {
        self.seeds.fetch_add(1, Ordering::SeqCst);
        self.inner.seed(metadata, source).await
    }

    async fn withdraw(&self, handle: &SeedHandle) -> TorrentResult<()> {
        self.inner.withdraw(handle).await
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> TorrentResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(request).await
    }

    async fn count_reachable_peers(&self, metadata: &TorrentMetadata) -> TorrentResult<usize> {
        self.inner.count_reachable_peers(metadata).await
    }
}
