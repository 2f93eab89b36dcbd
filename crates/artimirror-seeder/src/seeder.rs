//! Directory seeder: keeps the objects named by link entries advertised.
//!
//! # Design
//! - Lifecycle is a small state machine (`Stopped -> Starting -> Running ->
//!   Stopping -> Stopped`); start and stop serialise on one async lock.
//! - The seeded set lives behind a `tokio::sync::Mutex` so capacity checks,
//!   eviction, and inserts happen in one critical section. Engine calls run
//!   outside it; a new object is advertised before anything is evicted.
//! - A background task re-scans the storage root on the live scan interval.
//!   Metadata paths already seeded (or evicted) during this run are remembered
//!   and not re-seeded by later scans.
//! - Scan failures on individual link entries are counted and retried on the
//!   next scan; repeated failures mark the component degraded on the event bus.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use artimirror_config::SeederSettings;
use artimirror_events::{Event, EventBus, StopReason};
use artimirror_telemetry::Metrics;
use artimirror_torrent_core::{DistributionEngine, InfoHash, SeedHandle, TorrentMetadata};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SeederError, SeederResult};
use crate::link::LinkStore;
use crate::seeded::{SeededEntry, SeededSet};

const HEALTH_COMPONENT: &str = "directory_seeder";

/// Lifecycle state of the [`DirectorySeeder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeederState {
    /// Not advertising anything.
    Stopped,
    /// Engine start in progress.
    Starting,
    /// Scan loop active.
    Running,
    /// Shutdown in progress.
    Stopping,
}

/// Result of a successful [`DirectorySeeder::seed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The object joined the seeded set.
    Started(InfoHash),
    /// The object was already being advertised.
    AlreadySeeded(InfoHash),
}

impl SeedOutcome {
    /// Content identity of the seeded object.
    #[must_use]
    pub const fn info_hash(&self) -> InfoHash {
        match self {
            Self::Started(hash) | Self::AlreadySeeded(hash) => *hash,
        }
    }
}

/// Counters describing one pass over the storage root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Link entries found.
    pub links: usize,
    /// Objects that started seeding during the pass.
    pub seeded: usize,
    /// Entries skipped after validation failed.
    pub skipped: usize,
    /// Link entries garbage-collected.
    pub removed: usize,
    /// Entries that failed with an I/O error and will be retried.
    pub errors: usize,
}

#[derive(Debug, Clone)]
struct RuntimeParams {
    capacity: Option<usize>,
    threshold_bytes: Option<u64>,
    scan_interval: Duration,
    announce_interval: Duration,
    announce_url: Option<Url>,
}

impl RuntimeParams {
    fn from_settings(settings: &SeederSettings) -> Self {
        Self {
            capacity: settings.max_seeded_torrents.map(|max| max.max(1)),
            threshold_bytes: settings.threshold_bytes(),
            scan_interval: settings.scan_interval,
            announce_interval: settings.announce_interval,
            announce_url: settings.announce_url.clone(),
        }
    }
}

struct ScanTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct SeederInner {
    engine: Arc<dyn DistributionEngine>,
    links: LinkStore,
    events: EventBus,
    metrics: Metrics,
    params: Mutex<RuntimeParams>,
    state: Mutex<SeederState>,
    lifecycle: tokio::sync::Mutex<Option<ScanTask>>,
    seeded: tokio::sync::Mutex<SeededSet>,
    known: Mutex<HashSet<PathBuf>>,
    degraded: Mutex<bool>,
}

/// Watches the storage root and advertises every linked object.
#[derive(Clone)]
pub struct DirectorySeeder {
    inner: Arc<SeederInner>,
}

impl DirectorySeeder {
    /// Build a stopped seeder over `links`.
    #[must_use]
    pub fn new(
        engine: Arc<dyn DistributionEngine>,
        links: LinkStore,
        settings: &SeederSettings,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(SeederInner {
                engine,
                links,
                events,
                metrics,
                params: Mutex::new(RuntimeParams::from_settings(settings)),
                state: Mutex::new(SeederState::Stopped),
                lifecycle: tokio::sync::Mutex::new(None),
                seeded: tokio::sync::Mutex::new(SeededSet::default()),
                known: Mutex::new(HashSet::new()),
                degraded: Mutex::new(false),
            }),
        }
    }

    /// Start the engine on `addresses` and launch the scan loop.
    ///
    /// Calling start while already starting or running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::NoAddresses`] for an empty address list and
    /// [`SeederError::Engine`] when the engine fails to start. The seeder stays
    /// stopped in both cases so the caller may retry.
    pub async fn start(
        &self,
        addresses: &[IpAddr],
        announce_url: Option<&Url>,
        scan_interval: Duration,
        announce_interval: Duration,
    ) -> SeederResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if matches!(self.state(), SeederState::Starting | SeederState::Running) {
            debug!("directory seeder already running");
            return Ok(());
        }
        self.set_state(SeederState::Starting);

        if addresses.is_empty() {
            warn!("no local addresses available; directory seeder not started");
            self.set_state(SeederState::Stopped);
            return Err(SeederError::NoAddresses);
        }

        {
            let mut params = self.params_guard();
            params.announce_url = announce_url.cloned();
            params.scan_interval = scan_interval;
            params.announce_interval = announce_interval;
        }

        if let Err(err) = self.inner.engine.start(addresses, announce_interval).await {
            warn!(error = %err, "distribution engine failed to start");
            self.set_state(SeederState::Stopped);
            self.mark_degraded("engine start failed");
            return Err(SeederError::engine("seeder.start", err));
        }

        self.set_state(SeederState::Running);
        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(self.clone().scan_loop(receiver));
        *lifecycle = Some(ScanTask { shutdown, handle });
        drop(lifecycle);

        info!(
            addresses = ?addresses,
            storage_root = %self.inner.links.storage_root().display(),
            scan_interval_secs = scan_interval.as_secs(),
            "directory seeder started"
        );
        Ok(())
    }

    /// Stop the scan loop, withdraw every seeded object, and release the engine.
    ///
    /// Safe to call when already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::Engine`] when the engine fails to shut down; the
    /// seeder is stopped regardless.
    pub async fn stop(&self) -> SeederResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let task = lifecycle.take();
        if task.is_none() && self.state() == SeederState::Stopped {
            return Ok(());
        }
        self.set_state(SeederState::Stopping);

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(err) = task.handle.await {
                warn!(error = %err, "scan loop terminated abnormally");
            }
        }

        let drained = self.inner.seeded.lock().await.drain();
        let withdrawn = drained.len();
        self.withdraw_entries(drained, StopReason::Shutdown).await;
        self.inner.metrics.set_seeded_torrents(0);
        self.known_guard().clear();

        let stopped = self.inner.engine.stop().await;
        self.set_state(SeederState::Stopped);
        drop(lifecycle);
        info!(withdrawn, "directory seeder stopped");
        stopped.map_err(|err| SeederError::engine("seeder.stop", err))
    }

    async fn scan_loop(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.scan_now().await {
                Ok(summary) if summary.seeded > 0 || summary.removed > 0 => {
                    debug!(
                        links = summary.links,
                        seeded = summary.seeded,
                        removed = summary.removed,
                        "directory scan finished"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "directory scan failed"),
            }
            let interval = self.params_guard().scan_interval;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Run one pass over the storage root.
    ///
    /// Link entries whose artifact or metadata vanished are removed and any
    /// matching seeded object withdrawn. Entries not yet seeded during this
    /// run are seeded.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage root cannot be enumerated.
    pub async fn scan_now(&self) -> SeederResult<ScanSummary> {
        let vanished = self
            .inner
            .seeded
            .lock()
            .await
            .remove_where(|entry| !entry.artifact_path.is_file() || !entry.metadata_path.is_file());
        if !vanished.is_empty() {
            self.forget(vanished.iter().map(|entry| entry.metadata_path.as_path()));
            self.withdraw_entries(vanished, StopReason::Vanished).await;
            self.refresh_gauge().await;
        }

        let links = self.inner.links.clone();
        let entries = tokio::task::spawn_blocking(move || links.entries())
            .await
            .map_err(|source| SeederError::Task {
                operation: "scan.entries",
                source,
            })??;

        let mut summary = ScanSummary {
            links: entries.len(),
            ..ScanSummary::default()
        };
        for link_path in entries {
            if !self.is_running() {
                break;
            }
            self.scan_entry(&link_path, &mut summary).await;
        }

        if summary.errors > 0 {
            self.mark_degraded(&format!("{} link entries failed to seed", summary.errors));
        } else {
            self.mark_recovered();
        }
        Ok(summary)
    }

    async fn scan_entry(&self, link_path: &Path, summary: &mut ScanSummary) {
        let link = match self.inner.links.read(link_path) {
            Ok(link) => link,
            Err(SeederError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return;
            }
            Err(SeederError::Json { .. }) => {
                warn!(link = %link_path.display(), "removing unreadable link entry");
                if self.inner.links.remove(link_path).is_ok() {
                    summary.removed += 1;
                }
                return;
            }
            Err(err) => {
                warn!(link = %link_path.display(), error = %err, "failed to read link entry");
                self.inner.metrics.inc_scan_error();
                summary.errors += 1;
                return;
            }
        };

        if !link.artifact.is_file() || !link.metadata.is_file() {
            debug!(link = %link_path.display(), "garbage-collecting link entry");
            if let Err(err) = self.inner.links.remove(link_path) {
                warn!(link = %link_path.display(), error = %err, "failed to remove link entry");
                self.inner.metrics.inc_scan_error();
                summary.errors += 1;
                return;
            }
            summary.removed += 1;
            self.forget(std::iter::once(link.metadata.as_path()));
            let removed = self.inner.seeded.lock().await.remove_by_path(&link.artifact);
            if !removed.is_empty() {
                self.withdraw_entries(removed, StopReason::Vanished).await;
                self.refresh_gauge().await;
            }
            return;
        }

        if self.knows(&link.metadata) {
            return;
        }

        match self.seed(&link.metadata, &link.artifact).await {
            Ok(SeedOutcome::Started(_)) => summary.seeded += 1,
            Ok(SeedOutcome::AlreadySeeded(_)) | Err(SeederError::NotRunning { .. }) => {}
            Err(SeederError::SizeMismatch {
                artifact,
                declared,
                actual,
            }) => {
                warn!(
                    artifact = %artifact.display(),
                    declared,
                    actual,
                    "metadata size does not match artifact; not seeding"
                );
                self.remember(&link.metadata);
                summary.skipped += 1;
            }
            Err(err) => {
                warn!(
                    link = %link_path.display(),
                    error = %err,
                    "failed to seed linked artifact"
                );
                self.inner.metrics.inc_scan_error();
                summary.errors += 1;
            }
        }
    }

    /// Advertise `artifact_file` as the content described by `metadata_file`.
    ///
    /// Seeding an identity already in the set is a no-op. When the set is at
    /// capacity the oldest entries are evicted first.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::NotRunning`] before start, [`SeederError::SizeMismatch`]
    /// when the artifact size differs from the metadata, and I/O or engine
    /// errors otherwise.
    pub async fn seed(&self, metadata_file: &Path, artifact_file: &Path) -> SeederResult<SeedOutcome> {
        self.ensure_running("seed")?;
        let metadata = load_metadata(metadata_file).await?;
        let actual = tokio::fs::metadata(artifact_file)
            .await
            .map_err(|err| SeederError::io("seed.stat", artifact_file, err))?
            .len();
        if actual != metadata.length() {
            return Err(SeederError::SizeMismatch {
                artifact: artifact_file.to_path_buf(),
                declared: metadata.length(),
                actual,
            });
        }

        let info_hash = metadata.info_hash();
        if self.inner.seeded.lock().await.contains(&info_hash) {
            self.remember(metadata_file);
            return Ok(SeedOutcome::AlreadySeeded(info_hash));
        }

        let handle = self
            .inner
            .engine
            .seed(&metadata, artifact_file)
            .await
            .map_err(|err| SeederError::engine("seed.advertise", err))?;

        let capacity = self.params_guard().capacity;
        let mut seeded = self.inner.seeded.lock().await;
        if seeded.contains(&info_hash) {
            drop(seeded);
            self.withdraw_duplicate(&handle).await;
            self.remember(metadata_file);
            return Ok(SeedOutcome::AlreadySeeded(info_hash));
        }
        let evicted = seeded.make_room(capacity);
        seeded.insert(SeededEntry {
            info_hash,
            metadata_path: metadata_file.to_path_buf(),
            artifact_path: artifact_file.to_path_buf(),
            seeded_at: Utc::now(),
            handle,
        });
        let count = seeded.len();
        drop(seeded);

        self.inner.metrics.set_seeded_torrents(count);
        self.withdraw_entries(evicted, StopReason::Evicted).await;
        self.remember(metadata_file);
        info!(
            info_hash = %info_hash,
            artifact = %artifact_file.display(),
            "seeding started"
        );
        self.publish_event(Event::SeedingStarted {
            info_hash: info_hash.to_hex(),
            artifact: artifact_file.display().to_string(),
        });
        Ok(SeedOutcome::Started(info_hash))
    }

    /// Withdraw every seeded object whose source is `artifact_file`.
    ///
    /// Returns the number of objects withdrawn.
    pub async fn stop_seeding_by_path(&self, artifact_file: &Path) -> usize {
        let removed = self.inner.seeded.lock().await.remove_by_path(artifact_file);
        let count = removed.len();
        if count > 0 {
            self.forget(removed.iter().map(|entry| entry.metadata_path.as_path()));
            self.withdraw_entries(removed, StopReason::Replaced).await;
            self.refresh_gauge().await;
        }
        count
    }

    /// Whether `file` is large enough to be worth creating metadata for.
    ///
    /// Unknown thresholds, directories, and unreadable paths yield `false`.
    #[must_use]
    pub fn should_create_metadata_for(&self, file: &Path) -> bool {
        let threshold = self.params_guard().threshold_bytes;
        threshold.is_some_and(|threshold| meets_threshold(file, threshold))
    }

    /// Propagate a new settings snapshot.
    ///
    /// A smaller capacity evicts the oldest entries immediately; a new
    /// announce interval is forwarded to a running engine.
    ///
    /// # Errors
    ///
    /// Returns [`SeederError::Engine`] when the engine rejects the new
    /// announce interval.
    pub async fn apply_settings(&self, settings: &SeederSettings) -> SeederResult<()> {
        let next = RuntimeParams::from_settings(settings);
        let previous = std::mem::replace(&mut *self.params_guard(), next.clone());

        if let Some(capacity) = next.capacity {
            let evicted = self.inner.seeded.lock().await.shrink_to(capacity);
            if !evicted.is_empty() {
                info!(capacity, evicted = evicted.len(), "seeded-set capacity reduced");
                self.withdraw_entries(evicted, StopReason::Evicted).await;
                self.refresh_gauge().await;
            }
        }

        if previous.announce_interval != next.announce_interval && self.inner.engine.is_running() {
            self.inner
                .engine
                .set_announce_interval(next.announce_interval)
                .await
                .map_err(|err| SeederError::engine("seeder.announce_interval", err))?;
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SeederState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the scan loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SeederState::Running
    }

    /// Number of objects currently advertised.
    pub async fn seeded_count(&self) -> usize {
        self.inner.seeded.lock().await.len()
    }

    /// Snapshot of the seeded set, oldest first.
    pub async fn seeded(&self) -> Vec<SeededEntry> {
        self.inner.seeded.lock().await.snapshot()
    }

    /// Whether `info_hash` is currently advertised.
    pub async fn is_seeding(&self, info_hash: &InfoHash) -> bool {
        self.inner.seeded.lock().await.contains(info_hash)
    }

    /// Link store the seeder scans.
    #[must_use]
    pub fn links(&self) -> &LinkStore {
        &self.inner.links
    }

    /// Engine the seeder advertises through.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn DistributionEngine> {
        &self.inner.engine
    }

    /// Announce endpoint passed to the most recent start or settings update.
    #[must_use]
    pub fn announce_url(&self) -> Option<Url> {
        self.params_guard().announce_url.clone()
    }

    pub(crate) fn record_metadata_created(&self, info_hash: &InfoHash, artifact: &Path) {
        self.inner.metrics.inc_metadata_created();
        info!(info_hash = %info_hash, artifact = %artifact.display(), "metadata created");
        self.publish_event(Event::MetadataCreated {
            info_hash: info_hash.to_hex(),
            artifact: artifact.display().to_string(),
        });
    }

    async fn withdraw_entries(&self, entries: Vec<SeededEntry>, reason: StopReason) {
        for entry in entries {
            if let Err(err) = self.inner.engine.withdraw(&entry.handle).await {
                warn!(
                    info_hash = %entry.info_hash,
                    error = %err,
                    "failed to withdraw advertisement"
                );
            }
            if reason == StopReason::Evicted {
                self.inner.metrics.inc_seed_eviction();
            }
            debug!(
                info_hash = %entry.info_hash,
                artifact = %entry.artifact_path.display(),
                reason = reason.as_str(),
                "seeding stopped"
            );
            self.publish_event(Event::SeedingStopped {
                info_hash: entry.info_hash.to_hex(),
                artifact: entry.artifact_path.display().to_string(),
                reason,
            });
        }
    }

    async fn withdraw_duplicate(&self, handle: &SeedHandle) {
        if let Err(err) = self.inner.engine.withdraw(handle).await {
            warn!(
                info_hash = %handle.info_hash,
                error = %err,
                "failed to withdraw duplicate advertisement"
            );
        }
    }

    async fn refresh_gauge(&self) {
        let count = self.inner.seeded.lock().await.len();
        self.inner.metrics.set_seeded_torrents(count);
    }

    fn ensure_running(&self, operation: &'static str) -> SeederResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SeederError::NotRunning { operation })
        }
    }

    fn set_state(&self, next: SeederState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn params_guard(&self) -> MutexGuard<'_, RuntimeParams> {
        self.inner.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn known_guard(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.inner.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn knows(&self, metadata: &Path) -> bool {
        self.known_guard().contains(metadata)
    }

    fn remember(&self, metadata: &Path) {
        self.known_guard().insert(metadata.to_path_buf());
    }

    fn forget<'a>(&self, metadata: impl Iterator<Item = &'a Path>) {
        let mut known = self.known_guard();
        for path in metadata {
            known.remove(path);
        }
    }

    fn mark_degraded(&self, detail: &str) {
        let mut guard = self.inner.degraded.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            drop(guard);
            warn!(component = HEALTH_COMPONENT, detail, "directory seeder still degraded");
        } else {
            *guard = true;
            drop(guard);
            warn!(component = HEALTH_COMPONENT, detail, "directory seeder degraded");
            self.publish_event(Event::HealthChanged {
                degraded: vec![HEALTH_COMPONENT.to_string()],
            });
        }
    }

    fn mark_recovered(&self) {
        let mut guard = self.inner.degraded.lock().unwrap_or_else(PoisonError::into_inner);
        if std::mem::take(&mut *guard) {
            drop(guard);
            self.publish_event(Event::HealthChanged { degraded: vec![] });
            info!(component = HEALTH_COMPONENT, "directory seeder recovered");
        }
    }

    fn publish_event(&self, event: Event) {
        if let Err(error) = self.inner.events.publish(event) {
            debug!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                "event published without subscribers"
            );
        }
    }
}

/// Whether `file` is a regular file of at least `threshold` bytes.
///
/// The only size gate for metadata creation: [`DirectorySeeder::should_create_metadata_for`]
/// applies it with the live threshold, the producer with its batch snapshot.
pub(crate) fn meets_threshold(file: &Path, threshold: u64) -> bool {
    std::fs::metadata(file).is_ok_and(|meta| !meta.is_dir() && meta.len() >= threshold)
}

pub(crate) async fn load_metadata(path: &Path) -> SeederResult<TorrentMetadata> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || TorrentMetadata::load(&owned))
        .await
        .map_err(|source| SeederError::Task {
            operation: "metadata.load",
            source,
        })?
        .map_err(|err| SeederError::engine("metadata.load", err))
}
