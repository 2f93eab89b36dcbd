//! Mirror host wiring for the server and agent roles.
//!
//! # Design
//! - One [`MirrorHost`] owns the seeder, the producer path and the consumer
//!   negotiator of a process, all sharing one settings store.
//! - Setting changes are applied by a watch task spawned when the host starts.
//!   The seeder on/off switch only takes effect once the host has started.
//! - Seeder start failures are logged and reported as degraded health; the
//!   host keeps running so direct transfers still work.
//! - A server publishes metadata and link entries for every finished build;
//!   the enabled flag only decides whether they are seeded right away.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use artimirror_config::{SeederSettings, SettingsStore, SettingsWatcher};
use artimirror_events::{Event, EventBus};
use artimirror_seeder::{
    ArtifactPublisher, DirectorySeeder, LinkStore, PublishArtifact, PublishReport, PublishTarget,
    collect_artifacts,
};
use artimirror_telemetry::{Metrics, TracingBuildLog};
use artimirror_torrent_core::DistributionEngine;
use artimirror_transport::{ResolveContext, TorrentTransport, TransportNegotiator};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::addresses::self_addresses;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{BuildRef, HostLifecycle};

const SEEDER_HEALTH_COMPONENT: &str = "directory_seeder";

/// Which side of the artifact exchange a host plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRole {
    /// Publishes every finished build's artifact directory.
    Server,
    /// Publishes explicit files handed over during a build.
    Agent,
}

/// Static host parameters.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Role of the host.
    pub role: HostRole,
    /// Root of the link store.
    pub storage_root: PathBuf,
    /// Fixed advertise addresses; discovered at start when `None`.
    pub addresses: Option<Vec<IpAddr>>,
}

impl HostConfig {
    /// Config discovering its own addresses.
    #[must_use]
    pub fn new(role: HostRole, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            role,
            storage_root: storage_root.into(),
            addresses: None,
        }
    }

    /// Advertise on `addresses` instead of discovering them.
    #[must_use]
    pub fn with_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.addresses = Some(addresses);
        self
    }
}

struct HostCore {
    settings: SettingsStore,
    seeder: DirectorySeeder,
    events: EventBus,
    addresses: Option<Vec<IpAddr>>,
    started: AtomicBool,
    degraded: Mutex<bool>,
}

impl HostCore {
    async fn start_seeder(&self) {
        let settings = self.settings.snapshot();
        let addresses = self.addresses.clone().unwrap_or_else(self_addresses);
        match self
            .seeder
            .start(
                &addresses,
                settings.announce_url.as_ref(),
                settings.scan_interval,
                settings.announce_interval,
            )
            .await
        {
            Ok(()) => {
                info!(addresses = addresses.len(), "directory seeder started");
                self.set_degraded(false);
            }
            Err(err) => {
                error!(error = %err, "failed to start directory seeder");
                self.set_degraded(true);
            }
        }
    }

    async fn stop_seeder(&self) {
        if let Err(err) = self.seeder.stop().await {
            warn!(error = %err, "directory seeder stop failed");
        }
    }

    async fn apply_snapshot(&self, snapshot: &SeederSettings) {
        if let Err(err) = self.seeder.apply_settings(snapshot).await {
            warn!(
                error = %err,
                revision = snapshot.revision,
                "failed to apply settings to the seeder"
            );
        }
        if self.started.load(Ordering::SeqCst) {
            match (snapshot.seeder_enabled, self.seeder.is_running()) {
                (true, false) => self.start_seeder().await,
                (false, true) => self.stop_seeder().await,
                _ => {}
            }
        }
        publish_event(
            &self.events,
            Event::SettingsChanged {
                description: format!("settings revision {} applied", snapshot.revision),
            },
        );
        debug!(revision = snapshot.revision, "applied settings snapshot");
    }

    fn set_degraded(&self, degraded: bool) {
        let mut current = self.degraded.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == degraded {
            return;
        }
        *current = degraded;
        let components = if degraded {
            vec![SEEDER_HEALTH_COMPONENT.to_string()]
        } else {
            Vec::new()
        };
        publish_event(&self.events, Event::HealthChanged { degraded: components });
    }
}

/// Server or agent process hosting the mirror.
pub struct MirrorHost {
    role: HostRole,
    core: Arc<HostCore>,
    publisher: ArtifactPublisher,
    negotiator: TransportNegotiator,
    current_build: Mutex<Option<BuildRef>>,
    config_task: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorHost {
    /// Host over `engine`, not yet started.
    #[must_use]
    pub fn new(
        config: HostConfig,
        engine: Arc<dyn DistributionEngine>,
        settings: SettingsStore,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let seeder = DirectorySeeder::new(
            engine,
            LinkStore::new(config.storage_root),
            &settings.snapshot(),
            events.clone(),
            metrics.clone(),
        );
        let publisher = ArtifactPublisher::new(seeder.clone(), settings.clone());
        let negotiator =
            TransportNegotiator::new(seeder.clone(), settings.clone(), events.clone(), metrics);
        Self {
            role: config.role,
            core: Arc::new(HostCore {
                settings,
                seeder,
                events,
                addresses: config.addresses,
                started: AtomicBool::new(false),
                degraded: Mutex::new(false),
            }),
            publisher,
            negotiator,
            current_build: Mutex::new(None),
            config_task: Mutex::new(None),
        }
    }

    /// Role of this host.
    #[must_use]
    pub const fn role(&self) -> HostRole {
        self.role
    }

    /// Whether [`HostLifecycle::on_host_started`] ran and shutdown did not.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.started.load(Ordering::SeqCst)
    }

    /// Directory seeder of the host.
    #[must_use]
    pub fn seeder(&self) -> &DirectorySeeder {
        &self.core.seeder
    }

    /// Settings store of the host.
    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.core.settings
    }

    /// Event bus of the host.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.core.events
    }

    /// Build currently running on this host, if any.
    #[must_use]
    pub fn current_build(&self) -> Option<BuildRef> {
        self.current_build
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish explicit `(path, relative path)` pairs of the running build.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MissingState`] when no build is running and
    /// [`AppError::Seeder`] when the build identifiers are unusable as a scope.
    pub async fn publish_files(&self, files: Vec<PublishArtifact>) -> AppResult<PublishReport> {
        let build = self.current_build().ok_or(AppError::MissingState {
            field: "current_build",
            value: None,
        })?;
        self.publish_batch(&build, files).await
    }

    /// Publish every artifact under the build's artifact directory.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Seeder`] when the build scope is invalid or the
    /// artifact directory cannot be walked.
    pub async fn publish_build(&self, build: &BuildRef) -> AppResult<PublishReport> {
        let batch = collect_artifacts(&build.artifacts_dir)
            .map_err(|err| AppError::seeder("host.collect_artifacts", err))?;
        self.publish_batch(build, batch).await
    }

    async fn publish_batch(
        &self,
        build: &BuildRef,
        batch: Vec<PublishArtifact>,
    ) -> AppResult<PublishReport> {
        let scope = build.scope()?;
        let log = Arc::new(TracingBuildLog::new(scope.to_string()));
        let target = PublishTarget::for_build(scope, &build.artifacts_dir);
        let report = self.publisher.publish(batch, &target, log).await;
        info!(
            build_type_id = %build.build_type_id,
            build_id = %build.build_id,
            artifacts = report.artifacts().len(),
            advertised = report.advertised(),
            failures = report.failures().len(),
            "build artifacts published"
        );
        Ok(report)
    }

    /// Consumer transport for one dependency resolution.
    #[must_use]
    pub fn transport(&self, context: &ResolveContext) -> Option<TorrentTransport> {
        self.negotiator.get_transport(context)
    }

    fn take_config_task(&self) -> Option<JoinHandle<()>> {
        self.config_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl HostLifecycle for MirrorHost {
    async fn on_host_started(&self) -> AppResult<()> {
        if self.core.started.swap(true, Ordering::SeqCst) {
            debug!("mirror host already started");
            return Ok(());
        }
        let task = spawn_config_watch_task(self.core.settings.subscribe(), Arc::clone(&self.core));
        if let Some(previous) = self
            .config_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }

        if self.core.settings.snapshot().seeder_enabled {
            self.core.start_seeder().await;
        } else {
            info!("seeder disabled; host started without seeding");
        }
        Ok(())
    }

    async fn on_host_shutdown(&self) -> AppResult<()> {
        self.core.started.store(false, Ordering::SeqCst);
        if let Some(task) = self.take_config_task() {
            task.abort();
            if let Err(err) = task.await
                && !err.is_cancelled()
            {
                warn!(error = %err, "config watcher task join failed");
            }
        }
        self.core.stop_seeder().await;
        info!("mirror host shut down");
        Ok(())
    }

    async fn on_build_started(&self, build: BuildRef) -> AppResult<()> {
        debug!(
            build_type_id = %build.build_type_id,
            build_id = %build.build_id,
            "build started"
        );
        *self
            .current_build
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(build);
        Ok(())
    }

    async fn on_build_finished(&self, build: BuildRef) -> AppResult<()> {
        {
            let mut current = self
                .current_build
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if current.as_ref() == Some(&build) {
                *current = None;
            }
        }
        if self.role != HostRole::Server {
            return Ok(());
        }
        self.publish_build(&build).await.map(|_| ())
    }

    async fn on_config_changed(&self, field: &str, value: &str) -> AppResult<()> {
        self.core
            .settings
            .apply_raw(field, value)
            .map_err(|err| AppError::config("host.config_changed", err))?;
        Ok(())
    }
}

fn spawn_config_watch_task(mut watcher: SettingsWatcher, core: Arc<HostCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = watcher.next().await {
            core.apply_snapshot(&snapshot).await;
        }
        debug!("settings store closed; config watcher exiting");
    })
}

fn publish_event(events: &EventBus, event: Event) {
    if let Err(error) = events.publish(event) {
        debug!(
            event_id = error.event_id(),
            event_kind = error.event_kind(),
            "event published without subscribers"
        );
    }
}
