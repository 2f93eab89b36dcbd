//! Consumer side: decide per artifact between peer and direct transfer.
//!
//! # Design
//! - Every reason to skip peer transport yields `Ok(None)` plus a build log
//!   line, so the caller downloads directly. Only a failed peer fetch is an
//!   error, and only an internal engine failure is fatal.
//! - The manifest is always fetched directly; it tells the transport which
//!   artifacts were published together with metadata.
//! - A fetched object is cached (metadata file plus link entry) and seeded, so
//!   later consumers can fetch from this host too.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use artimirror_config::SettingsStore;
use artimirror_events::{Event, EventBus};
use artimirror_seeder::{BuildScope, DirectorySeeder, SeederError, SeederResult};
use artimirror_telemetry::{Metrics, TransportOutcome};
use artimirror_torrent_core::layout::{metadata_path, torrents_root};
use artimirror_torrent_core::{
    BuildLog, Credentials, DirectFetcher, FetchRequest, TorrentError, TorrentMetadata,
    default_work_dir,
};
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::artifact_url::{ParsedArtifactUrl, is_manifest_url, real_root};
use crate::error::{TransportError, TransportResult};
use crate::http::HttpFetcher;
use crate::manifest::IvyManifest;

/// Job parameter selecting the artifact transport.
pub const TRANSPORT_PARAMETER: &str = "artifacts.transport";
/// Value of [`TRANSPORT_PARAMETER`] that opts a job into peer transport.
pub const TRANSPORT_NAME: &str = "TorrentTransport";
/// Minimum number of reachable peers before a peer fetch is attempted.
pub const MIN_SEEDERS_COUNT_TO_TRY: usize = 2;

/// Inputs of one dependency resolution.
#[derive(Clone)]
pub struct ResolveContext {
    /// Artifact store the dependencies come from.
    pub server_url: Url,
    /// Job parameters shared with the build.
    pub parameters: HashMap<String, String>,
    /// Credentials for the artifact store.
    pub credentials: Option<Credentials>,
    /// Connection timeout for direct fetches.
    pub connection_timeout: Duration,
    /// Per-job override of the peer fetch timeout.
    pub fetch_timeout: Option<Duration>,
    /// Build log of the resolving build.
    pub build_log: Arc<dyn BuildLog>,
}

impl ResolveContext {
    /// Whether the job selected peer transport.
    #[must_use]
    pub fn wants_peer_transport(&self) -> bool {
        self.parameters
            .get(TRANSPORT_PARAMETER)
            .is_some_and(|value| value == TRANSPORT_NAME)
    }
}

/// Hands out [`TorrentTransport`]s for builds on this host.
#[derive(Clone)]
pub struct TransportNegotiator {
    seeder: DirectorySeeder,
    settings: SettingsStore,
    events: EventBus,
    metrics: Metrics,
    fetcher: Option<Arc<dyn DirectFetcher>>,
}

impl TransportNegotiator {
    /// Negotiator caching fetched objects through `seeder`.
    #[must_use]
    pub const fn new(
        seeder: DirectorySeeder,
        settings: SettingsStore,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            seeder,
            settings,
            events,
            metrics,
            fetcher: None,
        }
    }

    /// Use `fetcher` for direct fetches instead of a per-context HTTP client.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn DirectFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Transport for `context`, or `None` when peer transport does not apply.
    #[must_use]
    pub fn get_transport(&self, context: &ResolveContext) -> Option<TorrentTransport> {
        let log = &context.build_log;
        if !context.wants_peer_transport() {
            log.info("Peer transport is not selected for this build");
            return None;
        }
        if is_loopback_host(&context.server_url) {
            log.info("Peer transport is not used for a local artifact server");
            return None;
        }
        if !self.seeder.is_running() || !self.seeder.engine().is_running() {
            log.info("Peer transport is unavailable: the seeder is not running");
            return None;
        }

        let fetcher = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => match HttpFetcher::new(context.connection_timeout) {
                Ok(fetcher) => Arc::new(fetcher),
                Err(err) => {
                    warn!(error = %err, "failed to build direct fetch client");
                    log.warn("Peer transport is unavailable: no HTTP client");
                    return None;
                }
            },
        };
        let fetch_timeout = context
            .fetch_timeout
            .unwrap_or_else(|| self.settings.snapshot().fetch_timeout);

        Some(TorrentTransport {
            seeder: self.seeder.clone(),
            settings: self.settings.clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
            fetcher,
            credentials: context.credentials.clone(),
            fetch_timeout,
            log: Arc::clone(&context.build_log),
            published: Mutex::new(HashMap::new()),
        })
    }
}

/// Whether `url` points at this machine.
#[must_use]
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Peer transport bound to one build.
pub struct TorrentTransport {
    seeder: DirectorySeeder,
    settings: SettingsStore,
    events: EventBus,
    metrics: Metrics,
    fetcher: Arc<dyn DirectFetcher>,
    credentials: Option<Credentials>,
    fetch_timeout: Duration,
    log: Arc<dyn BuildLog>,
    published: Mutex<HashMap<String, String>>,
}

impl TorrentTransport {
    /// Timeout applied to each peer fetch.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Download `url` to `target` from peers.
    ///
    /// Returns the content identity on success and `None` when the caller
    /// should download directly instead. The manifest URL is always fetched
    /// directly and returns a manifest digest.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::DownloadFailed`] when a peer fetch was
    /// attempted and failed, and [`TransportError::Fatal`] for internal
    /// engine failures.
    pub async fn download_url_to(&self, url: &Url, target: &Path) -> TransportResult<Option<String>> {
        if is_manifest_url(url) {
            return Ok(self.fetch_manifest(url, target).await);
        }
        let Some(parsed) = ParsedArtifactUrl::parse(url) else {
            self.fall_back(url, "unrecognised_url", "Peer transport skipped: unrecognised URL");
            return Ok(None);
        };
        let Some(metadata) = self.fetch_metadata(&parsed).await else {
            return Ok(None);
        };

        if let Some(threshold) = self.settings.snapshot().threshold_bytes()
            && metadata.length() < threshold
        {
            self.fall_back(
                url,
                "below_threshold",
                &format!("{} is below the peer transfer size threshold", parsed.relative()),
            );
            return Ok(None);
        }

        let engine = self.seeder.engine();
        let peers = engine
            .count_reachable_peers(&metadata)
            .await
            .map_err(|err| self.failed(url, err))?;
        if peers < MIN_SEEDERS_COUNT_TO_TRY {
            self.fall_back(
                url,
                "not_enough_peers",
                &format!("Not enough peers for {} ({peers} found)", parsed.relative()),
            );
            return Ok(None);
        }

        let name = target
            .file_name()
            .map_or_else(|| parsed.relative().to_string(), |n| n.to_string_lossy().into_owned());
        self.log.progress_started(&format!("Downloading {name} from peers"));
        let result = self.fetch_from_peers(&parsed, &metadata, target).await;
        self.log.progress_finished(&format!("Finished downloading {name}"));
        result.map(Some)
    }

    /// Content identity of the metadata published for `url`, without fetching
    /// the content.
    pub async fn get_digest(&self, url: &Url) -> Option<String> {
        let parsed = ParsedArtifactUrl::parse(url)?;
        self.fetch_metadata(&parsed)
            .await
            .map(|metadata| metadata.info_hash().to_hex())
    }

    async fn fetch_from_peers(
        &self,
        parsed: &ParsedArtifactUrl,
        metadata: &TorrentMetadata,
        target: &Path,
    ) -> TransportResult<String> {
        let url = parsed.url();
        let work_dir = default_work_dir(target);
        let started = Instant::now();
        let request = FetchRequest {
            metadata,
            target,
            work_dir: &work_dir,
            timeout: self.fetch_timeout,
            min_peers: MIN_SEEDERS_COUNT_TO_TRY,
        };
        let fetched = tokio::time::timeout(self.fetch_timeout, self.seeder.engine().fetch(request))
            .await
            .unwrap_or(Err(TorrentError::Timeout {
                operation: "transport.fetch",
                limit: self.fetch_timeout,
            }));
        if let Err(err) = fetched {
            self.log.warn(&format!("Unable to download {url} from peers"));
            return Err(self.failed(url, err));
        }

        let elapsed_ms = started.elapsed().as_millis().max(1);
        let speed = u128::from(metadata.length()) / elapsed_ms;
        self.log
            .info(&format!("Download successful. Avg speed {speed} kb/s"));
        let info_hash = metadata.info_hash();
        if let Err(err) = self.share(parsed, metadata, target).await {
            warn!(url = %url, error = %err, "fetched object not cached for seeding");
        }

        self.metrics.inc_transport_outcome(TransportOutcome::Completed);
        self.publish_event(Event::TransportCompleted {
            url: url.to_string(),
            info_hash: info_hash.to_hex(),
        });
        info!(url = %url, info_hash = %info_hash, "artifact fetched from peers");
        Ok(info_hash.to_hex())
    }

    /// Persist metadata beside the fetched file, link it, and seed it.
    async fn share(
        &self,
        parsed: &ParsedArtifactUrl,
        metadata: &TorrentMetadata,
        target: &Path,
    ) -> SeederResult<()> {
        let outside = || SeederError::InvalidInput {
            field: "target",
            reason: "outside_artifact_root",
            value: Some(target.display().to_string()),
        };
        let root = real_root(target, parsed.relative()).ok_or_else(outside)?;
        let metadata_file: PathBuf =
            metadata_path(&torrents_root(&root), parsed.relative()).ok_or_else(outside)?;
        let to_save = metadata.clone();
        let save_path = metadata_file.clone();
        tokio::task::spawn_blocking(move || to_save.save(&save_path))
            .await
            .map_err(|source| SeederError::Task {
                operation: "transport.save_metadata",
                source,
            })?
            .map_err(|source| SeederError::Engine {
                operation: "transport.save_metadata",
                source,
            })?;

        let scope = BuildScope::new(parsed.build_type_id(), parsed.build_id())?;
        self.seeder
            .links()
            .create_link(target, &metadata_file, parsed.relative(), &scope)?;

        if self.settings.snapshot().seeder_enabled && self.seeder.is_running() {
            self.seeder.seed(&metadata_file, target).await?;
        }
        Ok(())
    }

    async fn fetch_manifest(&self, url: &Url, target: &Path) -> Option<String> {
        let bytes = match self.fetcher.get_bytes(url, self.credentials.as_ref()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(url = %err.url(), error = %err, "manifest download failed");
                self.log.warn(&format!("Unable to download {url}"));
                return None;
            }
        };
        let manifest = match IvyManifest::parse(&bytes) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(url = %url, error = %err, "manifest parse failed");
                self.log.warn(&format!("Unable to parse {url}"));
                return None;
            }
        };
        if let Err(err) = write_file(target, &bytes).await {
            warn!(target = %target.display(), error = %err, "failed to write manifest");
            self.log.warn(&format!("Unable to save {}", target.display()));
            return None;
        }

        let backed = manifest.metadata_backed();
        debug!(url = %url, artifacts = backed.len(), "indexed metadata-backed artifacts");
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(backed);
        self.metrics.inc_transport_outcome(TransportOutcome::Manifest);
        Some(manifest.digest())
    }

    async fn fetch_metadata(&self, parsed: &ParsedArtifactUrl) -> Option<TorrentMetadata> {
        let url = parsed.url();
        let known = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(parsed.relative());
        if !known {
            self.fall_back(
                url,
                "not_published",
                &format!("{} was not published for peer transport", parsed.relative()),
            );
            return None;
        }

        let metadata_url = parsed.metadata_url();
        let bytes = match self
            .fetcher
            .get_bytes(&metadata_url, self.credentials.as_ref())
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fall_back(
                    url,
                    "metadata_unavailable",
                    &format!("Unable to download {}", err.url()),
                );
                return None;
            }
        };
        match TorrentMetadata::from_bytes(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                warn!(url = %metadata_url, error = %err, "metadata file unreadable");
                self.fall_back(
                    url,
                    "metadata_invalid",
                    &format!("Unable to read {metadata_url}"),
                );
                None
            }
        }
    }

    fn fall_back(&self, url: &Url, reason: &str, message: &str) {
        debug!(url = %url, reason, "falling back to direct transfer");
        self.log.info(message);
        self.metrics.inc_transport_outcome(TransportOutcome::Fallback);
        self.publish_event(Event::TransportFallback {
            url: url.to_string(),
            reason: reason.to_string(),
        });
    }

    fn failed(&self, url: &Url, err: TorrentError) -> TransportError {
        warn!(url = %url, error = %err, "peer download failed");
        self.metrics.inc_transport_outcome(TransportOutcome::Failed);
        TransportError::from_engine(url.as_str(), err)
    }

    fn publish_event(&self, event: Event) {
        if let Err(error) = self.events.publish(event) {
            debug!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                "event published without subscribers"
            );
        }
    }
}

async fn write_file(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, bytes).await
}
