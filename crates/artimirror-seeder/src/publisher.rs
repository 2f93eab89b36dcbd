//! Producer path: turn finished build artifacts into seeded objects.
//!
//! # Design
//! - One settings snapshot per batch; a change mid-batch applies to the next.
//!   The size gate is the seeder's threshold predicate evaluated against the
//!   batch's threshold rather than the live one.
//! - Artifacts are processed concurrently under a semaphore. A failure on one
//!   artifact is recorded in the report and never aborts the rest.
//! - Metadata is created at most once per artifact and announce endpoint; a
//!   cached file is reused while its declared size still matches and it is
//!   not older than the artifact. A rewritten artifact gets a new identity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use artimirror_config::SettingsStore;
use artimirror_torrent_core::layout::{self, METADATA_DIR_NAME};
use artimirror_torrent_core::{BuildLog, CREATOR_TAG, InfoHash, TorrentMetadata};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{SeederError, SeederResult};
use crate::link::BuildScope;
use crate::seeder::{DirectorySeeder, load_metadata, meets_threshold};

/// Default number of artifacts hashed at once.
pub const DEFAULT_PUBLISH_CONCURRENCY: usize = 4;

/// One artifact of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishArtifact {
    /// Absolute path of the artifact.
    pub path: PathBuf,
    /// `/`-separated path relative to the build's artifact root.
    pub relative: String,
}

/// Where a batch's metadata and link entries go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    /// Scope under the storage root for link entries.
    pub scope: BuildScope,
    /// Directory mirroring the artifact tree with metadata files.
    pub torrents_root: PathBuf,
}

impl PublishTarget {
    /// Target for a build whose artifacts live in `artifacts_dir`.
    #[must_use]
    pub fn for_build(scope: BuildScope, artifacts_dir: &Path) -> Self {
        Self {
            scope,
            torrents_root: layout::torrents_root(artifacts_dir),
        }
    }
}

/// What happened to one artifact.
#[derive(Debug)]
pub enum ArtifactOutcome {
    /// Metadata is in place and the object is advertised.
    Advertised {
        /// Content identity.
        info_hash: InfoHash,
        /// Whether cached metadata was reused.
        reused: bool,
    },
    /// Metadata and link are in place; seeding is disabled or stopped.
    Prepared {
        /// Content identity.
        info_hash: InfoHash,
        /// Whether cached metadata was reused.
        reused: bool,
    },
    /// Artifact was not eligible.
    Skipped {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Metadata creation, persistence, or seeding failed.
    Failed {
        /// Underlying failure.
        error: SeederError,
    },
}

/// Outcome for one artifact of a batch.
#[derive(Debug)]
pub struct ArtifactReport {
    /// Artifact processed.
    pub artifact: PublishArtifact,
    /// Result of processing.
    pub outcome: ArtifactOutcome,
}

/// Per-batch result, ordered by relative path.
#[derive(Debug, Default)]
pub struct PublishReport {
    missing: Option<&'static str>,
    artifacts: Vec<ArtifactReport>,
}

impl PublishReport {
    fn not_attempted(missing: &'static str) -> Self {
        Self {
            missing: Some(missing),
            artifacts: Vec::new(),
        }
    }

    /// Whether the batch ran at all.
    #[must_use]
    pub const fn is_attempted(&self) -> bool {
        self.missing.is_none()
    }

    /// Setting whose absence prevented the batch from running.
    #[must_use]
    pub const fn missing_setting(&self) -> Option<&'static str> {
        self.missing
    }

    /// Every per-artifact outcome.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactReport] {
        &self.artifacts
    }

    /// Number of artifacts now advertised to peers.
    #[must_use]
    pub fn advertised(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|report| matches!(report.outcome, ArtifactOutcome::Advertised { .. }))
            .count()
    }

    /// Artifacts that failed.
    #[must_use]
    pub fn failures(&self) -> Vec<&ArtifactReport> {
        self.artifacts
            .iter()
            .filter(|report| matches!(report.outcome, ArtifactOutcome::Failed { .. }))
            .collect()
    }

    /// Outcome recorded for `relative`, if it was part of the batch.
    #[must_use]
    pub fn outcome(&self, relative: &str) -> Option<&ArtifactOutcome> {
        self.artifacts
            .iter()
            .find(|report| report.artifact.relative == relative)
            .map(|report| &report.outcome)
    }
}

struct BatchPlan {
    announce: String,
    threshold: u64,
    seed: bool,
    target: PublishTarget,
}

/// Creates metadata and link entries for finished builds and seeds them.
#[derive(Clone)]
pub struct ArtifactPublisher {
    seeder: DirectorySeeder,
    settings: SettingsStore,
    concurrency: usize,
}

impl ArtifactPublisher {
    /// Publisher feeding `seeder` with settings read from `settings`.
    #[must_use]
    pub const fn new(seeder: DirectorySeeder, settings: SettingsStore) -> Self {
        Self {
            seeder,
            settings,
            concurrency: DEFAULT_PUBLISH_CONCURRENCY,
        }
    }

    /// Override how many artifacts are processed at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Seeder the publisher hands objects to.
    #[must_use]
    pub const fn seeder(&self) -> &DirectorySeeder {
        &self.seeder
    }

    /// Process one batch of artifacts.
    ///
    /// When the announce endpoint or threshold is unknown the batch is not
    /// attempted; [`PublishReport::missing_setting`] names what is missing.
    pub async fn publish(
        &self,
        batch: Vec<PublishArtifact>,
        target: &PublishTarget,
        log: Arc<dyn BuildLog>,
    ) -> PublishReport {
        let settings = self.settings.snapshot();
        let (Some(announce), Some(threshold)) =
            (settings.announce_url.as_ref(), settings.threshold_bytes())
        else {
            let missing = if settings.announce_url.is_none() {
                "announce_url"
            } else {
                "file_size_threshold_mb"
            };
            let error = SeederError::ConfigurationIncomplete { missing };
            warn!(scope = %target.scope, missing, error = %error, "batch not attempted");
            log.warn(&format!(
                "Peer distribution skipped: {missing} is not configured"
            ));
            return PublishReport::not_attempted(missing);
        };

        let plan = Arc::new(BatchPlan {
            announce: announce.to_string(),
            threshold,
            seed: settings.seeder_enabled,
            target: target.clone(),
        });
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for artifact in batch {
            let publisher = self.clone();
            let plan = Arc::clone(&plan);
            let permits = Arc::clone(&permits);
            let log = Arc::clone(&log);
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => publisher.publish_one(&artifact, &plan, log.as_ref()).await,
                    Err(_) => ArtifactOutcome::Skipped { reason: "cancelled" },
                };
                ArtifactReport { artifact, outcome }
            });
        }

        let mut artifacts = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => artifacts.push(report),
                Err(err) => warn!(error = %err, "publish task failed"),
            }
        }
        artifacts.sort_by(|a, b| a.artifact.relative.cmp(&b.artifact.relative));
        PublishReport {
            missing: None,
            artifacts,
        }
    }

    async fn publish_one(
        &self,
        artifact: &PublishArtifact,
        plan: &BatchPlan,
        log: &dyn BuildLog,
    ) -> ArtifactOutcome {
        if !meets_threshold(&artifact.path, plan.threshold) {
            debug!(artifact = %artifact.relative, "below size threshold; not publishing");
            return ArtifactOutcome::Skipped {
                reason: "below_threshold",
            };
        }
        self.seeder.stop_seeding_by_path(&artifact.path).await;

        let (metadata_path, info_hash, reused) = match self.prepare(artifact, plan).await {
            Ok(prepared) => prepared,
            Err(error) => {
                warn!(artifact = %artifact.relative, error = %error, "failed to prepare metadata");
                log.warn(&format!(
                    "Failed to create distribution metadata for {}",
                    artifact.relative
                ));
                return ArtifactOutcome::Failed { error };
            }
        };

        if !plan.seed || !self.seeder.is_running() {
            return ArtifactOutcome::Prepared { info_hash, reused };
        }
        match self.seeder.seed(&metadata_path, &artifact.path).await {
            Ok(outcome) => {
                log.info(&format!(
                    "Seeding {} ({})",
                    artifact.relative,
                    outcome.info_hash()
                ));
                ArtifactOutcome::Advertised {
                    info_hash: outcome.info_hash(),
                    reused,
                }
            }
            Err(error) => {
                warn!(artifact = %artifact.relative, error = %error, "failed to seed artifact");
                log.warn(&format!("Failed to seed {}", artifact.relative));
                ArtifactOutcome::Failed { error }
            }
        }
    }

    async fn prepare(
        &self,
        artifact: &PublishArtifact,
        plan: &BatchPlan,
    ) -> SeederResult<(PathBuf, InfoHash, bool)> {
        let scope = &plan.target.scope;
        let links = self.seeder.links();
        if let Some(cached) = links.lookup(&artifact.relative, scope)?
            && cached.artifact == artifact.path
            && let Ok(metadata) = load_metadata(&cached.metadata).await
        {
            let actual = tokio::fs::metadata(&artifact.path)
                .await
                .map_err(|err| SeederError::io("publish.stat", &artifact.path, err))?;
            let fresh = is_fresh(&cached.metadata, &actual).await;
            if fresh && metadata.length() == actual.len() && metadata.announce() == plan.announce {
                debug!(artifact = %artifact.relative, "reusing cached metadata");
                return Ok((cached.metadata, metadata.info_hash(), true));
            }
        }

        let metadata_path = layout::metadata_path(&plan.target.torrents_root, &artifact.relative)
            .ok_or_else(|| {
                SeederError::invalid("relative_path", "not_relative", &artifact.relative)
            })?;
        let metadata = self
            .seeder
            .engine()
            .create_metadata(&artifact.path, &plan.announce, CREATOR_TAG)
            .await
            .map_err(|err| SeederError::engine("publish.create_metadata", err))?;
        let info_hash = metadata.info_hash();
        save_metadata(metadata, &metadata_path).await?;
        self.seeder.record_metadata_created(&info_hash, &artifact.path);

        links.create_link(&artifact.path, &metadata_path, &artifact.relative, scope)?;
        Ok((metadata_path, info_hash, false))
    }
}

/// Whether `metadata_file` was written no earlier than the artifact's last
/// modification. Unknown timestamps count as stale.
async fn is_fresh(metadata_file: &Path, artifact: &std::fs::Metadata) -> bool {
    let Ok(written) = tokio::fs::metadata(metadata_file)
        .await
        .and_then(|meta| meta.modified())
    else {
        return false;
    };
    artifact
        .modified()
        .is_ok_and(|modified| written >= modified)
}

async fn save_metadata(metadata: TorrentMetadata, path: &Path) -> SeederResult<()> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || metadata.save(&owned))
        .await
        .map_err(|source| SeederError::Task {
            operation: "metadata.save",
            source,
        })?
        .map_err(|err| SeederError::engine("metadata.save", err))
}

/// Leaf artifacts under `artifacts_dir`, sorted by relative path.
///
/// The `.artimirror` metadata tree is skipped. A missing directory yields an
/// empty list.
///
/// # Errors
///
/// Returns [`SeederError::Walkdir`] when traversal fails.
pub fn collect_artifacts(artifacts_dir: &Path) -> SeederResult<Vec<PublishArtifact>> {
    if !artifacts_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut artifacts = Vec::new();
    let walker = WalkDir::new(artifacts_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != METADATA_DIR_NAME);
    for entry in walker {
        let entry =
            entry.map_err(|err| SeederError::walkdir("publish.collect", artifacts_dir, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = layout::relative_string(artifacts_dir, entry.path()) {
            artifacts.push(PublishArtifact {
                path: entry.path().to_path_buf(),
                relative,
            });
        }
    }
    artifacts.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(artifacts)
}
