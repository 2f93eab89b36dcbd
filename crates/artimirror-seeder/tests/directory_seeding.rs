use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use artimirror_config::{SeederSettings, SettingsStore};
use artimirror_events::{Event, EventBus, StopReason};
use artimirror_seeder::{
    ArtifactOutcome, ArtifactPublisher, BuildScope, DirectorySeeder, LinkStore, PublishTarget,
    SeederState, collect_artifacts,
};
use artimirror_telemetry::Metrics;
use artimirror_test_support::fixtures::{MIB, TempWorkspace};
use artimirror_test_support::mocks::{LogLevel, RecordingBuildLog};
use artimirror_torrent_core::layout::torrents_root;
use artimirror_torrent_core::{CREATOR_TAG, TorrentMetadata};
use artimirror_torrent_loopback::{LoopbackEngine, Swarm};
use url::Url;

const LOCAL: [IpAddr; 1] = [IpAddr::V4(Ipv4Addr::LOCALHOST)];

struct Harness {
    workspace: TempWorkspace,
    engine: Arc<LoopbackEngine>,
    settings: SettingsStore,
    seeder: DirectorySeeder,
    publisher: ArtifactPublisher,
    events: EventBus,
    metrics: Metrics,
}

impl Harness {
    fn new(threshold_mb: u64, max: Option<usize>) -> Result<Self> {
        let workspace = TempWorkspace::new()?;
        let settings = SettingsStore::new(SeederSettings {
            announce_url: Some(Url::parse("http://tracker.invalid/announce")?),
            file_size_threshold_mb: Some(threshold_mb),
            max_seeded_torrents: max,
            seeder_enabled: true,
            ..SeederSettings::default()
        });
        let engine = Arc::new(LoopbackEngine::new(Swarm::new()));
        let events = EventBus::new();
        let metrics = Metrics::new()?;
        let seeder = DirectorySeeder::new(
            engine.clone(),
            LinkStore::new(workspace.storage_root()),
            &settings.snapshot(),
            events.clone(),
            metrics.clone(),
        );
        let publisher = ArtifactPublisher::new(seeder.clone(), settings.clone());
        Ok(Self {
            workspace,
            engine,
            settings,
            seeder,
            publisher,
            events,
            metrics,
        })
    }

    async fn start(&self) -> Result<()> {
        self.seeder
            .start(
                &LOCAL,
                None,
                Duration::from_secs(3_600),
                Duration::from_secs(60),
            )
            .await?;
        Ok(())
    }

    fn target(&self) -> Result<PublishTarget> {
        Ok(PublishTarget::for_build(
            BuildScope::new("bt1", "1")?,
            &self.workspace.artifacts_dir("bt1", "1"),
        ))
    }

    async fn publish_all(&self) -> Result<artimirror_seeder::PublishReport> {
        let batch = collect_artifacts(&self.workspace.artifacts_dir("bt1", "1"))?;
        Ok(self
            .publisher
            .publish(batch, &self.target()?, Arc::new(RecordingBuildLog::new()))
            .await)
    }

    fn metadata_file(&self, relative: &str) -> std::path::PathBuf {
        torrents_root(&self.workspace.artifacts_dir("bt1", "1")).join(format!("{relative}.torrent"))
    }
}

fn count_files(root: &Path, extension: &str) -> usize {
    walk(root)
        .into_iter()
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
        .count()
}

fn walk(root: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(walk(&path));
        } else {
            found.push(path);
        }
    }
    found
}

#[tokio::test]
async fn newest_artifact_evicts_oldest_when_capacity_is_one() -> Result<()> {
    let harness = Harness::new(10, Some(1))?;
    harness.start().await?;
    harness
        .workspace
        .artifact("bt1", "1", "app.zip", 50 * MIB, 1)?;
    let first = harness.publish_all().await?;
    assert_eq!(first.advertised(), 1);

    harness
        .workspace
        .artifact("bt1", "1", "lib.zip", 60 * MIB, 2)?;
    let batch = vec![artimirror_seeder::PublishArtifact {
        path: harness.workspace.artifacts_dir("bt1", "1").join("lib.zip"),
        relative: "lib.zip".to_string(),
    }];
    let log = Arc::new(RecordingBuildLog::new());
    let second = harness
        .publisher
        .publish(batch, &harness.target()?, log.clone())
        .await;
    assert_eq!(second.advertised(), 1);
    assert!(log.contains(LogLevel::Info, "lib.zip"));

    let seeded = harness.seeder.seeded().await;
    assert_eq!(seeded.len(), 1);
    assert!(seeded[0].artifact_path.ends_with("lib.zip"));
    assert!(harness.metadata_file("app.zip").is_file());
    assert_eq!(harness.metrics.snapshot().seed_evictions_total, 1);

    let evicted = harness.events.recent().into_iter().any(|envelope| {
        matches!(
            envelope.event,
            Event::SeedingStopped {
                reason: StopReason::Evicted,
                ..
            }
        )
    });
    assert!(evicted);

    // Later scans do not bring the evicted object back.
    harness.seeder.scan_now().await?;
    assert_eq!(harness.seeder.seeded_count().await, 1);
    harness.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn publishing_twice_reuses_metadata_and_link() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.start().await?;
    harness.workspace.artifact("bt1", "1", "dist/app.zip", 2 * MIB, 3)?;

    let first = harness.publish_all().await?;
    let second = harness.publish_all().await?;
    assert!(matches!(
        first.outcome("dist/app.zip"),
        Some(ArtifactOutcome::Advertised { reused: false, .. })
    ));
    assert!(matches!(
        second.outcome("dist/app.zip"),
        Some(ArtifactOutcome::Advertised { reused: true, .. })
    ));

    let artifacts_dir = harness.workspace.artifacts_dir("bt1", "1");
    assert_eq!(count_files(&artifacts_dir, "torrent"), 1);
    assert_eq!(count_files(&harness.workspace.storage_root(), "link"), 1);
    assert_eq!(harness.metrics.snapshot().metadata_created_total, 1);
    assert_eq!(harness.seeder.seeded_count().await, 1);
    harness.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn rewritten_artifact_gets_a_new_identity() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.start().await?;
    let path = harness.workspace.artifact("bt1", "1", "app.zip", 2 * MIB, 1)?;
    let first = harness.publish_all().await?;
    let Some(ArtifactOutcome::Advertised { info_hash, .. }) = first.outcome("app.zip") else {
        bail!("first publication did not advertise app.zip");
    };
    let stale = *info_hash;

    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.workspace.artifact("bt1", "1", "app.zip", 2 * MIB, 2)?;
    let current =
        TorrentMetadata::create(&path, "http://tracker.invalid/announce", CREATOR_TAG)?.info_hash();
    assert_ne!(stale, current);

    let second = harness.publish_all().await?;
    assert!(matches!(
        second.outcome("app.zip"),
        Some(ArtifactOutcome::Advertised { info_hash, reused: false }) if *info_hash == current
    ));
    assert!(!harness.seeder.is_seeding(&stale).await);
    assert!(harness.seeder.is_seeding(&current).await);
    assert_eq!(
        TorrentMetadata::load(&harness.metadata_file("app.zip"))?.info_hash(),
        current
    );
    assert_eq!(harness.metrics.snapshot().metadata_created_total, 2);
    harness.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn dangling_link_triggers_metadata_recreation() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.workspace.artifact("bt1", "1", "app.zip", MIB, 4)?;
    harness.publish_all().await?;

    let metadata = harness.metadata_file("app.zip");
    std::fs::remove_file(&metadata)?;
    let scope = BuildScope::new("bt1", "1")?;
    assert!(!harness.seeder.links().link_exists("app.zip", &scope)?);

    let report = harness.publish_all().await?;
    assert!(matches!(
        report.outcome("app.zip"),
        Some(ArtifactOutcome::Prepared { reused: false, .. })
    ));
    assert!(metadata.is_file());
    assert!(harness.seeder.links().link_exists("app.zip", &scope)?);
    Ok(())
}

#[tokio::test]
async fn threshold_boundary_is_inclusive_for_publishing() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.workspace.artifact("bt1", "1", "exact.bin", MIB, 1)?;
    harness.workspace.artifact("bt1", "1", "small.bin", MIB - 1, 2)?;

    let report = harness.publish_all().await?;
    assert!(matches!(
        report.outcome("exact.bin"),
        Some(ArtifactOutcome::Prepared { .. })
    ));
    assert!(matches!(
        report.outcome("small.bin"),
        Some(ArtifactOutcome::Skipped {
            reason: "below_threshold"
        })
    ));
    assert!(!harness.metadata_file("small.bin").exists());
    Ok(())
}

#[tokio::test]
async fn incomplete_configuration_skips_the_batch() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.settings.replace(SeederSettings {
        announce_url: None,
        ..(*harness.settings.snapshot()).clone()
    });
    harness.workspace.artifact("bt1", "1", "app.zip", MIB, 1)?;

    let report = harness.publish_all().await?;
    assert!(!report.is_attempted());
    assert_eq!(report.missing_setting(), Some("announce_url"));
    assert!(!harness.metadata_file("app.zip").exists());
    Ok(())
}

#[tokio::test]
async fn scan_seeds_linked_objects_and_skips_size_mismatches() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.workspace.artifact("bt1", "1", "a.zip", MIB, 1)?;
    harness.workspace.artifact("bt1", "1", "b.zip", MIB, 2)?;
    harness.publish_all().await?;

    // Grow one artifact after its metadata was created.
    harness.workspace.artifact("bt1", "1", "a.zip", MIB + 7, 1)?;

    harness.start().await?;
    let summary = harness.seeder.scan_now().await?;
    assert_eq!(summary.links, 2);
    assert_eq!(summary.skipped + summary.seeded, 2);
    let seeded = harness.seeder.seeded().await;
    assert_eq!(seeded.len(), 1);
    assert!(seeded[0].artifact_path.ends_with("b.zip"));

    let loaded = TorrentMetadata::load(&harness.metadata_file("b.zip"))?;
    assert!(harness.seeder.is_seeding(&loaded.info_hash()).await);
    harness.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn scan_collects_links_whose_artifact_vanished() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.start().await?;
    let artifact = harness.workspace.artifact("bt1", "1", "a.zip", MIB, 1)?;
    harness.publish_all().await?;
    assert_eq!(harness.seeder.seeded_count().await, 1);

    std::fs::remove_file(&artifact)?;
    let summary = harness.seeder.scan_now().await?;
    assert_eq!(summary.removed, 1);
    assert_eq!(harness.seeder.seeded_count().await, 0);
    assert!(harness.seeder.links().entries()?.is_empty());
    harness.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn start_twice_is_a_noop_and_stop_withdraws_everything() -> Result<()> {
    let harness = Harness::new(1, None)?;
    harness.start().await?;
    harness.start().await?;
    assert_eq!(harness.seeder.state(), SeederState::Running);

    harness.workspace.artifact("bt1", "1", "a.zip", MIB, 1)?;
    harness.workspace.artifact("bt1", "1", "b.zip", MIB, 2)?;
    let report = harness.publish_all().await?;
    assert_eq!(report.advertised(), 2);
    assert_eq!(harness.engine.advertised_count(), 2);

    harness.seeder.stop().await?;
    assert_eq!(harness.seeder.state(), SeederState::Stopped);
    assert_eq!(harness.seeder.seeded_count().await, 0);
    assert_eq!(harness.engine.advertised_count(), 0);
    assert_eq!(harness.metrics.snapshot().seeded_torrents, 0);

    harness.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn seeding_beyond_capacity_evicts_first_seeded() -> Result<()> {
    let harness = Harness::new(1, Some(2))?;
    harness.start().await?;
    for (index, name) in ["a.zip", "b.zip", "c.zip"].into_iter().enumerate() {
        let seed = u8::try_from(index).unwrap_or_default();
        harness.workspace.artifact("bt1", "1", name, MIB, seed)?;
        let batch = vec![artimirror_seeder::PublishArtifact {
            path: harness.workspace.artifacts_dir("bt1", "1").join(name),
            relative: name.to_string(),
        }];
        harness
            .publisher
            .publish(batch, &harness.target()?, Arc::new(RecordingBuildLog::new()))
            .await;
    }

    let seeded: Vec<String> = harness
        .seeder
        .seeded()
        .await
        .iter()
        .filter_map(|entry| entry.artifact_path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(seeded, vec!["b.zip".to_string(), "c.zip".to_string()]);
    harness.seeder.stop().await?;
    Ok(())
}
