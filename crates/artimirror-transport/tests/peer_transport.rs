use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use artimirror_config::{SeederSettings, SettingsStore};
use artimirror_events::{Event, EventBus};
use artimirror_seeder::{BuildScope, DirectorySeeder, LinkStore};
use artimirror_telemetry::{Metrics, TransportOutcome};
use artimirror_test_support::fixtures::{MIB, TempWorkspace, write_sized_file};
use artimirror_test_support::mocks::{CountingEngine, LogLevel, RecordingBuildLog, StaticFetcher};
use artimirror_torrent_core::{CREATOR_TAG, DistributionEngine, TorrentMetadata};
use artimirror_torrent_loopback::{LoopbackEngine, Swarm};
use artimirror_transport::{
    ResolveContext, TRANSPORT_NAME, TRANSPORT_PARAMETER, TorrentTransport, TransportError,
    TransportNegotiator,
};
use url::Url;

const LOCAL: [IpAddr; 1] = [IpAddr::V4(Ipv4Addr::LOCALHOST)];
const BASE: &str = "http://build.example.com:8111/repository/download/bt1/42";

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ivy-module version="1.3">
  <info organisation="acme" module="bt1" revision="42" />
  <publications>
    <artifact name="dist/app" ext="zip" />
    <artifact name=".artimirror/torrents/dist/app.zip" ext="torrent" />
    <artifact name="notes" ext="txt" />
  </publications>
</ivy-module>"#;

struct Agent {
    workspace: TempWorkspace,
    swarm: Swarm,
    engine: Arc<CountingEngine>,
    seeder: DirectorySeeder,
    fetcher: Arc<StaticFetcher>,
    negotiator: TransportNegotiator,
    metrics: Metrics,
    events: EventBus,
    log: Arc<RecordingBuildLog>,
    metadata: TorrentMetadata,
    source: PathBuf,
    producers: Vec<Arc<LoopbackEngine>>,
}

impl Agent {
    async fn new() -> Result<Self> {
        Self::with_piece_delay(Duration::ZERO).await
    }

    async fn with_piece_delay(piece_delay: Duration) -> Result<Self> {
        let workspace = TempWorkspace::new()?;
        let source = write_sized_file(&workspace.path().join("server/dist/app.zip"), 2 * MIB + 5, 7)?;
        let metadata = TorrentMetadata::create(&source, "http://tracker.invalid/announce", CREATOR_TAG)?;

        let swarm = Swarm::new();
        let inner: Arc<dyn DistributionEngine> =
            Arc::new(LoopbackEngine::with_piece_delay(swarm.clone(), piece_delay));
        let engine = Arc::new(CountingEngine::new(inner));
        let settings = SettingsStore::new(SeederSettings {
            announce_url: Some(Url::parse("http://tracker.invalid/announce")?),
            file_size_threshold_mb: Some(1),
            seeder_enabled: true,
            ..SeederSettings::default()
        });
        let events = EventBus::new();
        let metrics = Metrics::new()?;
        let seeder = DirectorySeeder::new(
            engine.clone(),
            LinkStore::new(workspace.path().join("agent/storage")),
            &settings.snapshot(),
            events.clone(),
            metrics.clone(),
        );
        seeder
            .start(&LOCAL, None, Duration::from_secs(3_600), Duration::from_secs(60))
            .await?;

        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.insert(&format!("{BASE}/artifacts-ivy.xml"), MANIFEST);
        fetcher.insert(
            &format!("{BASE}/.artimirror/torrents/dist/app.zip.torrent"),
            metadata.to_bytes(),
        );
        let negotiator =
            TransportNegotiator::new(seeder.clone(), settings, events.clone(), metrics.clone())
                .with_fetcher(fetcher.clone());

        Ok(Self {
            workspace,
            swarm,
            engine,
            seeder,
            fetcher,
            negotiator,
            metrics,
            events,
            log: Arc::new(RecordingBuildLog::new()),
            metadata,
            source,
            producers: Vec::new(),
        })
    }

    async fn add_producers(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let producer = Arc::new(LoopbackEngine::new(self.swarm.clone()));
            producer.start(&LOCAL, Duration::from_secs(60)).await?;
            producer.seed(&self.metadata, &self.source).await?;
            self.producers.push(producer);
        }
        Ok(())
    }

    fn context(&self, opted_in: bool, server: &str) -> Result<ResolveContext> {
        let mut parameters = HashMap::new();
        if opted_in {
            parameters.insert(TRANSPORT_PARAMETER.to_string(), TRANSPORT_NAME.to_string());
        }
        Ok(ResolveContext {
            server_url: Url::parse(server)?,
            parameters,
            credentials: None,
            connection_timeout: Duration::from_secs(5),
            fetch_timeout: Some(Duration::from_secs(30)),
            build_log: self.log.clone(),
        })
    }

    fn transport(&self) -> Result<TorrentTransport> {
        self.negotiator
            .get_transport(&self.context(true, "http://build.example.com:8111/")?)
            .ok_or_else(|| anyhow!("peer transport unavailable"))
    }

    fn deps_dir(&self) -> PathBuf {
        self.workspace.path().join("agent/deps")
    }
}

fn url(path: &str) -> Result<Url> {
    Ok(Url::parse(&format!("{BASE}/{path}"))?)
}

#[tokio::test]
async fn fetched_artifact_is_identical_and_reseeded() -> Result<()> {
    let mut agent = Agent::new().await?;
    agent.add_producers(2).await?;
    let transport = agent.transport()?;

    let manifest_target = agent.deps_dir().join("artifacts-ivy.xml");
    let digest = transport
        .download_url_to(&url("artifacts-ivy.xml")?, &manifest_target)
        .await?;
    assert_eq!(digest.as_deref(), Some("artifacts-ivy.xml_bt1_42"));
    assert_eq!(std::fs::read_to_string(&manifest_target)?, MANIFEST);

    let target = agent.deps_dir().join("dist/app.zip");
    let info_hash = transport
        .download_url_to(&url("dist/app.zip")?, &target)
        .await?;
    assert_eq!(info_hash, Some(agent.metadata.info_hash().to_hex()));
    assert_eq!(std::fs::read(&target)?, std::fs::read(&agent.source)?);
    assert_eq!(agent.engine.fetch_count(), 1);

    let cached = agent.deps_dir().join(".artimirror/torrents/dist/app.zip.torrent");
    assert_eq!(TorrentMetadata::load(&cached)?, agent.metadata);
    let scope = BuildScope::new("bt1", "42")?;
    assert!(agent.seeder.links().link_exists("dist/app.zip", &scope)?);
    assert!(agent.seeder.is_seeding(&agent.metadata.info_hash()).await);
    assert_eq!(agent.swarm.seeder_count(&agent.metadata.info_hash()), 3);

    assert!(agent.log.contains(LogLevel::ProgressStarted, "app.zip"));
    assert!(agent.log.contains(LogLevel::ProgressFinished, "app.zip"));
    assert_eq!(
        agent.metrics.transport_outcome_count(TransportOutcome::Completed),
        1
    );
    let completed = agent
        .events
        .recent()
        .into_iter()
        .any(|envelope| matches!(envelope.event, Event::TransportCompleted { .. }));
    assert!(completed);
    agent.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn timed_out_peer_fetch_is_retryable_and_leaves_nothing_behind() -> Result<()> {
    let mut agent = Agent::with_piece_delay(Duration::from_millis(200)).await?;
    agent.add_producers(2).await?;
    let mut context = agent.context(true, "http://build.example.com:8111/")?;
    context.fetch_timeout = Some(Duration::from_millis(300));
    let transport = agent
        .negotiator
        .get_transport(&context)
        .ok_or_else(|| anyhow!("peer transport unavailable"))?;
    transport
        .download_url_to(
            &url("artifacts-ivy.xml")?,
            &agent.deps_dir().join("artifacts-ivy.xml"),
        )
        .await?;

    let target = agent.deps_dir().join("dist/app.zip");
    let result = transport.download_url_to(&url("dist/app.zip")?, &target).await;
    let Err(err) = result else {
        return Err(anyhow!("slow peer fetch did not fail"));
    };
    assert!(matches!(err, TransportError::DownloadFailed { .. }));
    assert!(err.is_retryable());
    assert_eq!(agent.engine.fetch_count(), 1);

    assert!(!target.exists());
    let leftovers: Vec<PathBuf> = std::fs::read_dir(agent.deps_dir().join("dist"))
        .map(|entries| entries.flatten().map(|entry| entry.path()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    let scope = BuildScope::new("bt1", "42")?;
    assert!(!agent.seeder.links().link_exists("dist/app.zip", &scope)?);
    assert!(!agent.seeder.is_seeding(&agent.metadata.info_hash()).await);
    assert_eq!(
        agent.metrics.transport_outcome_count(TransportOutcome::Failed),
        1
    );
    assert!(agent.log.contains(LogLevel::Warn, "Unable to download"));
    agent.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn transport_requires_opt_in() -> Result<()> {
    let mut agent = Agent::new().await?;
    agent.add_producers(2).await?;

    let context = agent.context(false, "http://build.example.com:8111/")?;
    assert!(agent.negotiator.get_transport(&context).is_none());
    assert!(agent.log.contains(LogLevel::Info, "not selected"));
    assert_eq!(agent.engine.fetch_count(), 0);
    assert!(agent.fetcher.calls().is_empty());
    agent.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn local_server_and_stopped_seeder_disable_transport() -> Result<()> {
    let agent = Agent::new().await?;
    let local = agent.context(true, "http://localhost:8111/")?;
    assert!(agent.negotiator.get_transport(&local).is_none());

    agent.seeder.stop().await?;
    let remote = agent.context(true, "http://build.example.com:8111/")?;
    assert!(agent.negotiator.get_transport(&remote).is_none());
    assert!(agent.log.contains(LogLevel::Info, "seeder is not running"));
    Ok(())
}

#[tokio::test]
async fn manifest_download_never_touches_metadata_or_engine() -> Result<()> {
    let mut agent = Agent::new().await?;
    agent.add_producers(2).await?;
    let transport = agent.transport()?;

    let manifest_url = url("artifacts-ivy.xml")?;
    transport
        .download_url_to(&manifest_url, &agent.deps_dir().join("artifacts-ivy.xml"))
        .await?;
    assert_eq!(agent.fetcher.calls(), vec![manifest_url.to_string()]);
    assert!(!agent
        .fetcher
        .requested(&format!("{BASE}/.artimirror/torrents/dist/app.zip.torrent")));
    assert_eq!(agent.engine.fetch_count(), 0);
    agent.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn single_peer_falls_back_without_fetching() -> Result<()> {
    let mut agent = Agent::new().await?;
    agent.add_producers(1).await?;
    let transport = agent.transport()?;
    transport
        .download_url_to(
            &url("artifacts-ivy.xml")?,
            &agent.deps_dir().join("artifacts-ivy.xml"),
        )
        .await?;

    let target = agent.deps_dir().join("dist/app.zip");
    let result = transport.download_url_to(&url("dist/app.zip")?, &target).await?;
    assert_eq!(result, None);
    assert_eq!(agent.engine.fetch_count(), 0);
    assert!(!target.exists());
    assert!(agent.log.contains(LogLevel::Info, "Not enough peers"));
    assert_eq!(
        agent.metrics.transport_outcome_count(TransportOutcome::Fallback),
        1
    );
    agent.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn artifacts_missing_from_manifest_skip_peer_transport() -> Result<()> {
    let mut agent = Agent::new().await?;
    agent.add_producers(2).await?;
    let transport = agent.transport()?;

    // Without the manifest nothing is known to be published with metadata.
    let before = transport
        .download_url_to(&url("dist/app.zip")?, &agent.deps_dir().join("dist/app.zip"))
        .await?;
    assert_eq!(before, None);

    transport
        .download_url_to(
            &url("artifacts-ivy.xml")?,
            &agent.deps_dir().join("artifacts-ivy.xml"),
        )
        .await?;
    let notes = transport
        .download_url_to(&url("notes.txt")?, &agent.deps_dir().join("notes.txt"))
        .await?;
    assert_eq!(notes, None);
    assert!(!agent.fetcher.requested(&format!(
        "{BASE}/.artimirror/torrents/notes.txt.torrent"
    )));
    assert_eq!(agent.engine.fetch_count(), 0);
    agent.seeder.stop().await?;
    Ok(())
}

#[tokio::test]
async fn digest_reads_published_metadata() -> Result<()> {
    let mut agent = Agent::new().await?;
    agent.add_producers(2).await?;
    let transport = agent.transport()?;
    transport
        .download_url_to(
            &url("artifacts-ivy.xml")?,
            &agent.deps_dir().join("artifacts-ivy.xml"),
        )
        .await?;

    let digest = transport.get_digest(&url("dist/app.zip")?).await;
    assert_eq!(digest, Some(agent.metadata.info_hash().to_hex()));
    assert_eq!(agent.engine.fetch_count(), 0);
    agent.seeder.stop().await?;
    Ok(())
}
