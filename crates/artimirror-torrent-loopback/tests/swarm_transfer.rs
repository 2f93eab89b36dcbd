use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use artimirror_test_support::fixtures::{MIB, TempWorkspace, write_sized_file};
use artimirror_torrent_core::{
    CREATOR_TAG, DistributionEngine, FetchRequest, TorrentError, TorrentMetadata,
};
use artimirror_torrent_loopback::{LoopbackEngine, Swarm};

const LOCAL: [IpAddr; 1] = [IpAddr::V4(Ipv4Addr::LOCALHOST)];
const ANNOUNCE: &str = "http://tracker.invalid/announce";

async fn started(engine: LoopbackEngine) -> Result<Arc<LoopbackEngine>> {
    engine.start(&LOCAL, Duration::from_secs(60)).await?;
    Ok(Arc::new(engine))
}

#[tokio::test]
async fn fetch_copies_verified_bytes_from_peers() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let source = write_sized_file(&workspace.path().join("server/app.zip"), 3 * MIB + 11, 4)?;
    let metadata = TorrentMetadata::create(&source, ANNOUNCE, CREATOR_TAG)?;

    let swarm = Swarm::new();
    let server = started(LoopbackEngine::new(swarm.clone())).await?;
    let agent = started(LoopbackEngine::new(swarm.clone())).await?;
    server.seed(&metadata, &source).await?;

    assert_eq!(agent.count_reachable_peers(&metadata).await?, 1);
    assert_eq!(server.count_reachable_peers(&metadata).await?, 0);

    let target = workspace.path().join("agent/out/app.zip");
    let work_dir = workspace.path().join("agent/work");
    agent
        .fetch(FetchRequest {
            metadata: &metadata,
            target: &target,
            work_dir: &work_dir,
            timeout: Duration::from_secs(30),
            min_peers: 1,
        })
        .await?;

    assert_eq!(std::fs::read(&target)?, std::fs::read(&source)?);
    assert_eq!(std::fs::read_dir(&work_dir)?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn fetch_rejects_tampered_sources() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let original = write_sized_file(&workspace.path().join("a/lib.zip"), MIB, 1)?;
    let metadata = TorrentMetadata::create(&original, ANNOUNCE, CREATOR_TAG)?;
    let swarm = Swarm::new();
    let server = started(LoopbackEngine::new(swarm.clone())).await?;
    let agent = started(LoopbackEngine::new(swarm)).await?;
    server.seed(&metadata, &original).await?;

    write_sized_file(&original, MIB, 2)?;

    let target = workspace.path().join("b/lib.zip");
    let result = agent
        .fetch(FetchRequest {
            metadata: &metadata,
            target: &target,
            work_dir: &workspace.path().join("b/work"),
            timeout: Duration::from_secs(30),
            min_peers: 1,
        })
        .await;
    assert!(matches!(result, Err(TorrentError::Corrupt { piece: 0 })));
    assert!(!target.exists());
    Ok(())
}

#[tokio::test]
async fn fetch_gives_up_when_peers_are_missing() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let source = write_sized_file(&workspace.path().join("a/app.zip"), 1_024, 3)?;
    let metadata = TorrentMetadata::create(&source, ANNOUNCE, CREATOR_TAG)?;
    let swarm = Swarm::new();
    let server = started(LoopbackEngine::new(swarm.clone())).await?;
    let agent = started(LoopbackEngine::new(swarm)).await?;
    server.seed(&metadata, &source).await?;

    let result = agent
        .fetch(FetchRequest {
            metadata: &metadata,
            target: &workspace.path().join("b/app.zip"),
            work_dir: &workspace.path().join("b/work"),
            timeout: Duration::from_millis(100),
            min_peers: 2,
        })
        .await;
    assert!(matches!(
        result,
        Err(TorrentError::NotEnoughPeers {
            required: 2,
            found: 1
        })
    ));
    Ok(())
}

#[tokio::test]
async fn slow_transfers_time_out() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let source = write_sized_file(&workspace.path().join("a/big.zip"), 4 * MIB, 5)?;
    let metadata = TorrentMetadata::create(&source, ANNOUNCE, CREATOR_TAG)?;
    let swarm = Swarm::new();
    let server = started(LoopbackEngine::new(swarm.clone())).await?;
    let agent = started(LoopbackEngine::with_piece_delay(
        swarm,
        Duration::from_millis(200),
    ))
    .await?;
    server.seed(&metadata, &source).await?;

    let target = workspace.path().join("b/big.zip");
    let work_dir = workspace.path().join("b/work");
    let result = agent
        .fetch(FetchRequest {
            metadata: &metadata,
            target: &target,
            work_dir: &work_dir,
            timeout: Duration::from_millis(300),
            min_peers: 1,
        })
        .await;
    assert!(matches!(result, Err(TorrentError::Timeout { .. })));
    assert!(!target.exists());
    assert_eq!(std::fs::read_dir(&work_dir)?.count(), 0);
    Ok(())
}
