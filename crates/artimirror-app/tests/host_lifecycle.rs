use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use artimirror_app::{AppError, BuildRef, HostConfig, HostLifecycle, HostRole, MirrorHost};
use artimirror_config::{SeederSettings, SettingsStore};
use artimirror_events::{Event, EventBus};
use artimirror_seeder::{ArtifactOutcome, BuildScope, PublishArtifact};
use artimirror_telemetry::Metrics;
use artimirror_test_support::fixtures::{MIB, TempWorkspace};
use artimirror_torrent_loopback::{LoopbackEngine, Swarm};
use url::Url;

fn settings(enabled: bool) -> Result<SeederSettings> {
    Ok(SeederSettings {
        announce_url: Some(Url::parse("http://tracker.invalid/announce")?),
        file_size_threshold_mb: Some(1),
        seeder_enabled: enabled,
        scan_interval: Duration::from_secs(3_600),
        ..SeederSettings::default()
    })
}

fn host(workspace: &TempWorkspace, role: HostRole, enabled: bool) -> Result<MirrorHost> {
    let config = HostConfig::new(role, workspace.storage_root())
        .with_addresses(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    Ok(MirrorHost::new(
        config,
        Arc::new(LoopbackEngine::new(Swarm::new())),
        SettingsStore::new(settings(enabled)?),
        EventBus::new(),
        Metrics::new()?,
    ))
}

async fn wait_for_running(host: &MirrorHost, running: bool) -> Result<()> {
    for _ in 0..200 {
        if host.seeder().is_running() == running {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("seeder running state never became {running}")
}

#[tokio::test]
async fn server_publishes_finished_builds() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let host = host(&workspace, HostRole::Server, true)?;
    host.on_host_started().await?;
    assert!(host.is_started());
    assert!(host.seeder().is_running());

    workspace.artifact("bt1", "42", "app.zip", 2 * MIB, 1)?;
    workspace.artifact("bt1", "42", "notes.txt", 10, 2)?;
    let build = BuildRef::new("bt1", "42", workspace.artifacts_dir("bt1", "42"));
    host.on_build_started(build.clone()).await?;
    host.on_build_finished(build).await?;

    let scope = BuildScope::new("bt1", "42")?;
    assert!(host.seeder().links().link_exists("app.zip", &scope)?);
    assert!(!host.seeder().links().link_exists("notes.txt", &scope)?);
    assert_eq!(host.seeder().seeded_count().await, 1);
    assert!(host.current_build().is_none());

    host.on_host_shutdown().await?;
    assert!(!host.is_started());
    assert!(!host.seeder().is_running());
    Ok(())
}

#[tokio::test]
async fn disabled_server_prepares_without_seeding() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let host = host(&workspace, HostRole::Server, false)?;
    host.on_host_started().await?;
    assert!(!host.seeder().is_running());

    workspace.artifact("bt1", "7", "app.zip", 2 * MIB, 3)?;
    let build = BuildRef::new("bt1", "7", workspace.artifacts_dir("bt1", "7"));
    host.on_build_finished(build.clone()).await?;
    let scope = BuildScope::new("bt1", "7")?;
    assert!(host.seeder().links().link_exists("app.zip", &scope)?);
    assert!(
        workspace
            .artifacts_dir("bt1", "7")
            .join(".artimirror/torrents/app.zip.torrent")
            .is_file()
    );
    assert_eq!(host.seeder().seeded_count().await, 0);

    // Turning seeding on later advertises what was prepared while it was off.
    host.on_config_changed("seeder_enabled", "true").await?;
    wait_for_running(&host, true).await?;
    host.seeder().scan_now().await?;
    assert_eq!(host.seeder().seeded_count().await, 1);

    let report = host.publish_build(&build).await?;
    assert!(matches!(
        report.outcome("app.zip"),
        Some(ArtifactOutcome::Advertised { reused: true, .. })
    ));
    host.on_host_shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn enabled_flag_toggles_seeder_after_start() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let host = host(&workspace, HostRole::Server, false)?;

    // Before the host starts the flag only updates the snapshot.
    host.on_config_changed("seeder_enabled", "true").await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!host.seeder().is_running());
    host.on_config_changed("seeder_enabled", "false").await?;

    host.on_host_started().await?;
    assert!(!host.seeder().is_running());
    host.on_config_changed("seeder_enabled", "true").await?;
    wait_for_running(&host, true).await?;
    host.on_config_changed("seeder.enabled", "false").await?;
    wait_for_running(&host, false).await?;

    let changed = host
        .events()
        .recent()
        .into_iter()
        .filter(|envelope| matches!(envelope.event, Event::SettingsChanged { .. }))
        .count();
    assert!(changed >= 2);
    host.on_host_shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_setting_changes_are_rejected() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let host = host(&workspace, HostRole::Server, true)?;
    let revision = host.settings().snapshot().revision;

    let unknown = host.on_config_changed("colour", "blue").await;
    assert!(matches!(unknown, Err(AppError::Config { .. })));
    let invalid = host.on_config_changed("max_seeded_torrents", "zero").await;
    assert!(matches!(invalid, Err(AppError::Config { .. })));
    assert_eq!(host.settings().snapshot().revision, revision);

    host.on_config_changed("max_seeded_torrents", "5").await?;
    assert_eq!(host.settings().snapshot().max_seeded_torrents, Some(5));
    Ok(())
}

#[tokio::test]
async fn agent_publishes_explicit_files_of_the_running_build() -> Result<()> {
    let workspace = TempWorkspace::new()?;
    let host = host(&workspace, HostRole::Agent, true)?;
    host.on_host_started().await?;

    let path = workspace.artifact("bt2", "9", "dist/lib.jar", 3 * MIB, 4)?;
    let files = vec![PublishArtifact {
        path,
        relative: "dist/lib.jar".to_string(),
    }];
    let missing = host.publish_files(files.clone()).await;
    assert!(matches!(
        missing,
        Err(AppError::MissingState {
            field: "current_build",
            ..
        })
    ));

    let build = BuildRef::new("bt2", "9", workspace.artifacts_dir("bt2", "9"));
    host.on_build_started(build.clone()).await?;
    let report = host.publish_files(files).await?;
    assert_eq!(report.advertised(), 1);
    assert!(matches!(
        report.outcome("dist/lib.jar"),
        Some(ArtifactOutcome::Advertised { reused: false, .. })
    ));

    // Agents never publish whole directories on build completion.
    workspace.artifact("bt2", "9", "extra.bin", 2 * MIB, 5)?;
    host.on_build_finished(build).await?;
    let scope = BuildScope::new("bt2", "9")?;
    assert!(!host.seeder().links().link_exists("extra.bin", &scope)?);
    assert_eq!(host.seeder().seeded_count().await, 1);
    host.on_host_shutdown().await?;
    Ok(())
}
