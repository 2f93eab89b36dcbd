use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use artimirror_config::{SeederSettings, SettingsStore};
use artimirror_events::EventBus;
use artimirror_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, Metrics, build_sha};
use artimirror_torrent_core::DistributionEngine;
use artimirror_torrent_loopback::{LoopbackEngine, Swarm};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::host::{HostConfig, HostRole, MirrorHost};
use crate::lifecycle::HostLifecycle;

/// Directory holding the link store.
pub const STORAGE_ROOT_ENV: &str = "ARTIMIRROR_STORAGE_ROOT";
/// Host role, `server` (default) or `agent`.
pub const ROLE_ENV: &str = "ARTIMIRROR_ROLE";
/// Log level used when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "ARTIMIRROR_LOG_LEVEL";
/// Log output format, `json` or `pretty`.
pub const LOG_FORMAT_ENV: &str = "ARTIMIRROR_LOG_FORMAT";

/// Dependencies required to bootstrap the host process.
pub(crate) struct BootstrapDependencies {
    log_level: String,
    log_format: LogFormat,
    role: HostRole,
    storage_root: PathBuf,
    settings: SeederSettings,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_root = lookup(STORAGE_ROOT_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(AppError::MissingEnv {
                name: STORAGE_ROOT_ENV,
            })?;
        let role = parse_role(lookup(ROLE_ENV).as_deref())?;
        let settings = SeederSettings::from_lookup(&lookup)
            .map_err(|err| AppError::config("settings.from_env", err))?;
        Ok(Self {
            log_level: lookup(LOG_LEVEL_ENV).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format: LogFormat::from_setting(lookup(LOG_FORMAT_ENV).as_deref()),
            role,
            storage_root,
            settings,
        })
    }
}

fn parse_role(raw: Option<&str>) -> AppResult<HostRole> {
    match raw.map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(HostRole::Server),
        Some(value) if value.is_empty() || value == "server" => Ok(HostRole::Server),
        Some(value) if value == "agent" => Ok(HostRole::Agent),
        Some(value) => Err(AppError::InvalidConfig {
            field: "role",
            reason: "unknown_role",
            value: Some(value),
        }),
    }
}

/// Entry point for the host boot sequence; runs until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the environment is incomplete, logging cannot be
/// installed, or the shutdown signal cannot be awaited.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    artimirror_telemetry::init_logging(&LoggingConfig {
        level: &dependencies.log_level,
        format: dependencies.log_format,
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    run_app_with(dependencies, shutdown_signal()).await
}

/// Boot sequence over injected dependencies; stops when `shutdown` resolves.
pub(crate) async fn run_app_with<S>(dependencies: BootstrapDependencies, shutdown: S) -> AppResult<()>
where
    S: Future<Output = AppResult<()>>,
{
    info!(
        storage_root = %dependencies.storage_root.display(),
        "artimirror host bootstrap starting"
    );
    let BootstrapDependencies {
        log_level: _,
        log_format: _,
        role,
        storage_root,
        settings,
    } = dependencies;

    let events = EventBus::new();
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let engine: Arc<dyn DistributionEngine> = Arc::new(LoopbackEngine::new(Swarm::new()));
    let host = MirrorHost::new(
        HostConfig::new(role, storage_root),
        engine,
        SettingsStore::new(settings),
        events,
        metrics,
    );

    host.on_host_started().await?;
    info!(role = ?role, seeding = host.seeder().is_running(), "artimirror host ready");
    let waited = shutdown.await;
    host.on_host_shutdown().await?;
    waited?;
    info!("artimirror host shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> AppResult<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| AppError::Io {
            operation: "signal.ctrl_c",
            path: None,
            source,
        })
}
