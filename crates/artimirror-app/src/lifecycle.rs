//! Host lifecycle port.

use std::path::PathBuf;

use artimirror_seeder::BuildScope;
use async_trait::async_trait;

use crate::error::{AppError, AppResult};

/// Identifies one build and where its published artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRef {
    /// Build configuration identifier.
    pub build_type_id: String,
    /// Build identifier.
    pub build_id: String,
    /// Root of the build's published artifacts.
    pub artifacts_dir: PathBuf,
}

impl BuildRef {
    /// Reference to build `build_id` of `build_type_id`.
    #[must_use]
    pub fn new(
        build_type_id: impl Into<String>,
        build_id: impl Into<String>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            build_type_id: build_type_id.into(),
            build_id: build_id.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Link store scope `<typeId>/<buildId>` of this build.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Seeder`] when either identifier is not a single
    /// path segment.
    pub fn scope(&self) -> AppResult<BuildScope> {
        BuildScope::new(&self.build_type_id, &self.build_id)
            .map_err(|err| AppError::seeder("build.scope", err))
    }
}

/// Callbacks the hosting CI process delivers to the mirror.
#[async_trait]
pub trait HostLifecycle: Send + Sync {
    /// Host process finished starting.
    async fn on_host_started(&self) -> AppResult<()>;

    /// Host process is shutting down.
    async fn on_host_shutdown(&self) -> AppResult<()>;

    /// A build began on this host.
    async fn on_build_started(&self, build: BuildRef) -> AppResult<()>;

    /// A build finished and its artifacts are final.
    async fn on_build_finished(&self, build: BuildRef) -> AppResult<()>;

    /// A single setting changed; `field` names a setting, `value` is its raw text.
    async fn on_config_changed(&self, field: &str, value: &str) -> AppResult<()>;
}
