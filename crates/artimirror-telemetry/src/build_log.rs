//! Bridge from the build log port onto `tracing`.

use artimirror_torrent_core::BuildLog;
use tracing::{info, warn};

/// Build log that forwards every line to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct TracingBuildLog {
    scope: String,
}

impl TracingBuildLog {
    /// Build log tagged with a scope such as `<typeId>/<buildId>`.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    /// Scope attached to each forwarded line.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl BuildLog for TracingBuildLog {
    fn info(&self, message: &str) {
        info!(scope = %self.scope, "{message}");
    }

    fn warn(&self, message: &str) {
        warn!(scope = %self.scope, "{message}");
    }

    fn progress_started(&self, message: &str) {
        info!(scope = %self.scope, progress = "started", "{message}");
    }

    fn progress_finished(&self, message: &str) {
        info!(scope = %self.scope, progress = "finished", "{message}");
    }
}
