//! Per-build log sink used by the producer and consumer paths.

/// Receives user-visible build log lines.
pub trait BuildLog: Send + Sync {
    /// Informational line.
    fn info(&self, message: &str);
    /// Warning line.
    fn warn(&self, message: &str);
    /// Opens a progress block.
    fn progress_started(&self, message: &str);
    /// Closes the most recent progress block.
    fn progress_finished(&self, message: &str);
}

/// Build log that discards every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBuildLog;

impl BuildLog for NullBuildLog {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn progress_started(&self, _message: &str) {}
    fn progress_finished(&self, _message: &str) {}
}
