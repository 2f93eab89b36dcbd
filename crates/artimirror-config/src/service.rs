//! Live settings store with immutable snapshot swapping.
//!
//! Writers replace the whole snapshot; readers hold an `Arc` to whichever
//! snapshot was current when they looked, so an in-flight operation never
//! observes a half-applied change.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::error::ConfigResult;
use crate::model::{SeederSettings, SettingsChange, SettingsField};

/// Process-wide holder of the current [`SeederSettings`] snapshot.
#[derive(Clone)]
pub struct SettingsStore {
    sender: Arc<watch::Sender<Arc<SeederSettings>>>,
}

impl SettingsStore {
    /// Create a store seeded with an initial snapshot.
    #[must_use]
    pub fn new(initial: SeederSettings) -> Self {
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SeederSettings> {
        Arc::clone(&self.sender.borrow())
    }

    /// Subscribe to future snapshots.
    #[must_use]
    pub fn subscribe(&self) -> SettingsWatcher {
        let mut receiver = self.sender.subscribe();
        receiver.mark_unchanged();
        SettingsWatcher { receiver }
    }

    /// Replace the snapshot wholesale, bumping the revision past the current one.
    pub fn replace(&self, mut settings: SeederSettings) -> Arc<SeederSettings> {
        let mut published = None;
        self.sender.send_modify(|current| {
            settings.revision = current.revision.wrapping_add(1);
            let next = Arc::new(settings.clone());
            *current = Arc::clone(&next);
            published = Some(next);
        });
        let snapshot = published.unwrap_or_else(|| self.snapshot());
        info!(revision = snapshot.revision, "seeder settings replaced");
        snapshot
    }

    /// Apply a single typed change and publish the successor snapshot.
    pub fn apply(&self, change: &SettingsChange) -> Arc<SeederSettings> {
        let mut published = None;
        self.sender.send_modify(|current| {
            let next = Arc::new(change.apply_to(current));
            *current = Arc::clone(&next);
            published = Some(next);
        });
        let snapshot = published.unwrap_or_else(|| self.snapshot());
        info!(
            field = %change.field(),
            revision = snapshot.revision,
            "seeder setting changed"
        );
        snapshot
    }

    /// Parse and apply a raw `(field, value)` notification.
    ///
    /// # Errors
    ///
    /// Returns an error when the field is unknown or the value is invalid; the
    /// current snapshot is left untouched.
    pub fn apply_raw(&self, field: &str, value: &str) -> ConfigResult<Arc<SeederSettings>> {
        let field = field.parse::<SettingsField>()?;
        let change = SettingsChange::parse(field, value)?;
        Ok(self.apply(&change))
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(SeederSettings::default())
    }
}

/// Receives every snapshot published after subscription.
pub struct SettingsWatcher {
    receiver: watch::Receiver<Arc<SeederSettings>>,
}

impl SettingsWatcher {
    /// Await the next published snapshot; `None` once the store is dropped.
    pub async fn next(&mut self) -> Option<Arc<SeederSettings>> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&self.receiver.borrow_and_update()))
    }

    /// Latest snapshot without waiting.
    #[must_use]
    pub fn current(&self) -> Arc<SeederSettings> {
        Arc::clone(&self.receiver.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn watcher_observes_applied_change() -> anyhow::Result<()> {
        let store = SettingsStore::default();
        let mut watcher = store.subscribe();

        let held = store.snapshot();
        store.apply(&SettingsChange::SeederEnabled(true));

        let next = timeout(Duration::from_secs(1), watcher.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("store dropped"))?;
        assert!(next.seeder_enabled);
        assert_eq!(next.revision, 1);
        assert!(!held.seeder_enabled, "held snapshot must not change");
        Ok(())
    }

    #[test]
    fn apply_raw_rejects_unknown_fields_without_publishing() {
        let store = SettingsStore::default();
        let result = store.apply_raw("colour", "blue");
        assert!(matches!(result, Err(ConfigError::UnknownField { .. })));
        assert_eq!(store.snapshot().revision, 0);
    }

    #[test]
    fn replace_bumps_revision() {
        let store = SettingsStore::default();
        store.apply(&SettingsChange::FileSizeThresholdMb(4));
        let replaced = store.replace(SeederSettings {
            seeder_enabled: true,
            ..SeederSettings::default()
        });
        assert_eq!(replaced.revision, 2);
        assert_eq!(store.snapshot().file_size_threshold_mb, None);
    }
}
