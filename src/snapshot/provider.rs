use std::sync::Arc;

use tokio::sync::watch;

use super::ConfigSnapshot;
use crate::config::CleanerConfig;

/// Hands out the current [`ConfigSnapshot`], rebuilding it only when a new
/// configuration has been published on the watch channel.
pub struct SnapshotProvider {
    config: watch::Receiver<Arc<CleanerConfig>>,
    current: Arc<ConfigSnapshot>,
}

impl SnapshotProvider {
    pub fn new(mut config: watch::Receiver<Arc<CleanerConfig>>) -> Self {
        let initial = Arc::clone(&config.borrow_and_update());
        Self {
            config,
            current: Arc::new(build(&initial)),
        }
    }

    /// The snapshot for the next run.
    ///
    /// If the sending side is gone, the last snapshot keeps being served.
    pub fn current(&mut self) -> Arc<ConfigSnapshot> {
        if self.config.has_changed().unwrap_or(false) {
            let config = Arc::clone(&self.config.borrow_and_update());
            self.current = Arc::new(build(&config));
        }
        Arc::clone(&self.current)
    }
}

fn build(config: &CleanerConfig) -> ConfigSnapshot {
    let snapshot = ConfigSnapshot::resolve(config);
    tracing::info!(
        sources = snapshot.sources.len(),
        package_groups = snapshot.group_count(),
        issues = snapshot.issues.len(),
        "Resolved configuration snapshot:\n{}",
        snapshot.summary()
    );
    snapshot
}
