//! Dbeelog configuration.

use dbeekeeper_core::{ClientId, DbeelogId};
use std::time::Duration;

/// Shortest wait of a caught-up subscription between checks.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a dbeelog handle.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log instance within the deployment.
    pub dbeelog_id: DbeelogId,
    /// Client owning this handle. Uniqueness is the caller's responsibility.
    pub client_id: ClientId,
    /// Number of client checkpoints required before a transaction may be
    /// truncated. Must be at least 1.
    pub min_checkpoints: usize,
    /// Maximum entries read from the substrate per delivery batch.
    pub read_batch: usize,
    /// How long a caught-up subscription waits for new entries before it
    /// re-checks whether it has been superseded. Never below
    /// [`MIN_POLL_INTERVAL`].
    pub poll_interval: Duration,
}

impl LogConfig {
    /// Creates a configuration with default tuning.
    pub fn new(dbeelog_id: impl Into<DbeelogId>, client_id: impl Into<ClientId>) -> Self {
        Self {
            dbeelog_id: dbeelog_id.into(),
            client_id: client_id.into(),
            min_checkpoints: 3,
            read_batch: 128,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Sets the checkpoint quorum.
    #[must_use]
    pub fn with_min_checkpoints(mut self, min: usize) -> Self {
        self.min_checkpoints = min;
        self
    }

    /// Sets the delivery batch size.
    #[must_use]
    pub fn with_read_batch(mut self, size: usize) -> Self {
        self.read_batch = size;
        self
    }

    /// Sets the subscription poll interval, clamped to
    /// [`MIN_POLL_INTERVAL`].
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }
}
