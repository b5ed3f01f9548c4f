//! Key/value dbee configuration.

/// Configuration for a [`crate::KvDbee`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbeeConfig {
    /// Longest key accepted by `set` and `del`, in bytes.
    pub max_key_len: usize,
    /// Maximum number of keys, or `None` for unbounded.
    ///
    /// A `set` that would exceed the limit fails with a fatal storage error.
    pub max_entries: Option<usize>,
    /// Whether snapshot files are fsynced before being renamed into place.
    pub sync_snapshots: bool,
}

impl Default for DbeeConfig {
    fn default() -> Self {
        Self {
            max_key_len: 256,
            max_entries: None,
            sync_snapshots: true,
        }
    }
}

impl DbeeConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum key length.
    #[must_use]
    pub const fn max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }

    /// Sets the maximum number of keys.
    #[must_use]
    pub const fn max_entries(mut self, entries: usize) -> Self {
        self.max_entries = Some(entries);
        self
    }

    /// Sets whether snapshots are fsynced.
    #[must_use]
    pub const fn sync_snapshots(mut self, sync: bool) -> Self {
        self.sync_snapshots = sync;
        self
    }
}
