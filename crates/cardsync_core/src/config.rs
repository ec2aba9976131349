//! Local store configuration.

/// Configuration for opening a local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to fsync every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Pending log size above which enqueueing logs a warning.
    ///
    /// The log is never truncated; the warning only flags devices that have
    /// been offline for a long time.
    pub pending_warn_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            pending_warn_threshold: 10_000,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to fsync on commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the pending log warning threshold.
    #[must_use]
    pub const fn pending_warn_threshold(mut self, value: usize) -> Self {
        self.pending_warn_threshold = value;
        self
    }
}
