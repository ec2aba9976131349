//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of changes in one push.
    pub max_push_batch: usize,
    /// Maximum number of unresolved conflicts kept for manual resolution.
    /// The oldest are dropped first.
    pub max_stored_conflicts: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_push_batch: 1_000,
            max_stored_conflicts: 10_000,
        }
    }

    /// Sets the maximum push batch size.
    #[must_use]
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets how many unresolved conflicts are kept.
    #[must_use]
    pub fn with_max_stored_conflicts(mut self, count: usize) -> Self {
        self.max_stored_conflicts = count;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_push_batch, 1_000);
        assert_eq!(config.max_stored_conflicts, 10_000);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_push_batch(50)
            .with_max_stored_conflicts(3);
        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.max_stored_conflicts, 3);
    }
}
