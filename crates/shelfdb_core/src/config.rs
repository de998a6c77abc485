//! Engine configuration.

/// The largest key a key generator will hand out (2^53).
pub const DEFAULT_MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// Configuration shared by every database a factory opens.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace prepended to every storage backend key.
    pub storage_prefix: String,

    /// Whether a transaction yields to the runtime after each drained
    /// request, giving awaiting callers a chance to queue follow-up work
    /// before the transaction is considered complete.
    pub yield_between_requests: bool,

    /// Upper bound for generated keys; generating past it fails with a
    /// `ConstraintError`.
    pub max_generated_key: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_prefix: "shelfdb/v1".to_string(),
            yield_between_requests: true,
            max_generated_key: DEFAULT_MAX_GENERATED_KEY,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage key namespace.
    #[must_use]
    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Sets whether transactions yield between drained requests.
    #[must_use]
    pub const fn yield_between_requests(mut self, value: bool) -> Self {
        self.yield_between_requests = value;
        self
    }

    /// Sets the largest key a key generator may produce.
    #[must_use]
    pub const fn max_generated_key(mut self, value: u64) -> Self {
        self.max_generated_key = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.storage_prefix, "shelfdb/v1");
        assert!(config.yield_between_requests);
        assert_eq!(config.max_generated_key, 1 << 53);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .storage_prefix("tests")
            .yield_between_requests(false)
            .max_generated_key(10);

        assert_eq!(config.storage_prefix, "tests");
        assert!(!config.yield_between_requests);
        assert_eq!(config.max_generated_key, 10);
    }
}
