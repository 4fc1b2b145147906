use std::sync::Arc;

/// Errors produced by the cache store and the prefetch orchestrator.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(
        "Capacity exceeded: {requested_bytes} bytes requested, {available_bytes} bytes and {available_slots} slots available"
    )]
    CapacityExceeded {
        requested_bytes: u64,
        available_bytes: u64,
        available_slots: usize,
    },

    #[error("Item too large: {size} bytes exceeds the cache limit of {max} bytes")]
    ItemTooLarge { size: u64, max: u64 },

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Prefetch already in flight for {0}")]
    AlreadyInFlight(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Prefetch orchestrator has been shut down")]
    ShutDown,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Whether this error is an explicit cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }

    /// Per-item failures that a batch logs and moves past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::CapacityExceeded { .. }
                | CacheError::ItemTooLarge { .. }
                | CacheError::FetchFailed(_)
                | CacheError::AlreadyInFlight(_)
                | CacheError::Cancelled
        )
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::FetchFailed(err.to_string())
    }
}

/// Errors raised while measuring the environment. They only ever select a
/// fallback configuration; they never abort construction.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ProbeError {
    #[error("Measurement unavailable: {0}")]
    Unavailable(String),
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("Probe timed out")]
    Timeout,
}

// Manual implementation because of the Arc wrapping.
impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        ProbeError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ProbeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ProbeError::Timeout
    }
}
