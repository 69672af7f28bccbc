//! Search configuration constants and sub-configs.

use std::time::Duration;

/// Default worker pool size.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Maximum worker pool size. More workers than this against one slow
/// endpoint only invites rate limiting.
pub const MAX_POOL_SIZE: usize = 32;

/// Retries of the same combination after a transient error. The original
/// attempt plus three retries; a combination still failing after that is
/// recorded as a no-match with the error noted and the index completes.
pub const MAX_QUERY_RETRIES: u32 = 3;

/// Per-query deadline. The endpoint is slow by design; a query past this is
/// classified transient and retried.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(75);

/// Matches buffered before a batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 300;

/// Time-based flush threshold. Also bounds how stale the checkpoint can get
/// on a traversal that finds nothing.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

/// Fixed delay between persist attempts for a failed batch. Batches are
/// retried until they land; a found match is never dropped.
pub const PERSIST_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Attempts to open a worker session before the worker reports fatal.
pub const SESSION_OPEN_ATTEMPTS: u32 = 3;

/// Delay between session open attempts.
pub const SESSION_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Per-worker query behavior.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Retries of one combination on transient errors.
    pub max_retries: u32,
    /// Deadline for a single query.
    pub query_timeout: Duration,
    /// Attempts to open a session before giving up.
    pub session_open_attempts: u32,
    /// Delay between session open attempts.
    pub session_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_QUERY_RETRIES,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            session_open_attempts: SESSION_OPEN_ATTEMPTS,
            session_retry_delay: SESSION_RETRY_DELAY,
        }
    }
}

/// Batching and persistence behavior.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Matches buffered before a flush.
    pub batch_size: usize,
    /// Flush at least this often while resolutions keep arriving.
    pub flush_interval: Duration,
    /// Fixed delay between persist attempts for a failed batch.
    pub persist_retry_delay: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            persist_retry_delay: PERSIST_RETRY_DELAY,
        }
    }
}
