/**
 * Configuration constants for the deployment controller
 */
use std::time::Duration;

/// Default number of parallel reconcile workers
pub const DEFAULT_WORKERS: usize = 1;

/// Maximum number of deliveries for a failing key before it is dropped
pub const MAX_RETRIES: u32 = 5;

/// Base delay before the first rate-limited redelivery
pub const RETRY_BASE_DELAY_MS: u64 = 5;

/// Cap on the per-key exponential backoff delay
pub const RETRY_MAX_DELAY_SECS: u64 = 1000;

/// How long `run` waits for the initial cache sync before giving up
pub const SYNC_TIMEOUT_SECS: u64 = 60;

/// Maximum number of restart attempts for the watch stream
pub const MAX_WATCH_RESTARTS: u32 = 50;

/// Maximum backoff time in seconds between watch restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial watch restart backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Brief delay between watch restart attempts in seconds
pub const RESTART_DELAY_SECONDS: u64 = 1;

/// Annotation holding the bug tracker reference, per
/// <https://ambassadorlabs.github.io/k8s-for-humans/>
pub const DEFAULT_BUG_ANNOTATION: &str = "a8r.io/bugs";

/// Tunables threaded through the controller at construction
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of parallel reconcile workers
    pub workers: usize,
    /// Delivery budget for a failing key
    pub max_retries: u32,
    /// Base delay for per-key exponential backoff
    pub retry_base_delay: Duration,
    /// Cap on per-key backoff
    pub retry_max_delay: Duration,
    /// Bound on the startup cache sync wait
    pub sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            retry_max_delay: Duration::from_secs(RETRY_MAX_DELAY_SECS),
            sync_timeout: Duration::from_secs(SYNC_TIMEOUT_SECS),
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_RETRIES > 0, "MAX_RETRIES must be greater than 0");
    assert!(RETRY_BASE_DELAY_MS > 0, "RETRY_BASE_DELAY_MS must be greater than 0");
    assert!(SYNC_TIMEOUT_SECS > 0, "SYNC_TIMEOUT_SECS must be greater than 0");
    assert!(MAX_WATCH_RESTARTS > 0, "MAX_WATCH_RESTARTS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
};
