//! Canonical default values shared across the service.

/// Default per-command timeout when neither the pattern nor the environment
/// overrides it.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Bounds accepted from `MCP_SHELL_TIMEOUT`.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Default maximum concurrently executing children.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Bounds accepted from `MCP_SHELL_MAX_CONCURRENT`.
pub const MIN_MAX_CONCURRENT: usize = 1;
pub const MAX_MAX_CONCURRENT: usize = 10;

/// Queue worker tick (processor dispatch + bridge scan).
pub const QUEUE_TICK_MS: u64 = 5_000;

/// Grace window between the polite termination signal and the hard kill.
pub const KILL_GRACE_MS: u64 = 5_000;

/// How long a bridged job lingers in memory after its decision, so that
/// stats reads spanning both planes stay consistent.
pub const BRIDGE_LINGER_MS: u64 = 10_000;

/// Window an async job may sit in `pending_approval` before it times out.
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Retention sweep period.
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Age after which completed jobs are removed from disk.
pub const DEFAULT_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Maximum jobs admitted to the queue in non-terminal statuses.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Results at most this large are returned inline; larger ones by path.
pub const INLINE_RESULT_MAX_BYTES: u64 = 10 * 1024;

/// Hard cap on captured bytes per output stream.
pub const STREAM_CAP_BYTES: u64 = 100 * 1024 * 1024;

/// SSE keepalive ping period.
pub const SSE_PING_MS: u64 = 30_000;

/// Poll backoff while a job waits for approval: start/cap/multiplier.
pub const APPROVAL_POLL_INITIAL_MS: u64 = 10_000;
pub const APPROVAL_POLL_CAP_MS: u64 = 30_000;
pub const APPROVAL_POLL_FACTOR: f64 = 1.5;

/// Poll backoff while a job executes: start/cap/multiplier.
pub const EXECUTION_POLL_INITIAL_MS: u64 = 120_000;
pub const EXECUTION_POLL_CAP_MS: u64 = 900_000;
pub const EXECUTION_POLL_FACTOR: f64 = 2.0;

/// Shutdown: how long the processor waits for children before force-killing.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
