//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

use std::time::Duration;

// ============================================================================
// Admission Defaults
// ============================================================================

/// Length of the secret hash read after the TLS handshake (SHA-256).
pub const AUTH_HASH_LEN: usize = 32;
/// Capacity of the first-read buffer the admission pipeline caches.
pub const INITIAL_READ_BUFFER: usize = 16 * 1024;

// ============================================================================
// Brute-force Throttling Defaults
// ============================================================================

/// Failures tolerated inside one window before a ban.
pub const MAX_AUTH_FAILURES: u32 = 10;
/// Sliding window for counting authentication failures.
pub const FAIL_WINDOW: Duration = Duration::from_secs(60);
/// How long a banned source address stays banned.
pub const BAN_DURATION: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Speed Limit Defaults
// ============================================================================

/// 1 Mbps expressed in bytes per second.
pub const BYTES_PER_MBIT: u64 = 125_000;
/// Burst allowance per Mbps of configured cap (128 KiB).
pub const BURST_PER_MBIT: u64 = 128 * 1024;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Dial timeout for the fallback decoy target.
pub const FALLBACK_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default graceful shutdown deadline.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Pull/push period used when the node config supplies none.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Listener Socket Defaults
// ============================================================================

/// Default TCP listener backlog.
pub const CONNECTION_BACKLOG: u32 = 1024;
