//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Stream Defaults
// ============================================================================

/// Transport write-buffer high-water mark in bytes. Writes that push the
/// buffered total to or past this report `false` to the application.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;
/// Size of a single transport read (one TLS record plus overhead).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024 + 2048;
/// Encoding used for text writes that name none.
pub const DEFAULT_ENCODING: &str = "utf8";
/// Consecutive drive-loop steps without progress before the engine is
/// declared broken.
pub const MAX_IDLE_DRIVE_STEPS: usize = 8;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default TLS handshake timeout in seconds.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Default socket idle timeout in seconds (0 = disabled).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Host used by the connector when none is given.
pub const DEFAULT_CONNECT_HOST: &str = "localhost";

// ============================================================================
// TLS Defaults
// ============================================================================

/// Default minimum TLS version.
pub const DEFAULT_TLS_MIN_VERSION: &str = "tls12";
/// Default maximum TLS version.
pub const DEFAULT_TLS_MAX_VERSION: &str = "tls13";
