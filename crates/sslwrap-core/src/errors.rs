//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// Setup error (missing credentials, invalid cipher list, bad trust store).
pub const ERROR_SETUP: &str = "setup";
/// TLS handshake error or timeout.
pub const ERROR_TLS_HANDSHAKE: &str = "tls_handshake";
/// Fatal engine status during an established session.
pub const ERROR_PROTOCOL: &str = "protocol";
/// Transport I/O error.
pub const ERROR_IO: &str = "io";
/// Application passed data the stream cannot encode.
pub const ERROR_INPUT: &str = "input";
/// Engine broke its status contract.
pub const ERROR_ENGINE_CONTRACT: &str = "engine_contract";
/// DNS/address resolution error.
pub const ERROR_RESOLVE: &str = "resolve";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
