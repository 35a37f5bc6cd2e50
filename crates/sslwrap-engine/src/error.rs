//! Engine and setup error types.

use sslwrap_core::{ERROR_CONFIG, ERROR_IO, ERROR_PROTOCOL, ERROR_SETUP};

/// Errors raised by an engine while a session is running.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
    #[error("session buffer: {0}")]
    Buffer(String),
    #[error("begin_handshake is only valid in client mode")]
    NotClientMode,
}

/// Errors raised while building contexts, before any connection exists.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("keystore (certificate and private key) is required for the server role")]
    MissingKeystore,
    #[error("invalid cipher list: {0}")]
    InvalidCiphers(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls: {0}")]
    Tls(#[from] rustls::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

impl SetupError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SetupError::MissingKeystore | SetupError::InvalidCiphers(_) => ERROR_SETUP,
            SetupError::Io(_) => ERROR_IO,
            SetupError::Tls(_) | SetupError::Engine(_) => ERROR_PROTOCOL,
            SetupError::Config(_) => ERROR_CONFIG,
        }
    }
}
