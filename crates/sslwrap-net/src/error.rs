//! Listener and connector error types.

use sslwrap_core::{ERROR_CONFIG, ERROR_IO, ERROR_RESOLVE};
use sslwrap_engine::SetupError;
use sslwrap_stream::StreamError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("setup: {0}")]
    Setup(#[from] SetupError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Setup(e) => e.error_type(),
            ServerError::Io(_) => ERROR_IO,
            ServerError::Config(_) => ERROR_CONFIG,
        }
    }
}

/// Errors that can occur while opening a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("setup: {0}")]
    Setup(#[from] SetupError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("DNS resolution failed for {0}")]
    Resolve(String),
    #[error("stream: {0}")]
    Stream(#[from] StreamError),
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::Setup(e) => e.error_type(),
            ClientError::Io(_) => ERROR_IO,
            ClientError::Resolve(_) => ERROR_RESOLVE,
            ClientError::Stream(e) => e.error_type(),
            ClientError::Config(_) => ERROR_CONFIG,
        }
    }
}
