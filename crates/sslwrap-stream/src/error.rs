//! Stream error types.

use std::io;

use sslwrap_core::{ERROR_ENGINE_CONTRACT, ERROR_INPUT, ERROR_IO, ERROR_PROTOCOL, ERROR_TIMEOUT};
use sslwrap_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The engine reported a fatal protocol error.
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("write after end")]
    WriteAfterEnd,
    #[error("stream is closed")]
    Closed,
    /// The engine returned a status sequence it is not allowed to produce.
    #[error("engine contract violated: {0}")]
    EngineContract(String),
}

impl From<EngineError> for StreamError {
    fn from(err: EngineError) -> Self {
        StreamError::Protocol(err.to_string())
    }
}

impl StreamError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            StreamError::Protocol(_) => ERROR_PROTOCOL,
            StreamError::Transport(err) if err.kind() == io::ErrorKind::TimedOut => ERROR_TIMEOUT,
            StreamError::Transport(_) | StreamError::Closed => ERROR_IO,
            StreamError::UnknownEncoding(_)
            | StreamError::InvalidInput(_)
            | StreamError::WriteAfterEnd => ERROR_INPUT,
            StreamError::EngineContract(_) => ERROR_ENGINE_CONTRACT,
        }
    }

    /// Whether the error was raised synchronously at the call site and left
    /// the stream untouched.
    pub fn is_input_error(&self) -> bool {
        self.error_type() == ERROR_INPUT
    }
}
