//! Data chunks and the notifications a stream emits.

use bytes::Bytes;

use crate::error::StreamError;

/// Application data, either raw bytes or text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Bytes(Bytes),
    Text(String),
}

impl Chunk {
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(b) => b.len(),
            Chunk::Text(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw view; text is viewed as its UTF-8 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Bytes(b) => b,
            Chunk::Text(s) => s.as_bytes(),
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(b: Bytes) -> Self {
        Chunk::Bytes(b)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(b: &'static [u8]) -> Self {
        Chunk::Bytes(Bytes::from_static(b))
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Text(s)
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Text(s.to_string())
    }
}

/// How a write callback was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The ciphertext carrying the write was handed off by the transport.
    Flushed,
    /// The stream closed before that happened.
    Closed,
}

pub type WriteCallback = Box<dyn FnOnce(WriteOutcome) + Send + 'static>;

/// Notifications for the application, in the order they occurred.
#[derive(Debug)]
pub enum StreamEvent {
    /// The handshake completed. Emitted at most once.
    Secure,
    Data(Chunk),
    /// The peer finished sending. Emitted at most once.
    End,
    /// The transport's write buffer fell below the high-water mark.
    Drain,
    /// The transport has been idle for its configured timeout.
    Timeout,
    Error(StreamError),
    /// Terminal notification. Emitted exactly once.
    Close { had_error: bool },
}
