//! SSL engine adapter contract.
//!
//! Defines the capability surface a secure stream needs from a TLS engine:
//! handshake-driven `wrap`/`unwrap` over memory buffers, half-close
//! primitives, and deferred engine tasks. The engine owns cryptography,
//! certificate validation and record framing; callers only react to the
//! [`EngineStatus`] each call returns.
//!
//! # Engines
//!
//! - [`RustlsEngine`]: client or server session backed by rustls, created
//!   through a [`ServerContext`] or [`ClientContext`].

pub mod ciphers;
pub mod context;
pub mod error;
mod rustls_engine;

use std::fmt;

use bytes::Bytes;

pub use context::{
    ClientContext, ClientContextOptions, KeyStore, ServerContext, ServerContextOptions,
    TrustPolicy,
};
pub use error::{EngineError, SetupError};
pub use rustls_engine::RustlsEngine;

/// Which side of the handshake an engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Client => f.write_str("client"),
            Mode::Server => f.write_str("server"),
        }
    }
}

/// Outcome of a single `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Call completed; nothing else is required right now.
    Ok,
    /// The engine has protocol output to send before it can proceed.
    NeedWrap,
    /// The engine must process more (possibly already buffered) input.
    NeedUnwrap,
    /// A deferred task must run before the engine may be called again.
    NeedTask,
    /// Not enough ciphertext to make progress; wait for the network.
    Underflow,
    /// The close handshake finished for this direction.
    Closed,
    /// Fatal protocol error; the connection must be abandoned.
    Error,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::Ok => "OK",
            EngineStatus::NeedWrap => "NEED_WRAP",
            EngineStatus::NeedUnwrap => "NEED_UNWRAP",
            EngineStatus::NeedTask => "NEED_TASK",
            EngineStatus::Underflow => "UNDERFLOW",
            EngineStatus::Closed => "CLOSED",
            EngineStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Result of one engine call.
///
/// For `unwrap`, `data` is decrypted plaintext and `remaining` counts input
/// bytes the engine did not consume; the caller keeps those bytes and offers
/// them again on the next pass. For `wrap`, `data` is ciphertext for the
/// transport and `remaining` is always zero.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub consumed: usize,
    pub data: Option<Bytes>,
    /// True exactly once per engine, on the call that finished the handshake.
    pub just_handshaked: bool,
    pub remaining: usize,
    /// Set when `status` is [`EngineStatus::Error`].
    pub error: Option<EngineError>,
}

impl EngineResult {
    pub fn new(status: EngineStatus) -> Self {
        Self {
            status,
            consumed: 0,
            data: None,
            just_handshaked: false,
            remaining: 0,
            error: None,
        }
    }

    /// A fatal result carrying its cause.
    pub fn failed(error: EngineError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(EngineStatus::Error)
        }
    }

    /// Number of bytes in `data`.
    pub fn produced(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }
}

/// A unit of deferred engine work, e.g. certificate validation.
///
/// The engine must not be called again until the task has run and its
/// completion has been reported back to whoever drives the engine.
pub struct EngineTask {
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl EngineTask {
    pub fn new(work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            work: Box::new(work),
        }
    }

    pub fn run(self) {
        (self.work)()
    }
}

impl fmt::Debug for EngineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineTask").finish_non_exhaustive()
    }
}

/// Negotiated cipher suite and protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherDescriptor {
    pub name: String,
    pub version: String,
}

/// TLS engine driven through memory buffers.
///
/// Implementations perform no network I/O. Calls are never overlapped for
/// one engine instance.
pub trait SslEngine: Send {
    fn mode(&self) -> Mode;

    /// Start the protocol exchange. Only valid in client mode; a server
    /// starts implicitly on the first bytes it unwraps.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Encrypt `plaintext` (may be empty to drain protocol-only output).
    fn wrap(&mut self, plaintext: &[u8]) -> EngineResult;

    /// Decrypt `ciphertext` received from the peer.
    fn unwrap(&mut self, ciphertext: &[u8]) -> EngineResult;

    /// Begin the outbound half of the close handshake.
    fn close_outbound(&mut self);

    /// Mark the inbound half closed, e.g. after transport end-of-stream.
    fn close_inbound(&mut self);

    fn is_outbound_done(&self) -> bool;

    fn is_inbound_done(&self) -> bool;

    /// Take the task requested by the last `NeedTask` status.
    fn take_task(&mut self) -> Option<EngineTask>;

    /// Whether every entry of `ciphers` names a suite this engine supports.
    fn validate_ciphers(&self, ciphers: &str) -> bool;

    fn cipher(&self) -> Option<CipherDescriptor>;
}
