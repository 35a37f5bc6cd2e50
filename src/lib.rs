//! # sslwrap
//!
//! Drive any wrap/unwrap TLS engine as a full-duplex encrypted stream.
//!
//! ## Crates
//!
//! - [`sslwrap_core`] - Shared defaults and error labels
//! - [`sslwrap_engine`] - Engine adapter contract and the rustls engine
//! - [`sslwrap_stream`] - Sans-IO secure stream state machine
//! - [`sslwrap_net`] - Tokio listener, connector and socket handle
//! - [`sslwrap_config`] - Configuration loading and validation
//! - [`sslwrap_metrics`] - Prometheus-compatible metrics
//! - [`sslwrap_cert`] - Self-signed keystore generation

pub use sslwrap_cert as cert;
pub use sslwrap_config as config;
pub use sslwrap_core as core;
pub use sslwrap_engine as engine;
pub use sslwrap_metrics as metrics;
pub use sslwrap_net as net;
pub use sslwrap_stream as stream;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sslwrap_engine::{KeyStore, RustlsEngine, SslEngine, TrustPolicy};
    pub use sslwrap_net::{
        ConnectOptions, SecureListener, SecureServer, SecureSocket, ServerOptions, connect,
    };
    pub use sslwrap_stream::{Chunk, SecureStream, StreamEvent, Transport, WriteOutcome};
}
