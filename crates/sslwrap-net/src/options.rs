//! Listener and connector options.

use std::path::PathBuf;
use std::time::Duration;

use sslwrap_core::defaults::{
    DEFAULT_CONNECTION_BACKLOG, DEFAULT_HIGH_WATER_MARK, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_TCP_NO_DELAY, DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS,
};
use sslwrap_engine::{ClientContextOptions, KeyStore, ServerContextOptions, TrustPolicy};
use tokio::net::TcpStream;

use crate::driver::DriverConfig;

/// Options for [`SecureServer`](crate::SecureServer).
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Certificate chain and private key. Required.
    pub keystore: Option<KeyStore>,
    /// CA bundle used to verify client certificates, if any are sent.
    pub truststore: Option<PathBuf>,
    /// Restricted cipher list, validated when the server is created.
    pub ciphers: Option<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub alpn: Vec<String>,
    /// Connections that have not completed the handshake by then are dropped.
    pub handshake_timeout: Duration,
    /// Emit `Timeout` after this much inactivity.
    pub idle_timeout: Option<Duration>,
    pub high_water_mark: usize,
    pub backlog: u32,
    pub no_delay: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            keystore: None,
            truststore: None,
            ciphers: None,
            min_version: None,
            max_version: None,
            alpn: Vec::new(),
            handshake_timeout: Duration::from_secs(DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS),
            idle_timeout: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            backlog: DEFAULT_CONNECTION_BACKLOG,
            no_delay: DEFAULT_TCP_NO_DELAY,
        }
    }
}

impl ServerOptions {
    pub fn new(keystore: KeyStore) -> Self {
        Self {
            keystore: Some(keystore),
            ..Default::default()
        }
    }

    pub(crate) fn context_options(&self) -> ServerContextOptions {
        ServerContextOptions {
            keystore: self.keystore.clone(),
            truststore: self.truststore.clone(),
            ciphers: self.ciphers.clone(),
            min_version: self.min_version.clone(),
            max_version: self.max_version.clone(),
            alpn: self.alpn.clone(),
        }
    }

    pub(crate) fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            high_water_mark: self.high_water_mark,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            handshake_timeout: Some(self.handshake_timeout),
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Options for [`connect`](crate::connect).
#[derive(Debug)]
pub struct ConnectOptions {
    /// Host to connect to. Defaults to `localhost`.
    pub host: Option<String>,
    pub port: u16,
    /// Name presented through SNI and checked against the certificate.
    /// Defaults to the host.
    pub servername: Option<String>,
    pub trust: TrustPolicy,
    pub ciphers: Option<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub alpn: Vec<String>,
    /// Run TLS over an already connected socket instead of dialing.
    pub socket: Option<TcpStream>,
    pub handshake_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub high_water_mark: usize,
    pub no_delay: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: 0,
            servername: None,
            trust: TrustPolicy::Default,
            ciphers: None,
            min_version: None,
            max_version: None,
            alpn: Vec::new(),
            socket: None,
            handshake_timeout: Some(Duration::from_secs(DEFAULT_TLS_HANDSHAKE_TIMEOUT_SECS)),
            idle_timeout: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            no_delay: DEFAULT_TCP_NO_DELAY,
        }
    }
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
            ..Default::default()
        }
    }

    /// Layer TLS onto `socket`.
    pub fn over(socket: TcpStream) -> Self {
        Self {
            socket: Some(socket),
            ..Default::default()
        }
    }

    pub(crate) fn context_options(&self) -> ClientContextOptions {
        ClientContextOptions {
            trust: self.trust.clone(),
            ciphers: self.ciphers.clone(),
            min_version: self.min_version.clone(),
            max_version: self.max_version.clone(),
            alpn: self.alpn.clone(),
        }
    }

    pub(crate) fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            high_water_mark: self.high_water_mark,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
        }
    }
}
