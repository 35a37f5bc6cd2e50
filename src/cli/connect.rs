//! `sslwrap connect`: pipe stdin/stdout over a secure connection.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use sslwrap_config::LoggingConfig;
use sslwrap_core::defaults::{DEFAULT_CONNECT_HOST, DEFAULT_READ_BUFFER_SIZE};
use sslwrap_engine::TrustPolicy;
use sslwrap_net::{ConnectOptions, connect};
use sslwrap_stream::StreamEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::init_tracing;

#[derive(Parser, Debug, Clone)]
pub struct ConnectArgs {
    /// Server port
    pub port: u16,

    /// Server host
    #[arg(long, default_value = DEFAULT_CONNECT_HOST)]
    pub host: String,

    /// Name sent through SNI and verified against the certificate (defaults to the host)
    #[arg(long)]
    pub servername: Option<String>,

    /// CA bundle to trust instead of the bundled web roots
    #[arg(long, conflicts_with = "insecure")]
    pub ca: Option<PathBuf>,

    /// Accept any server certificate
    #[arg(long)]
    pub insecure: bool,

    /// Restricted cipher list (colon or comma separated)
    #[arg(long)]
    pub ciphers: Option<String>,

    /// ALPN protocols to offer (repeatable or comma-separated)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub alpn: Vec<String>,

    /// Give up if the handshake takes longer than this (seconds)
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,

    /// Log level (trace/debug/info/warn/error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl ConnectArgs {
    fn options(&self) -> ConnectOptions {
        let trust = if self.insecure {
            TrustPolicy::TrustEverybody
        } else if let Some(ca) = &self.ca {
            TrustPolicy::TrustStore(ca.clone())
        } else {
            TrustPolicy::Default
        };
        let mut options = ConnectOptions::new(self.host.clone(), self.port);
        options.servername = self.servername.clone();
        options.trust = trust;
        options.ciphers = self.ciphers.clone();
        options.alpn = self.alpn.clone();
        if let Some(secs) = self.handshake_timeout_secs {
            options.handshake_timeout = Some(Duration::from_secs(secs));
        }
        options
    }
}

pub async fn run(args: ConnectArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the connection's data.
    init_tracing(&LoggingConfig {
        level: Some(args.log_level.clone()),
        ..Default::default()
    });

    let mut socket = connect(args.options()).await?;
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    let mut stdin_open = true;
    let mut waiting_drain = false;
    let mut failed = false;

    loop {
        tokio::select! {
            event = socket.next_event() => match event {
                Some(StreamEvent::Secure) => {
                    match socket.cipher().await {
                        Some(cipher) => info!(
                            peer = %socket.peer_addr(),
                            cipher = %cipher.name,
                            version = %cipher.version,
                            "secure connection established"
                        ),
                        None => info!(peer = %socket.peer_addr(), "secure connection established"),
                    }
                }
                Some(StreamEvent::Data(chunk)) => {
                    stdout.write_all(chunk.as_bytes()).await?;
                    stdout.flush().await?;
                }
                Some(StreamEvent::End) => debug!("server finished sending"),
                Some(StreamEvent::Drain) => waiting_drain = false,
                Some(StreamEvent::Timeout) => {}
                Some(StreamEvent::Error(e)) => {
                    warn!(error = %e, "connection failed");
                    failed = true;
                }
                Some(StreamEvent::Close { had_error }) => {
                    failed |= had_error;
                    break;
                }
                None => break,
            },
            read = stdin.read(&mut buf), if stdin_open && !waiting_drain => match read {
                Ok(0) => {
                    stdin_open = false;
                    let _ = socket.end(None).await;
                }
                Ok(n) => match socket.write(Bytes::copy_from_slice(&buf[..n])).await {
                    Ok(accepted) => waiting_drain = !accepted,
                    Err(e) => {
                        debug!(error = %e, "write rejected");
                        stdin_open = false;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                    let _ = socket.end(None).await;
                }
            },
        }
    }

    if failed {
        return Err("connection closed with an error".into());
    }
    Ok(())
}
