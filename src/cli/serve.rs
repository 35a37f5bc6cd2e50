//! `sslwrap serve`: terminate TLS and relay plaintext to a backend.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use sslwrap_config::{CliOverrides, Config, apply_overrides, load_config, validate_config};
use sslwrap_core::defaults::DEFAULT_READ_BUFFER_SIZE;
use sslwrap_engine::KeyStore;
use sslwrap_net::{SecureServer, SecureSocket, ServerOptions};
use sslwrap_stream::StreamEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{init_tracing, shutdown_signal};

/// TLS terminator arguments.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Config file path (json/jsonc/yaml/toml)
    #[arg(short, long, default_value = "sslwrap.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

pub async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match sslwrap_metrics::init_prometheus(listen) {
            Ok(()) => info!("metrics exporter listening on {}", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let shutdown = CancellationToken::new();
    let shutdown_signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_signal_token.cancel();
    });

    run_with_shutdown(config, shutdown).await
}

/// Serve until `shutdown` is cancelled, then give open connections
/// `shutdown_timeout_secs` to finish.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = SecureServer::new(server_options(&config))?;
    let addr = lookup_host(&config.server.listen)
        .await?
        .next()
        .ok_or_else(|| format!("cannot resolve {}", config.server.listen))?;
    let mut listener = server.listen_with_shutdown(addr, shutdown.clone()).await?;
    info!(backend = %config.server.backend, "relaying secure connections");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Some(socket) => {
                    tokio::spawn(relay(socket, config.server.backend.clone()));
                }
                None => break,
            },
        }
    }

    listener.close();
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    if !listener.drain(grace).await {
        warn!(
            remaining = listener.connections(),
            "connections still open after shutdown timeout"
        );
    }
    info!("server stopped");
    Ok(())
}

fn server_options(config: &Config) -> ServerOptions {
    let idle = config.server.idle_timeout_secs;
    ServerOptions {
        keystore: Some(KeyStore {
            cert: PathBuf::from(&config.tls.cert),
            key: PathBuf::from(&config.tls.key),
        }),
        truststore: config.tls.truststore.as_ref().map(PathBuf::from),
        ciphers: config.tls.ciphers.clone(),
        min_version: Some(config.tls.min_version.clone()),
        max_version: Some(config.tls.max_version.clone()),
        alpn: config.tls.alpn.clone(),
        handshake_timeout: Duration::from_secs(config.server.handshake_timeout_secs),
        idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
        high_water_mark: config.server.high_water_mark,
        backlog: config.server.backlog,
        no_delay: config.server.no_delay,
    }
}

/// Pump one secure connection to and from a fresh backend connection.
/// Backend reads stop while the secure side is above its high-water mark.
async fn relay(mut socket: SecureSocket, backend: String) {
    let id = socket.id();
    let upstream = match TcpStream::connect(&backend).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(id, backend = %backend, error = %e, "backend connect failed");
            socket.destroy();
            return;
        }
    };
    debug!(id, peer = %socket.peer_addr(), backend = %backend, "relay started");

    let (mut upstream_rd, mut upstream_wr) = upstream.into_split();
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    let mut upstream_open = true;
    let mut waiting_drain = false;

    loop {
        tokio::select! {
            event = socket.next_event() => match event {
                Some(StreamEvent::Data(chunk)) => {
                    if let Err(e) = upstream_wr.write_all(chunk.as_bytes()).await {
                        debug!(id, error = %e, "backend write failed");
                        socket.destroy();
                    }
                }
                Some(StreamEvent::End) => {
                    let _ = upstream_wr.shutdown().await;
                }
                Some(StreamEvent::Drain) => waiting_drain = false,
                Some(StreamEvent::Timeout) => {
                    debug!(id, "idle timeout");
                    let _ = socket.end(None).await;
                }
                Some(StreamEvent::Error(e)) => {
                    debug!(id, error = %e, "secure side failed");
                }
                Some(StreamEvent::Secure) => {}
                Some(StreamEvent::Close { .. }) | None => break,
            },
            read = upstream_rd.read(&mut buf), if upstream_open && !waiting_drain => match read {
                Ok(0) | Err(_) => {
                    upstream_open = false;
                    let _ = socket.end(None).await;
                }
                Ok(n) => match socket.write(Bytes::copy_from_slice(&buf[..n])).await {
                    Ok(accepted) => waiting_drain = !accepted,
                    Err(e) => {
                        debug!(id, error = %e, "secure write failed");
                        upstream_open = false;
                    }
                },
            },
        }
    }
    debug!(id, "relay finished");
}
