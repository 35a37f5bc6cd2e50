//! Secure listener: accept TCP connections, hand out secured sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sslwrap_engine::ServerContext;
use sslwrap_metrics::record_error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{self, Delivery};
use crate::error::ServerError;
use crate::options::ServerOptions;
use crate::socket::SecureSocket;
use crate::util::{ConnectionTracker, apply_tcp_options, create_listener};

/// Validated server setup. Creating it loads the keystore and checks the
/// cipher list, so bad credentials fail before any port is bound.
#[derive(Clone)]
pub struct SecureServer {
    context: Arc<ServerContext>,
    options: ServerOptions,
}

impl SecureServer {
    pub fn new(options: ServerOptions) -> Result<Self, ServerError> {
        let context = ServerContext::new(&options.context_options())?;
        Ok(Self {
            context: Arc::new(context),
            options,
        })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Bind `addr` and start accepting.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SecureListener, ServerError> {
        self.listen_with_shutdown(addr, CancellationToken::new())
            .await
    }

    /// Like [`listen`](Self::listen); cancelling `shutdown` stops the
    /// accept loop.
    pub async fn listen_with_shutdown(
        &self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<SecureListener, ServerError> {
        let shutdown = shutdown.child_token();
        let listener = create_listener(addr, self.options.backlog)?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, backlog = self.options.backlog, "listening");

        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let tracker = ConnectionTracker::new();
        tokio::spawn(accept_loop(
            listener,
            self.clone(),
            accepted_tx,
            tracker.clone(),
            shutdown.clone(),
        ));

        Ok(SecureListener {
            local_addr,
            accepted,
            tracker,
            shutdown,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    server: SecureServer,
    accepted: mpsc::UnboundedSender<SecureSocket>,
    tracker: ConnectionTracker,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = match result {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");

                if let Err(err) = apply_tcp_options(&tcp, server.options.no_delay) {
                    debug!(peer = %peer, error = %err, "failed to set socket options");
                }
                let engine = match server.context.create_engine() {
                    Ok(engine) => engine,
                    Err(err) => {
                        warn!(peer = %peer, error = %err, "failed to create engine");
                        record_error(sslwrap_core::ERROR_SETUP);
                        continue;
                    }
                };
                let delivery = Delivery::OnSecure {
                    accepted: accepted.clone(),
                    guard: tracker.guard(),
                };
                if let Err(err) = driver::spawn(engine, tcp, server.options.driver_config(), delivery) {
                    warn!(peer = %peer, error = %err, "failed to start connection");
                    record_error(err.error_type());
                }
            }
        }
    }
}

/// A bound listener. Secured connections arrive through
/// [`accept`](Self::accept).
pub struct SecureListener {
    local_addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<SecureSocket>,
    tracker: ConnectionTracker,
    shutdown: CancellationToken,
}

impl SecureListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next connection whose handshake completed. Returns `None` once the
    /// listener is closed and every connection already secured was taken.
    pub async fn accept(&mut self) -> Option<SecureSocket> {
        tokio::select! {
            biased;

            socket = self.accepted.recv() => socket,
            _ = self.shutdown.cancelled() => self.accepted.try_recv().ok(),
        }
    }

    /// Open connections, including those still handshaking.
    pub fn connections(&self) -> usize {
        self.tracker.count()
    }

    /// Stop accepting. Open connections keep running.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until every open connection finished, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let active = self.tracker.count();
        if active > 0 {
            info!("waiting for {} active connections to drain", active);
        }
        self.tracker.wait_for_zero(timeout).await
    }
}

impl Drop for SecureListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
