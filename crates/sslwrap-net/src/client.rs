//! Secure connector.

use std::net::SocketAddr;

use sslwrap_core::defaults::DEFAULT_CONNECT_HOST;
use sslwrap_engine::ClientContext;
use tokio::net::TcpStream;
use tracing::debug;

use crate::driver::{self, Delivery};
use crate::error::ClientError;
use crate::options::ConnectOptions;
use crate::socket::SecureSocket;
use crate::util::apply_tcp_options;

/// Open a secure connection.
///
/// The returned socket is usable at once: the first handshake flight is
/// already on its way, and data written before the handshake completes is
/// held by the engine. [`StreamEvent::Secure`](sslwrap_stream::StreamEvent)
/// reports completion.
pub async fn connect(mut options: ConnectOptions) -> Result<SecureSocket, ClientError> {
    let context = ClientContext::new(&options.context_options())?;
    let host = options
        .host
        .clone()
        .unwrap_or_else(|| DEFAULT_CONNECT_HOST.to_string());
    let servername = options.servername.clone().unwrap_or_else(|| host.clone());
    let engine = context.create_engine(&servername)?;

    let tcp = match options.socket.take() {
        Some(tcp) => tcp,
        None => {
            if options.port == 0 {
                return Err(ClientError::Config("port is required".into()));
            }
            let addr = resolve(&host, options.port).await?;
            debug!(remote = %addr, "connecting");
            TcpStream::connect(addr).await?
        }
    };
    apply_tcp_options(&tcp, options.no_delay)?;

    driver::spawn(engine, tcp, options.driver_config(), Delivery::Immediate)?
        .ok_or_else(|| ClientError::Config("connection handle was not returned".into()))
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ClientError> {
    let target = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    tokio::net::lookup_host(target.as_str())
        .await
        .map_err(|_| ClientError::Resolve(target.clone()))?
        .next()
        .ok_or_else(|| ClientError::Resolve(target.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ip_literals() {
        assert_eq!(
            resolve("127.0.0.1", 443).await.unwrap(),
            "127.0.0.1:443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve("::1", 8443).await.unwrap(),
            "[::1]:8443".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn unresolvable_host_names_the_target() {
        match resolve("host.invalid", 443).await {
            Err(ClientError::Resolve(target)) => assert_eq!(target, "host.invalid:443"),
            other => panic!("expected resolve error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_port_is_rejected() {
        let err = connect(ConnectOptions {
            trust: sslwrap_engine::TrustPolicy::TrustEverybody,
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
