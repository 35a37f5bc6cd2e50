//! Secure listener and connector on tokio.
//!
//! Each TCP connection gets its own engine and a driver task that owns the
//! [`SecureStream`](sslwrap_stream::SecureStream) for it. Applications talk
//! to the driver through a [`SecureSocket`].
//!
//! ```no_run
//! # async fn demo(keystore: sslwrap_engine::KeyStore) -> Result<(), Box<dyn std::error::Error>> {
//! use sslwrap_net::{SecureServer, ServerOptions};
//! use sslwrap_stream::StreamEvent;
//!
//! let server = SecureServer::new(ServerOptions::new(keystore))?;
//! let mut listener = server.listen("127.0.0.1:8443".parse()?).await?;
//! while let Some(mut socket) = listener.accept().await {
//!     tokio::spawn(async move {
//!         while let Some(event) = socket.next_event().await {
//!             if let StreamEvent::Data(chunk) = event {
//!                 let _ = socket.write(chunk).await;
//!             }
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod driver;
pub mod error;
pub mod options;
mod server;
mod socket;
mod transport;
mod util;

pub use client::connect;
pub use error::{ClientError, ServerError};
pub use options::{ConnectOptions, ServerOptions};
pub use server::{SecureListener, SecureServer};
pub use socket::SecureSocket;
