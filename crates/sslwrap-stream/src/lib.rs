//! Sans-IO secure stream.
//!
//! [`SecureStream`] turns any [`SslEngine`](sslwrap_engine::SslEngine) into
//! a full-duplex encrypted stream on top of a byte [`Transport`]. The host
//! feeds transport notifications in through the `on_*` methods, calls the
//! application operations (`write`, `end`, `destroy`, ...) and drains
//! [`StreamEvent`]s and engine tasks after each call.
//!
//! The stream guarantees:
//! - `Secure` at most once, before any `Data`
//! - `End` at most once, and never after a local `end`
//! - exactly one `Close`, after which nothing else is emitted
//! - write callbacks resolve in submission order

mod callbacks;
pub mod encoding;
pub mod error;
pub mod event;
pub mod stream;
pub mod transport;

pub use encoding::{Decoder, Encoding};
pub use error::StreamError;
pub use event::{Chunk, StreamEvent, WriteCallback, WriteOutcome};
pub use stream::{SecureStream, StreamState};
pub use transport::Transport;
