//! Application handle for one secure connection.

use std::net::SocketAddr;
use std::time::Duration;

use sslwrap_engine::{CipherDescriptor, Mode};
use sslwrap_stream::{Chunk, StreamError, StreamEvent, WriteCallback, WriteOutcome};
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, StreamError>>;

/// Requests from a [`SecureSocket`] to its driver task.
pub(crate) enum Command {
    Write {
        data: Chunk,
        encoding: Option<String>,
        callback: Option<WriteCallback>,
        reply: Reply<bool>,
    },
    End {
        data: Option<Chunk>,
        encoding: Option<String>,
        reply: Reply<()>,
    },
    SetEncoding {
        name: String,
        reply: Reply<()>,
    },
    SetTimeout(Option<Duration>),
    Pause,
    Resume,
    Cipher(oneshot::Sender<Option<CipherDescriptor>>),
    Destroy,
}

/// A secure connection, as seen by the application.
///
/// Events arrive in order through [`next_event`](Self::next_event). The
/// last one is always [`StreamEvent::Close`]; after it `next_event` returns
/// `None`. Dropping the handle destroys the connection.
pub struct SecureSocket {
    id: u64,
    mode: Mode,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl std::fmt::Debug for SecureSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSocket")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl SecureSocket {
    pub(crate) fn new(
        id: u64,
        mode: Mode,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        commands: mpsc::UnboundedSender<Command>,
        events: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        Self {
            id,
            mode,
            local_addr,
            peer_addr,
            commands,
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Write bytes or utf8 text. Returns `false` when the connection's
    /// outbound buffer is full; wait for [`StreamEvent::Drain`] before
    /// writing more.
    pub async fn write(&self, data: impl Into<Chunk>) -> Result<bool, StreamError> {
        self.send_write(data.into(), None, None).await
    }

    /// Write text converted with the named encoding.
    pub async fn write_encoded(&self, text: &str, encoding: &str) -> Result<bool, StreamError> {
        self.send_write(Chunk::from(text), Some(encoding.to_string()), None)
            .await
    }

    pub async fn write_with_callback(
        &self,
        data: impl Into<Chunk>,
        callback: WriteCallback,
    ) -> Result<bool, StreamError> {
        self.send_write(data.into(), None, Some(callback)).await
    }

    /// Write and wait until the ciphertext carrying `data` was handed to the
    /// socket, or the connection closed first.
    pub async fn write_flushed(&self, data: impl Into<Chunk>) -> Result<WriteOutcome, StreamError> {
        let (tx, rx) = oneshot::channel();
        let callback: WriteCallback = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        self.send_write(data.into(), None, Some(callback)).await?;
        rx.await.map_err(|_| StreamError::Closed)
    }

    async fn send_write(
        &self,
        data: Chunk,
        encoding: Option<String>,
        callback: Option<WriteCallback>,
    ) -> Result<bool, StreamError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Write {
            data,
            encoding,
            callback,
            reply,
        };
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            if let Command::Write {
                callback: Some(callback),
                ..
            } = command
            {
                callback(WriteOutcome::Closed);
            }
            return Err(StreamError::Closed);
        }
        rx.await.unwrap_or(Err(StreamError::Closed))
    }

    /// Finish the outbound direction, optionally writing `data` first.
    pub async fn end(&self, data: Option<Chunk>) -> Result<(), StreamError> {
        self.request(|reply| Command::End {
            data,
            encoding: None,
            reply,
        })
        .await
    }

    /// Write text converted with the named encoding, then finish the
    /// outbound direction.
    pub async fn end_encoded(&self, text: &str, encoding: &str) -> Result<(), StreamError> {
        self.request(|reply| Command::End {
            data: Some(Chunk::from(text)),
            encoding: Some(encoding.to_string()),
            reply,
        })
        .await
    }

    /// Decode received data as text from now on.
    pub async fn set_encoding(&self, name: &str) -> Result<(), StreamError> {
        let name = name.to_string();
        self.request(|reply| Command::SetEncoding { name, reply })
            .await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, StreamError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| StreamError::Closed)?;
        rx.await.unwrap_or(Err(StreamError::Closed))
    }

    /// Emit [`StreamEvent::Timeout`] after `timeout` of inactivity.
    /// `None` disables it.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let _ = self.commands.send(Command::SetTimeout(timeout));
    }

    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Negotiated suite and protocol version, once the handshake is done.
    pub async fn cipher(&self) -> Option<CipherDescriptor> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Cipher(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Sever the connection without a close handshake.
    pub fn destroy(&self) {
        let _ = self.commands.send(Command::Destroy);
    }
}

impl Drop for SecureSocket {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Destroy);
    }
}
