//! The TCP side of a secure connection.
//!
//! Ciphertext handed to [`TcpTransport`] is queued to a writer task that owns
//! the socket's write half. The writer reports every finished chunk back to
//! the driver, which turns it into write completions and drain signals.

use std::io;

use bytes::Bytes;
use sslwrap_metrics::record_bytes_sent;
use sslwrap_stream::Transport;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

enum WriterCommand {
    Data { seq: u64, data: Bytes },
    Shutdown,
    Close,
}

/// Reported by the writer task.
pub(crate) enum WriterEvent {
    Written { seq: u64, len: usize },
    Failed(io::Error),
}

pub(crate) struct TcpTransport {
    commands: mpsc::UnboundedSender<WriterCommand>,
    writer: JoinHandle<()>,
    buffered: usize,
    high_water_mark: usize,
    drain_pending: bool,
    paused: bool,
    closing: bool,
}

impl TcpTransport {
    pub(crate) fn new(
        half: OwnedWriteHalf,
        high_water_mark: usize,
    ) -> (Self, mpsc::UnboundedReceiver<WriterEvent>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(half, rx, events));
        let transport = Self {
            commands,
            writer,
            buffered: 0,
            high_water_mark,
            drain_pending: false,
            paused: false,
            closing: false,
        };
        (transport, events_rx)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// Account for `len` bytes the writer finished. Returns true when the
    /// buffer just fell below the high-water mark after a rejected write.
    pub(crate) fn complete(&mut self, len: usize) -> bool {
        self.buffered = self.buffered.saturating_sub(len);
        if self.drain_pending && self.buffered < self.high_water_mark {
            self.drain_pending = false;
            return true;
        }
        false
    }

    /// Stop the writer without flushing.
    pub(crate) fn abort(&mut self) {
        self.closing = true;
        self.writer.abort();
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: Bytes, seq: u64) -> bool {
        if self.closing {
            return false;
        }
        self.buffered += data.len();
        if self.commands.send(WriterCommand::Data { seq, data }).is_err() {
            return false;
        }
        let accepted = self.buffered < self.high_water_mark;
        if !accepted {
            self.drain_pending = true;
        }
        accepted
    }

    fn needs_drain(&self) -> bool {
        self.buffered >= self.high_water_mark
    }

    fn shutdown_write(&mut self) {
        let _ = self.commands.send(WriterCommand::Shutdown);
    }

    fn close(&mut self) {
        if !self.closing {
            self.closing = true;
            let _ = self.commands.send(WriterCommand::Close);
        }
    }

    fn destroy(&mut self) {
        self.abort();
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    events: mpsc::UnboundedSender<WriterEvent>,
) {
    let mut shut = false;
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Data { seq, data } => {
                if let Err(err) = half.write_all(&data).await {
                    let _ = events.send(WriterEvent::Failed(err));
                    return;
                }
                record_bytes_sent(data.len() as u64);
                let _ = events.send(WriterEvent::Written {
                    seq,
                    len: data.len(),
                });
            }
            WriterCommand::Shutdown => {
                if !shut {
                    shut = true;
                    if let Err(err) = half.shutdown().await {
                        debug!(error = %err, "write shutdown failed");
                    }
                }
            }
            WriterCommand::Close => {
                if !shut && let Err(err) = half.shutdown().await {
                    debug!(error = %err, "write shutdown failed");
                }
                return;
            }
        }
    }
}
