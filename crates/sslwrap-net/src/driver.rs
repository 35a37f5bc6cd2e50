//! Per-connection task binding a TCP socket to a [`SecureStream`].
//!
//! The driver is the only owner of the stream, so engine calls never
//! overlap. It multiplexes socket reads, writer completions, application
//! commands, finished engine tasks and timers, and forwards every stream
//! event to the [`SecureSocket`] handle.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use sslwrap_core::ERROR_TLS_HANDSHAKE;
use sslwrap_engine::{Mode, SslEngine};
use sslwrap_metrics::{
    record_bytes_received, record_connection_closed, record_connection_opened,
    record_engine_task, record_error, record_handshake_failed, record_tls_handshake_duration,
};
use sslwrap_stream::{SecureStream, StreamEvent};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::socket::{Command, SecureSocket};
use crate::transport::{TcpTransport, WriterEvent};
use crate::util::ConnectionGuard;

#[derive(Debug, Clone, Copy)]
pub(crate) struct DriverConfig {
    pub high_water_mark: usize,
    pub read_buffer_size: usize,
    pub handshake_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

/// Where the application handle goes.
pub(crate) enum Delivery {
    /// Returned to the caller right away.
    Immediate,
    /// Handed to the listener once the handshake completes.
    OnSecure {
        accepted: mpsc::UnboundedSender<SecureSocket>,
        guard: ConnectionGuard,
    },
}

struct Pending {
    socket: SecureSocket,
    accepted: mpsc::UnboundedSender<SecureSocket>,
}

struct Driver<E> {
    stream: SecureStream<E, TcpTransport>,
    reader: OwnedReadHalf,
    peer: SocketAddr,
    config: DriverConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<StreamEvent>,
    writer_events: mpsc::UnboundedReceiver<WriterEvent>,
    task_done_tx: mpsc::UnboundedSender<()>,
    task_done: mpsc::UnboundedReceiver<()>,
    pending: Option<Pending>,
    _guard: Option<ConnectionGuard>,
    started: Instant,
    handshake_deadline: Option<Instant>,
    timed_out: bool,
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
    read_eof: bool,
}

/// Bind `tcp` to a new stream over `engine` and spawn its driver.
///
/// Client engines start their handshake before this returns. With
/// [`Delivery::Immediate`] the handle is returned; otherwise it is kept by
/// the driver until the handshake completes.
pub(crate) fn spawn<E>(
    engine: E,
    tcp: TcpStream,
    config: DriverConfig,
    delivery: Delivery,
) -> Result<Option<SecureSocket>, crate::ClientError>
where
    E: SslEngine + Send + 'static,
{
    let local_addr = tcp.local_addr()?;
    let peer = tcp.peer_addr()?;
    let mode = engine.mode();
    let (reader, writer) = tcp.into_split();
    let (transport, writer_events) = TcpTransport::new(writer, config.high_water_mark);
    let mut stream = SecureStream::new(engine, transport);

    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (events, events_rx) = mpsc::unbounded_channel();
    let socket = SecureSocket::new(
        stream.id(),
        mode,
        local_addr,
        peer,
        commands_tx,
        events_rx,
    );

    record_connection_opened(match mode {
        Mode::Client => "client",
        Mode::Server => "server",
    });
    debug!(stream = stream.id(), peer = %peer, %mode, "connection opened");

    if mode == Mode::Client {
        stream.begin_handshake()?;
    }

    let (pending, guard, handle) = match delivery {
        Delivery::Immediate => (None, None, Some(socket)),
        Delivery::OnSecure { accepted, guard } => {
            (Some(Pending { socket, accepted }), Some(guard), None)
        }
    };

    let (task_done_tx, task_done) = mpsc::unbounded_channel();
    let now = Instant::now();
    let driver = Driver {
        stream,
        reader,
        peer,
        config,
        commands,
        events,
        writer_events,
        task_done_tx,
        task_done,
        pending,
        _guard: guard,
        started: now,
        handshake_deadline: config.handshake_timeout.map(|t| now + t),
        timed_out: false,
        idle_timeout: config.idle_timeout,
        idle_deadline: config.idle_timeout.map(|t| now + t),
        read_eof: false,
    };
    tokio::spawn(driver.run());
    Ok(handle)
}

impl<E: SslEngine + Send + 'static> Driver<E> {
    async fn run(mut self) {
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            self.dispatch();
            if self.stream.is_closed() {
                break;
            }

            let reading = !self.read_eof && !self.stream.transport().is_paused();
            let handshake_at = self.handshake_deadline;
            let idle_at = self.idle_deadline;

            tokio::select! {
                result = self.reader.read(&mut buf), if reading => match result {
                    Ok(0) => {
                        self.read_eof = true;
                        self.stream.on_end();
                    }
                    Ok(n) => {
                        record_bytes_received(n as u64);
                        self.touch();
                        self.stream.on_data(&buf[..n]);
                    }
                    Err(err) => self.transport_failed(err),
                },

                Some(event) = self.writer_events.recv() => match event {
                    WriterEvent::Written { seq, len } => {
                        self.touch();
                        let drained = self.stream.transport_mut().complete(len);
                        self.stream.on_write_complete(seq);
                        if drained {
                            self.stream.on_drain();
                        }
                    }
                    WriterEvent::Failed(err) => self.transport_failed(err),
                },

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => self.stream.destroy(),
                },

                Some(()) = self.task_done.recv() => self.stream.on_task_complete(),

                _ = tokio::time::sleep_until(handshake_at.unwrap_or_else(Instant::now)), if handshake_at.is_some() => {
                    self.handshake_deadline = None;
                    if !self.stream.is_handshaked() {
                        self.timed_out = true;
                        warn!(stream = self.stream.id(), peer = %self.peer, "handshake timed out");
                        self.stream.on_error(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "handshake timed out",
                        ));
                        self.stream.destroy();
                    }
                }

                _ = tokio::time::sleep_until(idle_at.unwrap_or_else(Instant::now)), if idle_at.is_some() => {
                    self.idle_deadline = self.idle_timeout.map(|t| Instant::now() + t);
                    self.stream.on_timeout();
                }
            }
        }
        self.finish();
    }

    /// Forward stream output: engine tasks to the blocking pool, events to
    /// the application.
    fn dispatch(&mut self) {
        while let Some(task) = self.stream.poll_task() {
            record_engine_task();
            let done = self.task_done_tx.clone();
            tokio::task::spawn_blocking(move || {
                task.run();
                let _ = done.send(());
            });
        }

        while let Some(event) = self.stream.poll_event() {
            match &event {
                StreamEvent::Secure => self.on_secure(),
                StreamEvent::Error(err) => record_error(err.error_type()),
                _ => {}
            }
            let _ = self.events.send(event);
        }

        // The listener went away before this connection was handed over.
        if self.stream.is_handshaked()
            && let Some(pending) = self.pending.take()
            && let Err(mpsc::error::SendError(socket)) = pending.accepted.send(pending.socket)
        {
            debug!(stream = socket.id(), "listener closed, dropping connection");
            self.stream.destroy();
            self.dispatch();
        }
    }

    fn on_secure(&mut self) {
        self.handshake_deadline = None;
        let elapsed = self.started.elapsed().as_secs_f64();
        record_tls_handshake_duration(elapsed);
        debug!(
            stream = self.stream.id(),
            peer = %self.peer,
            duration_ms = elapsed * 1000.0,
            cipher = ?self.stream.cipher(),
            "TLS handshake completed"
        );
    }

    fn on_command(&mut self, command: Command) {
        self.touch();
        match command {
            Command::Write {
                data,
                encoding,
                callback,
                reply,
            } => {
                let result = self.stream.write(data, encoding.as_deref(), callback);
                let _ = reply.send(result);
            }
            Command::End {
                data,
                encoding,
                reply,
            } => {
                let result = self.stream.end(data, encoding.as_deref());
                let _ = reply.send(result);
            }
            Command::SetEncoding { name, reply } => {
                let _ = reply.send(self.stream.set_encoding(&name));
            }
            Command::SetTimeout(timeout) => {
                self.idle_timeout = timeout;
                self.idle_deadline = timeout.map(|t| Instant::now() + t);
            }
            Command::Pause => self.stream.pause(),
            Command::Resume => self.stream.resume(),
            Command::Cipher(reply) => {
                let _ = reply.send(self.stream.cipher());
            }
            Command::Destroy => self.stream.destroy(),
        }
    }

    fn touch(&mut self) {
        if let Some(timeout) = self.idle_timeout {
            self.idle_deadline = Some(Instant::now() + timeout);
        }
    }

    fn transport_failed(&mut self, err: io::Error) {
        self.stream.on_error(err);
        self.stream.transport_mut().abort();
        self.stream.on_close();
    }

    fn finish(mut self) {
        // Commands that raced the close still get their answer.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.on_command(command);
        }

        let duration_secs = self.started.elapsed().as_secs_f64();
        record_connection_closed(duration_secs);
        if self.pending.take().is_some() {
            record_error(ERROR_TLS_HANDSHAKE);
            record_handshake_failed(if self.timed_out { "timeout" } else { "error" });
            warn!(
                stream = self.stream.id(),
                peer = %self.peer,
                "connection closed before handshake completed"
            );
        } else {
            debug!(stream = self.stream.id(), peer = %self.peer, duration_secs, "connection closed");
        }
    }
}
