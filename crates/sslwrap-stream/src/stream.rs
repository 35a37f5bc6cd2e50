//! The secure stream state machine.
//!
//! A [`SecureStream`] owns one engine and drives it from transport input
//! and application calls. It never performs I/O itself: ciphertext goes out
//! through the [`Transport`] port, and everything the application should
//! observe is queued as a [`StreamEvent`].
//!
//! Both drive loops (unwrap after inbound data, wrap after outbound data)
//! run as a single explicit loop over [`Step`], so oscillating engine
//! statuses cannot grow the call stack. A loop that goes
//! [`MAX_IDLE_DRIVE_STEPS`] engine calls without consuming input, producing
//! output or completing the handshake is treated as a broken engine.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use sslwrap_core::defaults::{DEFAULT_ENCODING, MAX_IDLE_DRIVE_STEPS};
use sslwrap_engine::{CipherDescriptor, EngineResult, EngineStatus, EngineTask, Mode, SslEngine};
use tracing::{debug, warn};

use crate::callbacks::WriteQueue;
use crate::encoding::{Decoder, Encoding};
use crate::error::StreamError;
use crate::event::{Chunk, StreamEvent, WriteCallback, WriteOutcome};
use crate::transport::Transport;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Coarse connection state, derived from the half-close flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Handshaking,
    Established,
    /// Local end requested; the peer may still be sending.
    LocalClosing,
    /// The peer finished sending; local writes are still allowed.
    PeerClosing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Wrap,
    Unwrap,
}

enum TaskSlot {
    Idle,
    /// Requested by the engine, not yet picked up by the host.
    Ready(EngineTask),
    Running,
}

enum Shutdown {
    Graceful,
    Fatal(StreamError),
    TransportClosed,
    Destroyed,
}

struct PendingWrite {
    data: Bytes,
    callback: Option<WriteCallback>,
}

/// Full-duplex secure stream over an [`SslEngine`] and a [`Transport`].
pub struct SecureStream<E, T> {
    id: u64,
    engine: E,
    transport: T,

    handshaked: bool,
    end_requested: bool,
    outbound_closing: bool,
    local_closed: bool,
    write_shut: bool,
    peer_closed: bool,
    end_emitted: bool,
    closed: bool,
    had_error: bool,
    paused: bool,

    /// Ciphertext received but not yet consumed by the engine.
    inbound: BytesMut,
    /// The last unwrap left input it may still use without new data.
    inbound_leftover: bool,
    /// Plaintext accepted from the application, not yet consumed.
    outbound: VecDeque<PendingWrite>,
    callbacks: WriteQueue,
    next_seq: u64,
    last_accepted: Option<bool>,

    decoder: Option<Decoder>,
    events: VecDeque<StreamEvent>,

    task: TaskSlot,
    resume: Option<Step>,
    end_deferred: bool,
    eof_deferred: bool,
}

impl<E: SslEngine, T: Transport> SecureStream<E, T> {
    pub fn new(engine: E, transport: T) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            transport,
            handshaked: false,
            end_requested: false,
            outbound_closing: false,
            local_closed: false,
            write_shut: false,
            peer_closed: false,
            end_emitted: false,
            closed: false,
            had_error: false,
            paused: false,
            inbound: BytesMut::new(),
            inbound_leftover: false,
            outbound: VecDeque::new(),
            callbacks: WriteQueue::default(),
            next_seq: 0,
            last_accepted: None,
            decoder: None,
            events: VecDeque::new(),
            task: TaskSlot::Idle,
            resume: None,
            end_deferred: false,
            eof_deferred: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.engine.mode()
    }

    pub fn state(&self) -> StreamState {
        if self.closed {
            StreamState::Closed
        } else if !self.handshaked {
            StreamState::Handshaking
        } else if self.end_requested {
            StreamState::LocalClosing
        } else if self.peer_closed {
            StreamState::PeerClosing
        } else {
            StreamState::Established
        }
    }

    pub fn is_handshaked(&self) -> bool {
        self.handshaked
    }

    /// True once the outbound close handshake has been fully flushed.
    pub fn local_closed(&self) -> bool {
        self.local_closed
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Write callbacks not yet resolved.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
            + self
                .outbound
                .iter()
                .filter(|w| w.callback.is_some())
                .count()
    }

    /// Plaintext bytes accepted but not yet taken by the engine.
    pub fn buffered_plaintext(&self) -> usize {
        self.outbound.iter().map(|w| w.data.len()).sum()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn cipher(&self) -> Option<CipherDescriptor> {
        self.engine.cipher()
    }

    /// Next notification for the application.
    pub fn poll_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    /// Engine work the host must run. Report completion with
    /// [`on_task_complete`](Self::on_task_complete).
    pub fn poll_task(&mut self) -> Option<EngineTask> {
        match std::mem::replace(&mut self.task, TaskSlot::Idle) {
            TaskSlot::Ready(task) => {
                self.task = TaskSlot::Running;
                Some(task)
            }
            other => {
                self.task = other;
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Application operations
    // ------------------------------------------------------------------

    /// Start the handshake as the client and send the first flight.
    pub fn begin_handshake(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.engine.begin_handshake()?;
        debug!(stream = self.id, mode = %self.mode(), "handshake started");
        self.drive(Step::Wrap);
        self.run_deferred();
        Ok(())
    }

    /// Queue application data for encryption.
    ///
    /// Text is converted with `encoding` (utf8 when `None`). Returns the
    /// transport's write acceptance: `false` means the caller should wait
    /// for [`StreamEvent::Drain`] before writing more.
    pub fn write(
        &mut self,
        data: Chunk,
        encoding: Option<&str>,
        callback: Option<WriteCallback>,
    ) -> Result<bool, StreamError> {
        if self.closed {
            if let Some(callback) = callback {
                callback(WriteOutcome::Closed);
            }
            return Err(StreamError::Closed);
        }
        let converted = if self.end_requested {
            Err(StreamError::WriteAfterEnd)
        } else {
            match data {
                Chunk::Bytes(bytes) => Ok(bytes),
                Chunk::Text(text) => encoding
                    .unwrap_or(DEFAULT_ENCODING)
                    .parse::<Encoding>()
                    .and_then(|encoding| encoding.encode(&text)),
            }
        };
        let data = match converted {
            Ok(data) => data,
            Err(error) => {
                // Rejected writes still resolve their callback exactly once.
                if let Some(callback) = callback {
                    callback(WriteOutcome::Closed);
                }
                return Err(error);
            }
        };

        self.last_accepted = None;
        self.outbound.push_back(PendingWrite { data, callback });
        self.run_deferred();

        if self.closed {
            return Ok(false);
        }
        Ok(self
            .last_accepted
            .unwrap_or_else(|| !self.transport.needs_drain()))
    }

    /// Optionally write `data`, then close the outbound direction.
    ///
    /// The close is sent once the handshake has completed and every queued
    /// write was taken by the engine, and it is flushed before the
    /// transport's write side is shut. Calling `end` again is a no-op.
    pub fn end(&mut self, data: Option<Chunk>, encoding: Option<&str>) -> Result<(), StreamError> {
        if let Some(data) = data {
            self.write(data, encoding, None)?;
        }
        if self.closed || self.end_requested {
            return Ok(());
        }
        debug!(stream = self.id, "end requested");
        self.end_requested = true;
        self.end_deferred = true;
        self.run_deferred();
        Ok(())
    }

    /// Decode delivered plaintext as text from now on.
    pub fn set_encoding(&mut self, name: &str) -> Result<(), StreamError> {
        let encoding = name.parse::<Encoding>()?;
        if let Some(mut previous) = self.decoder.replace(Decoder::new(encoding))
            && let Some(text) = previous.finish()
        {
            self.events.push_back(StreamEvent::Data(Chunk::Text(text)));
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        if !self.closed && !self.paused {
            self.paused = true;
            self.transport.pause();
        }
    }

    pub fn resume(&mut self) {
        if !self.closed && self.paused {
            self.paused = false;
            self.transport.resume();
        }
    }

    /// Sever the transport immediately. Pending close handshakes and tasks
    /// are abandoned.
    pub fn destroy(&mut self) {
        self.shutdown(Shutdown::Destroyed);
    }

    // ------------------------------------------------------------------
    // Transport and host notifications
    // ------------------------------------------------------------------

    pub fn on_data(&mut self, data: &[u8]) {
        if self.closed || data.is_empty() {
            return;
        }
        if self.peer_closed || self.engine.is_inbound_done() {
            debug!(stream = self.id, len = data.len(), "dropping data after inbound close");
            return;
        }
        self.inbound.extend_from_slice(data);
        if self.task_outstanding() {
            return;
        }
        self.drive(Step::Unwrap);
        self.run_deferred();
    }

    /// The transport reached end-of-stream.
    pub fn on_end(&mut self) {
        if self.closed {
            return;
        }
        debug!(stream = self.id, "transport end");
        self.eof_deferred = true;
        self.run_deferred();
    }

    /// The transport closed on its own.
    pub fn on_close(&mut self) {
        if !self.closed {
            debug!(stream = self.id, "transport closed");
            self.shutdown(Shutdown::TransportClosed);
        }
    }

    pub fn on_error(&mut self, err: io::Error) {
        if self.closed {
            return;
        }
        warn!(stream = self.id, error = %err, "transport error");
        self.had_error = true;
        self.events
            .push_back(StreamEvent::Error(StreamError::Transport(err)));
    }

    pub fn on_timeout(&mut self) {
        if !self.closed {
            self.events.push_back(StreamEvent::Timeout);
        }
    }

    pub fn on_drain(&mut self) {
        if !self.closed {
            self.events.push_back(StreamEvent::Drain);
        }
    }

    /// Ciphertext chunks up to and including `seq` were handed off.
    pub fn on_write_complete(&mut self, seq: u64) {
        for callback in self.callbacks.complete(seq) {
            callback(WriteOutcome::Flushed);
        }
    }

    /// The task taken from [`poll_task`](Self::poll_task) has finished.
    pub fn on_task_complete(&mut self) {
        if !self.task_outstanding() {
            return;
        }
        self.task = TaskSlot::Idle;
        if self.closed {
            return;
        }
        debug!(stream = self.id, "engine task complete");
        if let Some(step) = self.resume.take() {
            self.drive(step);
        }
        if !self.inbound.is_empty() {
            self.drive(Step::Unwrap);
        }
        self.run_deferred();
    }

    // ------------------------------------------------------------------
    // Drive loop
    // ------------------------------------------------------------------

    fn task_outstanding(&self) -> bool {
        !matches!(self.task, TaskSlot::Idle)
    }

    fn drive(&mut self, start: Step) {
        let mut step = start;
        let mut idle = 0;
        loop {
            if self.closed || self.task_outstanding() {
                return;
            }
            let (progressed, next) = match step {
                Step::Unwrap => self.unwrap_step(),
                Step::Wrap => self.wrap_step(),
            };
            if progressed {
                idle = 0;
            } else {
                idle += 1;
                if idle >= MAX_IDLE_DRIVE_STEPS && next.is_some() {
                    self.fail(StreamError::EngineContract(format!(
                        "{idle} engine calls without progress, last {step:?}"
                    )));
                    return;
                }
            }
            match next {
                Some(next) => step = next,
                None => return,
            }
        }
    }

    fn unwrap_step(&mut self) -> (bool, Option<Step>) {
        let result = self.engine.unwrap(&self.inbound);
        self.trace_call("unwrap", &result);
        if result.consumed > self.inbound.len() {
            self.fail(StreamError::EngineContract(format!(
                "unwrap consumed {} of {} bytes",
                result.consumed,
                self.inbound.len()
            )));
            return (false, None);
        }
        self.inbound.advance(result.consumed);
        self.inbound_leftover =
            !self.inbound.is_empty() && result.status != EngineStatus::Underflow;

        let progressed = made_progress(&result);
        if result.just_handshaked {
            self.on_handshake();
        }
        if let Some(data) = result.data {
            self.deliver(data);
        }

        let next = match result.status {
            EngineStatus::NeedWrap => Some(Step::Wrap),
            EngineStatus::NeedUnwrap => Some(Step::Unwrap),
            EngineStatus::NeedTask => {
                self.schedule_task(Step::Unwrap);
                None
            }
            EngineStatus::Underflow => None,
            EngineStatus::Ok => (result.remaining > 0).then_some(Step::Unwrap),
            EngineStatus::Closed => self.on_inbound_closed(),
            EngineStatus::Error => {
                self.fail(protocol_error(result.error));
                None
            }
        };
        (progressed, next)
    }

    fn wrap_step(&mut self) -> (bool, Option<Step>) {
        let feeding = !self.outbound_closing && !self.outbound.is_empty();
        let result = match self.outbound.front() {
            Some(write) if feeding => self.engine.wrap(&write.data),
            _ => self.engine.wrap(&[]),
        };
        self.trace_call("wrap", &result);

        let mut advanced = false;
        if feeding {
            let len = self.outbound.front().map_or(0, |w| w.data.len());
            if result.consumed > len {
                self.fail(StreamError::EngineContract(format!(
                    "wrap consumed {} of {len} bytes",
                    result.consumed
                )));
                return (false, None);
            }
            if result.consumed == len {
                if let Some(write) = self.outbound.pop_front()
                    && let Some(callback) = write.callback
                {
                    self.callbacks.consumed(callback);
                }
                advanced = true;
            } else if let Some(front) = self.outbound.front_mut() {
                front.data.advance(result.consumed);
                advanced = result.consumed > 0;
            }
        }

        let progressed = made_progress(&result);
        if let Some(data) = result.data
            && !data.is_empty()
        {
            self.send(data);
        }
        if result.just_handshaked {
            self.on_handshake();
        }

        let next = match result.status {
            EngineStatus::NeedWrap => Some(Step::Wrap),
            EngineStatus::NeedUnwrap => Some(Step::Unwrap),
            EngineStatus::NeedTask => {
                self.schedule_task(Step::Wrap);
                None
            }
            EngineStatus::Ok | EngineStatus::Underflow => {
                if advanced && !self.outbound.is_empty() {
                    Some(Step::Wrap)
                } else if self.outbound_closing && !self.engine.is_outbound_done() {
                    Some(Step::Wrap)
                } else if self.inbound_leftover {
                    Some(Step::Unwrap)
                } else {
                    None
                }
            }
            EngineStatus::Closed => self.on_outbound_closed(),
            EngineStatus::Error => {
                self.fail(protocol_error(result.error));
                None
            }
        };
        (progressed, next)
    }

    fn trace_call(&self, op: &'static str, result: &EngineResult) {
        debug!(
            stream = self.id,
            op,
            status = %result.status,
            consumed = result.consumed,
            produced = result.produced(),
            remaining = result.remaining,
            handshaked = result.just_handshaked,
            "engine call"
        );
    }

    fn send(&mut self, data: Bytes) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.callbacks.bind(seq);
        let accepted = self.transport.write(data, seq);
        self.last_accepted = Some(accepted);
    }

    fn schedule_task(&mut self, resume: Step) {
        match self.engine.take_task() {
            Some(task) => {
                debug!(stream = self.id, resume = ?resume, "engine task scheduled");
                self.task = TaskSlot::Ready(task);
                self.resume = Some(resume);
            }
            None => self.fail(StreamError::EngineContract(
                "NEED_TASK reported without a task".to_string(),
            )),
        }
    }

    fn on_handshake(&mut self) {
        if self.handshaked {
            debug!(stream = self.id, "ignoring repeated handshake completion");
            return;
        }
        self.handshaked = true;
        debug!(stream = self.id, mode = %self.mode(), "handshake complete");
        self.events.push_back(StreamEvent::Secure);
    }

    fn deliver(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let chunk = match &mut self.decoder {
            Some(decoder) => {
                let text = decoder.decode(&data);
                if text.is_empty() {
                    return;
                }
                Chunk::Text(text)
            }
            None => Chunk::Bytes(data),
        };
        self.events.push_back(StreamEvent::Data(chunk));
    }

    fn emit_end(&mut self) {
        if self.end_emitted {
            return;
        }
        self.end_emitted = true;
        if let Some(text) = self.decoder.as_mut().and_then(Decoder::finish) {
            self.events.push_back(StreamEvent::Data(Chunk::Text(text)));
        }
        self.events.push_back(StreamEvent::End);
    }

    /// Unwrap reported the inbound direction closed.
    fn on_inbound_closed(&mut self) -> Option<Step> {
        if self.closed {
            return None;
        }
        self.peer_closed = true;
        self.inbound.clear();
        if !self.end_requested {
            self.emit_end();
            return None;
        }
        if self.outbound_closing && !self.engine.is_outbound_done() {
            // Finish flushing our close before letting go of the transport.
            return Some(Step::Wrap);
        }
        self.shutdown(Shutdown::Graceful);
        None
    }

    /// Wrap reported the outbound direction closed.
    fn on_outbound_closed(&mut self) -> Option<Step> {
        if self.closed {
            return None;
        }
        if !self.outbound_closing {
            debug!(stream = self.id, "engine closed outbound on its own");
            self.end_requested = true;
            self.end_deferred = false;
            self.outbound_closing = true;
        }
        self.local_closed = true;
        if self.peer_closed {
            self.shutdown(Shutdown::Graceful);
        }
        None
    }

    /// Run work held back by an outstanding task or unconsumed writes.
    fn run_deferred(&mut self) {
        if !self.closed && !self.task_outstanding() {
            if !self.outbound.is_empty() && !self.outbound_closing {
                self.drive(Step::Wrap);
            }
            if self.end_deferred
                && self.handshaked
                && self.outbound.is_empty()
                && !self.closed
                && !self.task_outstanding()
            {
                self.end_deferred = false;
                self.finish_end();
            }
            if self.eof_deferred && !self.closed && !self.task_outstanding() {
                self.eof_deferred = false;
                self.finish_eof();
            }
        }
        self.settle_local_close();
    }

    fn finish_end(&mut self) {
        debug!(stream = self.id, "closing outbound");
        self.outbound_closing = true;
        self.engine.close_outbound();
        self.drive(Step::Wrap);
    }

    fn finish_eof(&mut self) {
        if self.end_requested {
            debug!(stream = self.id, "transport ended after local end");
            self.shutdown(Shutdown::Graceful);
            return;
        }
        self.peer_closed = true;
        self.engine.close_inbound();
        let mut attempts = 0;
        while !self.closed && !self.task_outstanding() && !self.engine.is_inbound_done() {
            if attempts == MAX_IDLE_DRIVE_STEPS {
                self.fail(StreamError::EngineContract(
                    "inbound close never completed".to_string(),
                ));
                return;
            }
            attempts += 1;
            self.drive(Step::Unwrap);
        }
        if !self.closed {
            self.emit_end();
        }
    }

    fn settle_local_close(&mut self) {
        if self.closed || self.write_shut || !self.outbound_closing {
            return;
        }
        if !self.local_closed && self.engine.is_outbound_done() {
            self.local_closed = true;
        }
        if self.local_closed {
            self.write_shut = true;
            debug!(stream = self.id, "outbound closed");
            self.transport.shutdown_write();
        }
    }

    fn fail(&mut self, error: StreamError) {
        warn!(
            stream = self.id,
            error = %error,
            error_type = error.error_type(),
            "secure stream failed"
        );
        self.shutdown(Shutdown::Fatal(error));
    }

    fn shutdown(&mut self, how: Shutdown) {
        if self.closed {
            return;
        }
        self.closed = true;
        match how {
            Shutdown::Graceful => {
                debug!(stream = self.id, "closing");
                self.transport.close();
            }
            Shutdown::Fatal(error) => {
                self.had_error = true;
                self.events.push_back(StreamEvent::Error(error));
                self.transport.close();
            }
            Shutdown::TransportClosed => {}
            Shutdown::Destroyed => {
                debug!(stream = self.id, "destroyed");
                self.transport.destroy();
            }
        }

        for callback in self.callbacks.drain_all() {
            callback(WriteOutcome::Closed);
        }
        for write in self.outbound.drain(..) {
            if let Some(callback) = write.callback {
                callback(WriteOutcome::Closed);
            }
        }
        self.inbound.clear();
        self.task = TaskSlot::Idle;
        self.resume = None;
        self.end_deferred = false;
        self.eof_deferred = false;

        if !self.end_emitted
            && let Some(text) = self.decoder.as_mut().and_then(Decoder::finish)
        {
            self.events.push_back(StreamEvent::Data(Chunk::Text(text)));
        }
        self.events.push_back(StreamEvent::Close {
            had_error: self.had_error,
        });
    }
}

fn made_progress(result: &EngineResult) -> bool {
    result.consumed > 0 || result.produced() > 0 || result.just_handshaked
}

fn protocol_error(error: Option<sslwrap_engine::EngineError>) -> StreamError {
    match error {
        Some(error) => error.into(),
        None => StreamError::Protocol("engine reported ERROR".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use sslwrap_engine::EngineError;

    /// Engine that replays scripted results, falling back to passing bytes
    /// straight through.
    #[derive(Default)]
    struct ScriptedEngine {
        wraps: VecDeque<EngineResult>,
        unwraps: VecDeque<EngineResult>,
        task: Option<EngineTask>,
        calls: Vec<&'static str>,
        outbound_closed: bool,
        outbound_done: bool,
        inbound_closed: bool,
        peer_closed: bool,
    }

    fn result(status: EngineStatus, consumed: usize, data: Option<&'static [u8]>) -> EngineResult {
        EngineResult {
            consumed,
            data: data.map(Bytes::from_static),
            ..EngineResult::new(status)
        }
    }

    fn handshaked(mut result: EngineResult) -> EngineResult {
        result.just_handshaked = true;
        result
    }

    impl ScriptedEngine {
        fn wraps(mut self, results: impl IntoIterator<Item = EngineResult>) -> Self {
            self.wraps.extend(results);
            self
        }

        fn unwraps(mut self, results: impl IntoIterator<Item = EngineResult>) -> Self {
            self.unwraps.extend(results);
            self
        }
    }

    impl SslEngine for ScriptedEngine {
        fn mode(&self) -> Mode {
            Mode::Client
        }

        fn begin_handshake(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn wrap(&mut self, plaintext: &[u8]) -> EngineResult {
            self.calls.push("wrap");
            let result = match self.wraps.pop_front() {
                Some(result) => result,
                None if self.outbound_closed && !self.outbound_done => {
                    result(EngineStatus::Closed, 0, Some(b"<close>"))
                }
                None if self.outbound_closed => EngineResult::new(EngineStatus::Closed),
                None => EngineResult {
                    consumed: plaintext.len(),
                    data: (!plaintext.is_empty()).then(|| Bytes::copy_from_slice(plaintext)),
                    ..EngineResult::new(EngineStatus::Ok)
                },
            };
            if result.status == EngineStatus::Closed {
                self.outbound_done = true;
            }
            result
        }

        fn unwrap(&mut self, ciphertext: &[u8]) -> EngineResult {
            self.calls.push("unwrap");
            let result = match self.unwraps.pop_front() {
                Some(result) => result,
                None if self.inbound_closed => EngineResult::new(EngineStatus::Closed),
                None if ciphertext.is_empty() => EngineResult::new(EngineStatus::Underflow),
                None => EngineResult {
                    consumed: ciphertext.len(),
                    data: Some(Bytes::copy_from_slice(ciphertext)),
                    ..EngineResult::new(EngineStatus::Ok)
                },
            };
            if result.status == EngineStatus::Closed {
                self.peer_closed = true;
            }
            result
        }

        fn close_outbound(&mut self) {
            self.outbound_closed = true;
        }

        fn close_inbound(&mut self) {
            self.inbound_closed = true;
        }

        fn is_outbound_done(&self) -> bool {
            self.outbound_closed && self.outbound_done
        }

        fn is_inbound_done(&self) -> bool {
            self.inbound_closed || self.peer_closed
        }

        fn take_task(&mut self) -> Option<EngineTask> {
            self.task.take()
        }

        fn validate_ciphers(&self, _ciphers: &str) -> bool {
            true
        }

        fn cipher(&self) -> Option<CipherDescriptor> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        writes: Vec<(u64, Bytes)>,
        full: bool,
        write_shut: bool,
        closed: bool,
        destroyed: bool,
        paused: bool,
    }

    impl RecordingTransport {
        fn written(&self) -> Vec<u8> {
            self.writes.iter().flat_map(|(_, b)| b.to_vec()).collect()
        }
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, data: Bytes, seq: u64) -> bool {
            self.writes.push((seq, data));
            !self.full
        }

        fn needs_drain(&self) -> bool {
            self.full
        }

        fn shutdown_write(&mut self) {
            self.write_shut = true;
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn destroy(&mut self) {
            self.destroyed = true;
        }

        fn pause(&mut self) {
            self.paused = true;
        }

        fn resume(&mut self) {
            self.paused = false;
        }
    }

    type TestStream = SecureStream<ScriptedEngine, RecordingTransport>;

    fn stream(engine: ScriptedEngine) -> TestStream {
        SecureStream::new(engine, RecordingTransport::default())
    }

    /// A stream whose handshake already completed.
    fn established() -> TestStream {
        let mut s = stream(
            ScriptedEngine::default().unwraps([handshaked(result(EngineStatus::Ok, 2, None))]),
        );
        s.on_data(b"hs");
        assert!(matches!(s.poll_event(), Some(StreamEvent::Secure)));
        s
    }

    fn events(s: &mut TestStream) -> Vec<StreamEvent> {
        std::iter::from_fn(|| s.poll_event()).collect()
    }

    fn data_of(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Data(chunk) => Some(chunk.as_bytes().to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn count_close(events: &[StreamEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Close { .. }))
            .count()
    }

    fn recorder(log: &Arc<Mutex<Vec<(&'static str, WriteOutcome)>>>, name: &'static str) -> WriteCallback {
        let log = log.clone();
        Box::new(move |outcome: WriteOutcome| log.lock().unwrap().push((name, outcome)))
    }

    #[test]
    fn client_handshake_notifies_once() {
        let mut s = stream(
            ScriptedEngine::default()
                .wraps([
                    result(EngineStatus::Ok, 0, Some(b"hello")),
                    handshaked(result(EngineStatus::Ok, 0, Some(b"finished"))),
                ])
                .unwraps([
                    handshaked(result(EngineStatus::NeedWrap, 6, None)),
                    result(EngineStatus::Underflow, 0, None),
                ]),
        );
        s.begin_handshake().unwrap();
        assert_eq!(s.transport().written(), b"hello");
        assert_eq!(s.state(), StreamState::Handshaking);

        s.on_data(b"server");
        let evs = events(&mut s);
        assert_eq!(
            evs.iter()
                .filter(|e| matches!(e, StreamEvent::Secure))
                .count(),
            1
        );
        assert_eq!(s.transport().written(), b"hellofinished");
        assert_eq!(s.state(), StreamState::Established);
    }

    #[test]
    fn ok_with_remaining_reprocesses_buffered_input() {
        let mut s = established();
        s.engine.unwraps.extend([
            result(EngineStatus::Ok, 3, Some(b"abc")).with_remaining(3),
            result(EngineStatus::Ok, 3, Some(b"def")),
        ]);
        s.on_data(b"ABCDEF");

        let evs = events(&mut s);
        assert_eq!(data_of(&evs), b"abcdef");
        assert_eq!(s.engine().calls.iter().filter(|c| **c == "unwrap").count(), 3);
    }

    #[test]
    fn need_wrap_during_unwrap_sends_protocol_output() {
        let mut s = established();
        s.engine.unwraps.push_back(result(EngineStatus::NeedWrap, 4, None));
        s.engine
            .wraps
            .push_back(result(EngineStatus::Ok, 0, Some(b"proto")));
        s.on_data(b"ping");
        assert_eq!(s.transport().written(), b"proto");
    }

    #[test]
    fn need_task_suspends_engine_calls() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let mut engine = ScriptedEngine::default()
            .unwraps([handshaked(result(EngineStatus::NeedTask, 2, None))]);
        engine.task = Some(EngineTask::new(move || flag.store(true, Ordering::SeqCst)));
        let mut s = stream(engine);

        s.on_data(b"hs");
        let calls = s.engine().calls.len();

        // Nothing reaches the engine while the task is outstanding.
        s.on_data(b"more");
        assert!(s.write(Chunk::from("queued"), None, None).unwrap());
        s.end(None, None).unwrap();
        assert_eq!(s.engine().calls.len(), calls);

        let task = s.poll_task().expect("task should be ready");
        assert!(s.poll_task().is_none());
        task.run();
        assert!(ran.load(Ordering::SeqCst));
        s.on_task_complete();

        let evs = events(&mut s);
        assert_eq!(data_of(&evs), b"more");
        assert_eq!(s.transport().written(), b"queued<close>");
        assert!(s.local_closed());
        assert!(s.transport().write_shut);
    }

    #[test]
    fn need_task_without_task_is_fatal() {
        let mut s = stream(
            ScriptedEngine::default().unwraps([result(EngineStatus::NeedTask, 0, None)]),
        );
        s.on_data(b"x");
        let evs = events(&mut s);
        assert!(matches!(
            evs.first(),
            Some(StreamEvent::Error(StreamError::EngineContract(_)))
        ));
        assert!(matches!(evs.last(), Some(StreamEvent::Close { had_error: true })));
        assert!(s.transport().closed);
    }

    #[test]
    fn error_status_closes_exactly_once() {
        let mut s = established();
        s.engine.unwraps.push_back(EngineResult::failed(EngineError::Buffer(
            "bad record".into(),
        )));
        s.on_data(b"junk");
        let calls = s.engine().calls.len();

        s.on_data(b"more junk");
        s.on_end();
        s.on_close();
        s.destroy();
        assert_eq!(s.engine().calls.len(), calls);
        assert!(matches!(
            s.write(Chunk::from("late"), None, None),
            Err(StreamError::Closed)
        ));

        let evs = events(&mut s);
        let errors = evs
            .iter()
            .filter(|e| matches!(e, StreamEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(count_close(&evs), 1);
        assert!(matches!(evs.last(), Some(StreamEvent::Close { had_error: true })));
        assert!(!s.transport().destroyed);
    }

    #[test]
    fn peer_close_before_end_keeps_stream_writable() {
        let mut s = established();
        s.engine
            .unwraps
            .push_back(result(EngineStatus::Closed, 5, Some(b"bye")));
        s.on_data(b"close");

        let evs = events(&mut s);
        assert_eq!(data_of(&evs), b"bye");
        assert!(matches!(evs.last(), Some(StreamEvent::End)));
        assert!(s.peer_closed());
        assert_eq!(s.state(), StreamState::PeerClosing);

        s.write(Chunk::from("still here"), None, None).unwrap();
        assert_eq!(s.transport().written(), b"still here");

        s.end(None, None).unwrap();
        assert!(s.is_closed());
        assert!(s.transport().closed);
        let evs = events(&mut s);
        assert!(!evs.iter().any(|e| matches!(e, StreamEvent::End)));
        assert!(matches!(evs.last(), Some(StreamEvent::Close { had_error: false })));
    }

    #[test]
    fn data_after_peer_close_is_dropped() {
        let mut s = established();
        s.engine
            .unwraps
            .push_back(result(EngineStatus::Closed, 5, None));
        s.on_data(b"close trailing");
        assert!(s.peer_closed());
        assert!(s.inbound.is_empty());
        events(&mut s);

        let calls = s.engine().calls.len();
        for _ in 0..1000 {
            s.on_data(&[0x17; 1024]);
        }
        assert!(s.inbound.is_empty());
        assert_eq!(s.engine().calls.len(), calls);
        assert!(events(&mut s).is_empty());
        assert!(!s.is_closed());
    }

    #[test]
    fn peer_close_after_end_closes_without_end_event() {
        let mut s = established();
        s.end(None, None).unwrap();
        assert!(s.local_closed());
        assert!(s.transport().write_shut);
        assert!(!s.is_closed());
        assert_eq!(s.state(), StreamState::LocalClosing);

        s.engine
            .unwraps
            .push_back(result(EngineStatus::Closed, 5, None));
        s.on_data(b"close");
        assert!(s.is_closed());
        assert!(s.transport().closed);

        let evs = events(&mut s);
        assert!(!evs.iter().any(|e| matches!(e, StreamEvent::End)));
        assert_eq!(count_close(&evs), 1);
    }

    #[test]
    fn end_flushes_close_before_local_closed() {
        let mut s = established();
        s.write(Chunk::from("last"), None, None).unwrap();
        s.engine.wraps.extend([
            result(EngineStatus::NeedWrap, 0, Some(b"c1")),
            result(EngineStatus::Closed, 0, Some(b"c2")),
        ]);
        s.end(None, None).unwrap();

        assert_eq!(s.transport().written(), b"lastc1c2");
        assert!(s.engine().is_outbound_done());
        assert!(s.local_closed());
        assert!(s.transport().write_shut);

        s.end(None, None).unwrap();
        assert_eq!(s.transport().written(), b"lastc1c2");
    }

    #[test]
    fn end_before_handshake_waits_for_it() {
        let mut s = stream(
            ScriptedEngine::default().unwraps([handshaked(result(EngineStatus::Ok, 2, None))]),
        );
        s.end(None, None).unwrap();
        assert!(!s.engine().outbound_closed);
        assert_eq!(s.state(), StreamState::Handshaking);

        s.on_data(b"hs");
        assert!(s.engine().outbound_closed);
        assert!(s.local_closed());
        assert_eq!(s.transport().written(), b"<close>");
    }

    #[test]
    fn write_after_end_is_rejected() {
        let mut s = established();
        s.end(None, None).unwrap();
        assert!(matches!(
            s.write(Chunk::from("x"), None, None),
            Err(StreamError::WriteAfterEnd)
        ));

        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(matches!(
            s.write(Chunk::from("y"), None, Some(recorder(&log, "y"))),
            Err(StreamError::WriteAfterEnd)
        ));
        assert_eq!(*log.lock().unwrap(), vec![("y", WriteOutcome::Closed)]);
    }

    #[test]
    fn rejected_text_writes_resolve_their_callback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = established();
        assert!(matches!(
            s.write(Chunk::from("zz"), Some("hex"), Some(recorder(&log, "hex"))),
            Err(StreamError::InvalidInput(_))
        ));
        assert!(matches!(
            s.write(Chunk::from("x"), Some("klingon"), Some(recorder(&log, "name"))),
            Err(StreamError::UnknownEncoding(_))
        ));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("hex", WriteOutcome::Closed), ("name", WriteOutcome::Closed)]
        );
        assert_eq!(s.pending_callbacks(), 0);
        assert!(!s.is_closed());
    }

    #[test]
    fn write_callbacks_fire_in_order_after_handoff() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = established();

        s.write(Chunk::from("a"), None, Some(recorder(&log, "a"))).unwrap();
        s.write(Chunk::from("b"), None, Some(recorder(&log, "b"))).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(s.pending_callbacks(), 2);

        let seqs: Vec<u64> = s.transport().writes.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![1, 2]);

        s.on_write_complete(1);
        assert_eq!(*log.lock().unwrap(), vec![("a", WriteOutcome::Flushed)]);
        s.on_write_complete(2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", WriteOutcome::Flushed), ("b", WriteOutcome::Flushed)]
        );
        s.on_write_complete(2);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn callback_waits_for_ciphertext_when_engine_buffers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = stream(
            ScriptedEngine::default()
                .wraps([
                    // Plaintext accepted, nothing emitted yet.
                    result(EngineStatus::Ok, 5, None),
                    result(EngineStatus::Ok, 0, Some(b"finished+early")),
                ])
                .unwraps([handshaked(result(EngineStatus::NeedWrap, 2, None))]),
        );
        s.write(Chunk::from("early"), None, Some(recorder(&log, "early")))
            .unwrap();
        assert!(s.transport().writes.is_empty());

        s.on_data(b"hs");
        assert_eq!(s.transport().writes.len(), 1);
        s.on_write_complete(1);
        assert_eq!(*log.lock().unwrap(), vec![("early", WriteOutcome::Flushed)]);
    }

    #[test]
    fn destroy_resolves_pending_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut s = established();
        s.write(Chunk::from("a"), None, Some(recorder(&log, "a"))).unwrap();
        s.destroy();
        s.destroy();

        assert!(s.transport().destroyed);
        assert_eq!(*log.lock().unwrap(), vec![("a", WriteOutcome::Closed)]);
        let evs = events(&mut s);
        assert_eq!(count_close(&evs), 1);
        assert!(matches!(evs.last(), Some(StreamEvent::Close { had_error: false })));
    }

    #[test]
    fn transport_end_before_local_end() {
        let mut s = established();
        s.on_end();
        let evs = events(&mut s);
        assert_eq!(
            evs.iter().filter(|e| matches!(e, StreamEvent::End)).count(),
            1
        );
        assert!(s.peer_closed());
        assert!(!s.is_closed());

        s.end(None, None).unwrap();
        assert!(s.is_closed());
        assert!(s.transport().closed);
        let evs = events(&mut s);
        assert!(!evs.iter().any(|e| matches!(e, StreamEvent::End)));
        assert_eq!(count_close(&evs), 1);
    }

    #[test]
    fn transport_end_after_local_end_closes() {
        let mut s = established();
        s.end(None, None).unwrap();
        s.on_end();
        assert!(s.is_closed());
        assert!(s.transport().closed);
        let evs = events(&mut s);
        assert!(!evs.iter().any(|e| matches!(e, StreamEvent::End)));
    }

    #[test]
    fn oscillating_engine_is_a_contract_violation() {
        let mut s = established();
        s.engine.unwraps.extend(
            std::iter::repeat_with(|| result(EngineStatus::NeedWrap, 0, None)).take(20),
        );
        s.engine
            .wraps
            .extend(std::iter::repeat_with(|| result(EngineStatus::NeedUnwrap, 0, None)).take(20));
        s.on_data(b"x");

        assert!(s.is_closed());
        let calls = s.engine().calls.len();
        assert!(calls <= 1 + MAX_IDLE_DRIVE_STEPS + 1);
        let evs = events(&mut s);
        assert!(matches!(
            evs.first(),
            Some(StreamEvent::Error(StreamError::EngineContract(_)))
        ));
    }

    #[test]
    fn text_writes_use_the_named_encoding() {
        let mut s = established();
        s.write(Chunk::from("70696e67"), Some("hex"), None).unwrap();
        s.write(Chunk::from("cG9uZw=="), Some("base64"), None).unwrap();
        assert_eq!(s.transport().written(), b"pingpong");

        let calls = s.engine().calls.len();
        assert!(matches!(
            s.write(Chunk::from("x"), Some("klingon"), None),
            Err(StreamError::UnknownEncoding(_))
        ));
        assert!(matches!(
            s.write(Chunk::from("zz"), Some("hex"), None),
            Err(StreamError::InvalidInput(_))
        ));
        assert_eq!(s.engine().calls.len(), calls);
        assert!(!s.is_closed());
    }

    #[test]
    fn decoder_carries_partial_sequences() {
        let mut s = established();
        s.set_encoding("utf8").unwrap();
        let euro = "€".as_bytes();
        s.on_data(&euro[..1]);
        s.on_data(&euro[1..]);
        let evs = events(&mut s);
        let texts: Vec<&str> = evs
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Data(Chunk::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["€"]);
        assert!(s.set_encoding("nope").is_err());
    }

    fn texts_of(events: &[StreamEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Data(Chunk::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn switching_encoding_flushes_partial_sequence() {
        let mut s = established();
        s.set_encoding("utf8").unwrap();
        s.on_data(&"€".as_bytes()[..2]);
        assert!(events(&mut s).is_empty());

        s.set_encoding("hex").unwrap();
        s.on_data(b"ok");
        let evs = events(&mut s);
        assert_eq!(texts_of(&evs), vec!["\u{FFFD}", "6f6b"]);
    }

    #[test]
    fn destroy_flushes_partial_sequence_before_close() {
        let mut s = established();
        s.set_encoding("utf8").unwrap();
        s.on_data(&"€".as_bytes()[..1]);
        s.destroy();

        let evs = events(&mut s);
        assert_eq!(texts_of(&evs), vec!["\u{FFFD}"]);
        assert!(matches!(
            evs.as_slice(),
            [StreamEvent::Data(_), StreamEvent::Close { had_error: false }]
        ));
    }

    #[test]
    fn transport_close_signal_closes_quietly() {
        let mut s = established();
        s.on_close();
        assert!(s.is_closed());
        assert!(!s.transport().closed);
        assert!(!s.transport().destroyed);
        let evs = events(&mut s);
        assert!(matches!(evs.as_slice(), [StreamEvent::Close { had_error: false }]));
    }

    #[test]
    fn transport_error_then_close() {
        let mut s = established();
        s.on_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        s.on_close();
        let evs = events(&mut s);
        assert!(matches!(
            evs.as_slice(),
            [
                StreamEvent::Error(StreamError::Transport(_)),
                StreamEvent::Close { had_error: true }
            ]
        ));
    }

    #[test]
    fn write_reports_transport_backpressure() {
        let mut s = established();
        assert!(s.write(Chunk::from("a"), None, None).unwrap());
        s.transport_mut().full = true;
        assert!(!s.write(Chunk::from("b"), None, None).unwrap());
    }

    #[test]
    fn timeout_drain_and_flow_control_are_proxied() {
        let mut s = established();
        s.on_timeout();
        s.on_drain();
        s.pause();
        assert!(s.transport().paused);
        assert!(s.is_paused());
        s.resume();
        assert!(!s.transport().paused);

        let evs = events(&mut s);
        assert!(matches!(
            evs.as_slice(),
            [StreamEvent::Timeout, StreamEvent::Drain]
        ));
    }

    trait WithRemaining {
        fn with_remaining(self, remaining: usize) -> Self;
    }

    impl WithRemaining for EngineResult {
        fn with_remaining(mut self, remaining: usize) -> Self {
            self.remaining = remaining;
            self
        }
    }
}
