//! FIFO write-completion queue keyed by transport write sequence.
//!
//! A callback moves through two stages: it waits until the engine has
//! consumed its plaintext, then it is bound to the sequence number of the
//! next ciphertext chunk handed to the transport. Completion of that
//! sequence (or any later one) releases it. Both stages preserve submission
//! order, and sequence numbers only grow, so releasing is always a prefix
//! of the queue.

use std::collections::VecDeque;

use crate::event::WriteCallback;

#[derive(Default)]
pub(crate) struct WriteQueue {
    awaiting: VecDeque<WriteCallback>,
    bound: VecDeque<(u64, WriteCallback)>,
}

impl WriteQueue {
    /// The engine consumed the plaintext of the write owning `callback`.
    pub(crate) fn consumed(&mut self, callback: WriteCallback) {
        self.awaiting.push_back(callback);
    }

    /// Ciphertext chunk `seq` was handed to the transport.
    pub(crate) fn bind(&mut self, seq: u64) {
        self.bound
            .extend(self.awaiting.drain(..).map(|callback| (seq, callback)));
    }

    /// Callbacks released by completion of every chunk up to `seq`.
    pub(crate) fn complete(&mut self, seq: u64) -> Vec<WriteCallback> {
        let due = self.bound.iter().take_while(|(s, _)| *s <= seq).count();
        self.bound.drain(..due).map(|(_, callback)| callback).collect()
    }

    /// Every pending callback, oldest first.
    pub(crate) fn drain_all(&mut self) -> Vec<WriteCallback> {
        self.bound
            .drain(..)
            .map(|(_, callback)| callback)
            .chain(self.awaiting.drain(..))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.awaiting.len() + self.bound.len()
    }
}
