//! The byte transport a secure stream writes ciphertext to.

use bytes::Bytes;

/// Outbound half of a byte-stream connection, as seen by a secure stream.
///
/// Inbound notifications (data, end-of-stream, close, error, timeout, drain,
/// write completion) are delivered by calling the matching `on_*` method on
/// the stream.
pub trait Transport {
    /// Queue ciphertext for sending. `seq` increases by one per call and is
    /// reported back through the stream's `on_write_complete` once the bytes
    /// are handed off.
    ///
    /// Returns `false` when the transport's buffered output has reached its
    /// high-water mark.
    fn write(&mut self, data: Bytes, seq: u64) -> bool;

    /// Whether buffered output is at or above the high-water mark.
    fn needs_drain(&self) -> bool;

    /// Half-close: no more writes will follow.
    fn shutdown_write(&mut self);

    /// Flush what was already queued, then close.
    fn close(&mut self);

    /// Close immediately, discarding queued output.
    fn destroy(&mut self);

    /// Stop delivering inbound data until `resume`.
    fn pause(&mut self);

    fn resume(&mut self);
}
