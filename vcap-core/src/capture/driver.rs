//! Kernel-facing primitives the capture pool is built on

use std::io;
use std::time::Duration;

/// Streaming-I/O primitives of a capture device
///
/// Implemented by [`V4l2Driver`](super::V4l2Driver) for real hardware and by
/// scripted doubles in tests. Every method maps onto a single kernel request;
/// ownership bookkeeping lives in [`CapturePool`](super::CapturePool).
pub trait CaptureDriver {
    /// Process-visible view of one driver buffer
    type Mapping: AsRef<[u8]>;

    /// Ask the driver for `count` memory-mapped buffers; returns the number granted
    ///
    /// An `InvalidInput` error means the device does not support mmap streaming.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query buffer `index` and map it into the process
    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping>;

    /// Hand buffer `index` to the driver's incoming queue
    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// Take the oldest filled buffer off the outgoing queue
    ///
    /// Returns `(index, bytes_used)`. Must not block: an empty queue is
    /// reported as `WouldBlock`.
    fn dequeue(&mut self) -> io::Result<(u32, usize)>;

    /// Wait until the device has a filled buffer or `timeout` passes
    ///
    /// Returns `false` on timeout. A signal interrupting the wait is reported
    /// as an `Interrupted` error so the caller can retry.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;
}
