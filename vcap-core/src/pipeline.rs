//! Capture-to-display pipeline
//!
//! Drives the capture pool through a fixed cycle per frame:
//!
//! ```text
//! ┌───────────┐    ┌──────────┐    ┌───────────┐    ┌───────────┐
//! │ WaitReady │───▶│  Drain   │───▶│  Deliver  │───▶│  Release  │──┐
//! └───────────┘    └──────────┘    └───────────┘    └───────────┘  │
//!       ▲               │ empty                                    │
//!       └───────────────┴──────────────────────────────────────────┘
//! ```
//!
//! The dequeued buffer is always requeued before the delivery result is
//! acted on, so a failing sink never strands a capture buffer.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::capture::{CaptureDriver, CapturePool, Dequeued};
use crate::display::{Display, DisplayDevice, DisplayRequest};
use crate::error::{Result, VcapError};
use crate::pack::pack_into;

/// Default bound on a single readiness wait
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// What the pipeline should do after a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Continue,
    Stop,
}

/// Consumer of captured frames
pub trait FrameSink {
    /// Consume the filled bytes of capture buffer `index`
    ///
    /// The slice is only valid for the duration of the call.
    fn deliver(&mut self, index: usize, frame: &[u8]) -> Result<Delivery>;
}

/// Dump sink: optionally writes frames verbatim and prints a progress dot
pub struct ByteSink<W: Write> {
    writer: Option<W>,
    progress: bool,
}

impl<W: Write> ByteSink<W> {
    /// Write every frame to `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            progress: true,
        }
    }

    /// Toggle the per-frame dot on stderr
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Borrow the writer
    pub fn writer(&self) -> Option<&W> {
        self.writer.as_ref()
    }

    /// Take the writer back
    pub fn into_writer(self) -> Option<W> {
        self.writer
    }
}

impl ByteSink<io::Sink> {
    /// Consume frames without writing them anywhere
    pub fn discard() -> Self {
        Self {
            writer: None,
            progress: true,
        }
    }
}

impl<W: Write> FrameSink for ByteSink<W> {
    fn deliver(&mut self, _index: usize, frame: &[u8]) -> Result<Delivery> {
        if let Some(writer) = self.writer.as_mut() {
            match writer.write_all(frame).and_then(|()| writer.flush()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    info!("Output closed, stopping");
                    return Ok(Delivery::Stop);
                }
                Err(e) => return Err(VcapError::Io(e)),
            }
        }

        if self.progress {
            let mut stderr = io::stderr().lock();
            // Progress output is cosmetic.
            let _ = stderr.write_all(b".");
            let _ = stderr.flush();
        }

        Ok(Delivery::Continue)
    }
}

/// How capture buffer indices select scanout buffers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IndexMapping {
    /// Capture buffer `i` goes to scanout buffer `i`; counts must match
    #[default]
    Identity,
    /// Capture buffer `i` goes to scanout buffer `table[i]`
    Table(Vec<usize>),
}

impl IndexMapping {
    /// Check the mapping covers every capture buffer with a distinct scanout buffer
    pub fn validate(&self, capture_count: usize, scanout_count: usize) -> Result<()> {
        match self {
            Self::Identity if capture_count == scanout_count => Ok(()),
            Self::Identity => Err(VcapError::config(format!(
                "{} capture buffers cannot map one-to-one onto {} scanout buffers",
                capture_count, scanout_count
            ))),
            Self::Table(table) => {
                if table.len() != capture_count {
                    return Err(VcapError::config(format!(
                        "index table has {} entries for {} capture buffers",
                        table.len(),
                        capture_count
                    )));
                }
                let mut seen = vec![false; scanout_count];
                for (capture, &scanout) in table.iter().enumerate() {
                    match seen.get_mut(scanout) {
                        None => {
                            return Err(VcapError::config(format!(
                                "capture buffer {} maps to scanout buffer {} of {}",
                                capture, scanout, scanout_count
                            )));
                        }
                        Some(true) => {
                            return Err(VcapError::config(format!(
                                "scanout buffer {} is shared by several capture buffers",
                                scanout
                            )));
                        }
                        Some(slot) => *slot = true,
                    }
                }
                Ok(())
            }
        }
    }

    /// Scanout buffer for capture buffer `index`
    pub fn target(&self, index: usize) -> Option<usize> {
        match self {
            Self::Identity => Some(index),
            Self::Table(table) => table.get(index).copied(),
        }
    }
}

/// Display sink: packs each frame into a scanout buffer and shows it
pub struct SurfaceSink<D: DisplayDevice> {
    display: Display<D>,
    mapping: IndexMapping,
}

impl<D: DisplayDevice> SurfaceSink<D> {
    /// Bind a negotiated display to `capture_count` capture buffers
    pub fn new(display: Display<D>, mapping: IndexMapping, capture_count: usize) -> Result<Self> {
        mapping.validate(capture_count, display.buffer_count())?;
        Ok(Self { display, mapping })
    }

    /// Negotiate `device` and bind it to `capture_count` capture buffers
    ///
    /// The mapping is checked against the requested scanout count before
    /// the controller is touched, so a bad count never reaches the screen.
    pub fn negotiate(
        device: D,
        request: &DisplayRequest,
        mapping: IndexMapping,
        capture_count: usize,
    ) -> Result<Self> {
        mapping.validate(capture_count, request.buffers)?;
        let display = Display::negotiate(device, request)?;
        Self::new(display, mapping, capture_count)
    }

    /// Borrow the display
    pub fn display(&self) -> &Display<D> {
        &self.display
    }

    /// Mutably borrow the display
    pub fn display_mut(&mut self) -> &mut Display<D> {
        &mut self.display
    }

    /// Take the display back
    pub fn into_display(self) -> Display<D> {
        self.display
    }
}

impl<D: DisplayDevice> FrameSink for SurfaceSink<D> {
    fn deliver(&mut self, index: usize, frame: &[u8]) -> Result<Delivery> {
        let target = self.mapping.target(index).ok_or_else(|| {
            VcapError::display(format!("capture buffer {} has no scanout buffer", index))
        })?;

        let pool = self
            .display
            .scanout_mut()
            .ok_or_else(|| VcapError::display("display already torn down"))?;
        let layout = *pool.layout();
        let buffer = pool
            .buffer_at_mut(target)
            .ok_or_else(|| VcapError::display(format!("no scanout buffer {}", target)))?;
        pack_into(frame, &layout, buffer.memory_mut())?;

        self.display.commit(target)?;
        trace!("Capture buffer {} shown via scanout buffer {}", index, target);
        Ok(Delivery::Continue)
    }
}

/// How many frames to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    Bounded(u64),
    /// Run until the sink stops, an error occurs or the stop flag is set
    Unbounded,
}

impl FrameCount {
    fn reached(&self, delivered: u64) -> bool {
        match self {
            Self::Bounded(n) => delivered >= *n,
            Self::Unbounded => false,
        }
    }
}

impl From<u64> for FrameCount {
    /// Zero means unbounded
    fn from(n: u64) -> Self {
        if n == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(n)
        }
    }
}

/// Counters from one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Frames delivered to the sink
    pub frames: u64,
    /// Bytes delivered to the sink
    pub bytes: u64,
    /// Readiness events that yielded no buffer
    pub empty_dequeues: u64,
    /// Waits cut short by a signal
    pub interrupted_waits: u64,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl PipelineStats {
    /// Average delivered frames per second
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} bytes in {:.2}s ({:.1} fps), {} empty wakeups",
            self.frames,
            self.bytes,
            self.elapsed.as_secs_f64(),
            self.fps(),
            self.empty_dequeues
        )
    }
}

/// Capture loop feeding a sink
pub struct Pipeline<D: CaptureDriver, S: FrameSink> {
    pool: CapturePool<D>,
    sink: S,
    ready_timeout: Duration,
    stop: Option<Arc<AtomicBool>>,
}

impl<D: CaptureDriver, S: FrameSink> Pipeline<D, S> {
    /// Create a pipeline over a pool whose buffers are already queued
    pub fn new(pool: CapturePool<D>, sink: S) -> Self {
        Self {
            pool,
            sink,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            stop: None,
        }
    }

    /// Bound each readiness wait
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Stop between iterations once `flag` is set
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run until `count` frames are delivered or something ends the run
    ///
    /// A readiness timeout is fatal ([`VcapError::Stalled`]).
    pub fn run(&mut self, count: FrameCount) -> Result<PipelineStats> {
        let start = Instant::now();
        let mut stats = PipelineStats::default();
        info!("Pipeline running ({:?})", count);

        while !count.reached(stats.frames) {
            if self.stop_requested() {
                info!("Stop requested");
                break;
            }

            match self.pool.wait_ready(self.ready_timeout) {
                Ok(true) => {}
                Ok(false) if self.stop_requested() => {
                    info!("Stop requested");
                    break;
                }
                Ok(false) => return Err(VcapError::Stalled(self.ready_timeout)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    stats.interrupted_waits += 1;
                    continue;
                }
                Err(e) => return Err(VcapError::kernel("poll", e)),
            }

            let (index, filled_length) = match self.pool.dequeue_next()? {
                Dequeued::Frame {
                    index,
                    filled_length,
                } => (index, filled_length),
                Dequeued::Empty => {
                    stats.empty_dequeues += 1;
                    continue;
                }
            };

            let delivery = match self.pool.frame(index) {
                Ok(frame) => self.sink.deliver(index, frame),
                Err(e) => Err(e),
            };
            let requeued = self.pool.requeue(index);
            let delivery = delivery?;
            requeued?;

            stats.frames += 1;
            stats.bytes += filled_length as u64;
            trace!("Frame {} from buffer {}", stats.frames, index);

            if delivery == Delivery::Stop {
                debug!("Sink asked to stop");
                break;
            }
        }

        stats.elapsed = start.elapsed();
        info!("Pipeline finished: {}", stats);
        Ok(stats)
    }

    /// Borrow the capture pool
    pub fn pool(&self) -> &CapturePool<D> {
        &self.pool
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Split into the pool and the sink
    pub fn into_parts(self) -> (CapturePool<D>, S) {
        (self.pool, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_zero_is_unbounded() {
        assert_eq!(FrameCount::from(0), FrameCount::Unbounded);
        assert_eq!(FrameCount::from(5), FrameCount::Bounded(5));
        assert!(!FrameCount::Unbounded.reached(u64::MAX));
        assert!(FrameCount::Bounded(2).reached(2));
        assert!(!FrameCount::Bounded(2).reached(1));
    }

    #[test]
    fn test_identity_mapping_requires_equal_counts() {
        assert!(IndexMapping::Identity.validate(4, 4).is_ok());
        assert!(IndexMapping::Identity.validate(4, 3).is_err());
        assert_eq!(IndexMapping::Identity.target(3), Some(3));
    }

    #[test]
    fn test_table_mapping_rejects_out_of_range() {
        let mapping = IndexMapping::Table(vec![0, 1, 5]);
        assert!(mapping.validate(3, 3).is_err());
    }

    #[test]
    fn test_table_mapping_rejects_shared_target() {
        let mapping = IndexMapping::Table(vec![0, 1, 1]);
        assert!(mapping.validate(3, 3).is_err());
    }

    #[test]
    fn test_table_mapping_allows_spare_scanout_buffers() {
        let mapping = IndexMapping::Table(vec![2, 0]);
        assert!(mapping.validate(2, 3).is_ok());
        assert_eq!(mapping.target(0), Some(2));
        assert_eq!(mapping.target(2), None);
    }

    #[test]
    fn test_byte_sink_writes_verbatim() {
        let mut sink = ByteSink::new(Vec::new()).with_progress(false);
        assert_eq!(sink.deliver(0, b"abc").unwrap(), Delivery::Continue);
        assert_eq!(sink.deliver(1, b"de").unwrap(), Delivery::Continue);
        assert_eq!(sink.into_writer().unwrap(), b"abcde");
    }

    #[test]
    fn test_byte_sink_stops_on_broken_pipe() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut sink = ByteSink::new(Closed).with_progress(false);
        assert_eq!(sink.deliver(0, b"x").unwrap(), Delivery::Stop);
    }

    #[test]
    fn test_stats_fps() {
        let stats = PipelineStats {
            frames: 60,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert!((stats.fps() - 30.0).abs() < f64::EPSILON);
        assert_eq!(PipelineStats::default().fps(), 0.0);
    }
}
