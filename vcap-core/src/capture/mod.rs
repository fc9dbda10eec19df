//! Video capture via V4L2 streaming I/O
//!
//! This module handles:
//! - Capture device setup (capabilities, format, frame rate)
//! - The fixed pool of memory-mapped capture buffers
//! - Buffer ownership hand-off between the application and the driver

mod driver;
mod pool;
mod device;

pub use driver::CaptureDriver;
pub use pool::{CaptureBuffer, CapturePool, Dequeued, Owner};
pub use device::{CaptureFormat, CaptureInfo, V4l2Capture, V4l2Driver};
