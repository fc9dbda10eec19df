//! vcap Core Library
//!
//! Moves video frames from a V4L2 capture device to a byte stream or a
//! DRM/KMS display plane with one copy per frame.
//!
//! This library provides:
//! - A memory-mapped capture buffer pool with strict ownership tracking
//! - A scanout buffer pool of dumb buffers registered as framebuffers
//! - Plane and mode negotiation on the display
//! - The capture-to-display pipeline tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │  CapturePool    │───▶│   Pipeline   │───▶│   FrameSink     │
//! │ (V4L2 mmap)     │◀───│ (requeue)    │    │ (stdout / KMS)  │
//! └─────────────────┘    └──────────────┘    └─────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod display;
pub mod error;
pub mod formats;
pub mod mapping;
pub mod pack;
pub mod pipeline;

pub use capture::{CaptureDriver, CapturePool, Dequeued, Owner, V4l2Capture};
pub use config::{CaptureConfig, ConfigFile, OutputMode, Resolution};
pub use display::{Display, DisplayDevice, DisplayRequest, DrmCard};
pub use error::{ErrorKind, Result, ResultExt, VcapError};
pub use pack::PackedLayout;
pub use pipeline::{ByteSink, Delivery, FrameCount, FrameSink, IndexMapping, Pipeline, SurfaceSink};
