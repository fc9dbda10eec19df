//! Configuration types for vcap
//!
//! [`CaptureConfig`] is the runtime configuration the pipeline is built from.
//! [`ConfigFile`] is its on-disk TOML form; command-line flags override it.

mod file;

pub use file::{sample_config, CaptureSettings, ConfigFile, DisplaySettings, PipelineSettings};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::formats;
use crate::pack::PackedLayout;

/// Longest readiness wait `poll(2)` accepts
pub const MAX_READY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Default capture device node
pub const DEFAULT_DEVICE: &str = "/dev/video7";
/// Default DRM driver name
pub const DEFAULT_CARD: &str = "xylon-drm";
/// Default scanout row pitch in bytes
pub const DEFAULT_STRIDE: u32 = 2048;

/// Where captured frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Capture and drop frames, printing progress only
    #[default]
    Discard,
    /// Write raw frames to stdout
    Stdout,
    /// Show frames on the display
    Display,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discard => "discard",
            Self::Stdout => "stdout",
            Self::Display => "display",
        };
        f.pad(name)
    }
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discard" | "none" => Ok(Self::Discard),
            "stdout" | "dump" => Ok(Self::Stdout),
            "display" | "hdmi" | "drm" => Ok(Self::Display),
            _ => Err(format!("Unknown output mode: {}", s)),
        }
    }
}

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| format!("Invalid width in '{}'", s))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| format!("Invalid height in '{}'", s))?;
        Ok(Self { width, height })
    }
}

/// Runtime configuration for a capture session
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Capture device node
    pub device: PathBuf,
    /// DRM card path or driver name
    pub card: String,
    /// Frame destination
    pub output: OutputMode,
    /// Frames to capture (0 = until stopped)
    pub frame_count: u64,
    /// Frame size
    pub resolution: Resolution,
    /// Frames per second requested from the device
    pub frame_rate: u32,
    /// DRM fourcc of the frames
    pub format: u32,
    /// Capture buffers to request
    pub capture_buffers: u32,
    /// Fewest capture buffers the session accepts
    pub min_buffers: u32,
    /// Scanout buffers (None = one per granted capture buffer)
    pub scanout_buffers: Option<usize>,
    /// Scanout row pitch in bytes (0 = derive from width and alignment)
    pub stride: u32,
    /// Row alignment used when deriving the stride
    pub alignment: u32,
    /// Hide the primary plane while an overlay shows frames
    pub hide_primary: bool,
    /// Bound on each readiness wait
    pub ready_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            card: DEFAULT_CARD.to_string(),
            output: OutputMode::default(),
            frame_count: 120,
            resolution: Resolution::default(),
            frame_rate: 30,
            format: formats::fourcc::YUYV,
            capture_buffers: 4,
            min_buffers: 4,
            scanout_buffers: None,
            stride: DEFAULT_STRIDE,
            alignment: 64,
            hide_primary: true,
            ready_timeout: Duration::from_secs(2),
        }
    }
}

impl CaptureConfig {
    /// Set the capture device node
    pub fn with_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.device = device.into();
        self
    }

    /// Set the DRM card path or driver name
    pub fn with_card(mut self, card: impl Into<String>) -> Self {
        self.card = card.into();
        self
    }

    /// Set the output mode
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Set the frame count (0 = until stopped)
    pub fn with_frame_count(mut self, count: u64) -> Self {
        self.frame_count = count;
        self
    }

    /// Set the frame size
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    /// Set the frame rate
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Set the pixel format
    pub fn with_format(mut self, fourcc: u32) -> Self {
        self.format = fourcc;
        self
    }

    /// Set requested and minimum capture buffers
    pub fn with_capture_buffers(mut self, requested: u32, minimum: u32) -> Self {
        self.capture_buffers = requested;
        self.min_buffers = minimum;
        self
    }

    /// Set the scanout buffer count
    pub fn with_scanout_buffers(mut self, count: usize) -> Self {
        self.scanout_buffers = Some(count);
        self
    }

    /// Set the scanout stride in bytes
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Set whether the primary plane is hidden
    pub fn with_hide_primary(mut self, hide: bool) -> Self {
        self.hide_primary = hide;
        self
    }

    /// Set the readiness timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Bytes per pixel of the configured format
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        formats::bytes_per_pixel(self.format)
    }

    /// Stride actually used for scanout buffers
    ///
    /// `None` when a derived stride would not fit in 32 bits.
    pub fn effective_stride(&self) -> Option<u32> {
        if self.stride > 0 {
            Some(self.stride)
        } else {
            let bpp = self.bytes_per_pixel().unwrap_or(4);
            formats::aligned_stride(self.resolution.width, bpp, self.alignment)
        }
    }

    /// Scanout geometry derived from this configuration
    pub fn layout(&self) -> crate::Result<PackedLayout> {
        let bpp = self.bytes_per_pixel().ok_or_else(|| {
            crate::VcapError::Unsupported(format!(
                "pixel format {}",
                formats::fourcc_to_string(self.format)
            ))
        })?;
        let stride = self.effective_stride().ok_or_else(|| {
            crate::VcapError::config(format!("stride for {} overflows", self.resolution))
        })?;
        PackedLayout::new(self.resolution.width, self.resolution.height, bpp, stride)
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.frame_rate > 120 {
            warnings.push(format!(
                "{} fps is beyond what most capture bridges deliver",
                self.frame_rate
            ));
        }

        if self.output == OutputMode::Stdout && self.frame_count == 0 {
            warnings.push(
                "Continuous capture to stdout will run until the reader closes the pipe"
                    .to_string(),
            );
        }

        if let (Some(scanout), OutputMode::Display) = (self.scanout_buffers, self.output) {
            if scanout != self.capture_buffers as usize {
                warnings.push(format!(
                    "{} scanout buffers for {} capture buffers; the grant must match exactly",
                    scanout, self.capture_buffers
                ));
            }
        }

        if self.ready_timeout < Duration::from_millis(100) {
            warnings.push(format!(
                "Ready timeout of {:?} will likely stall at low frame rates",
                self.ready_timeout
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration is invalid
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors
    /// for configurations that cannot work.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err("Resolution cannot be zero".to_string());
        }

        if self.frame_rate == 0 {
            return Err("Frame rate cannot be zero".to_string());
        }

        let Some(bpp) = self.bytes_per_pixel() else {
            return Err(format!(
                "Unsupported pixel format {}",
                formats::fourcc_to_string(self.format)
            ));
        };

        let row = self.resolution.width as u64 * bpp as u64;
        let Some(stride) = self.effective_stride() else {
            return Err(format!(
                "Stride for a {}-byte row at {} does not fit in 32 bits",
                row, self.resolution
            ));
        };
        if (stride as u64) < row {
            return Err(format!(
                "Stride {} is smaller than a {}-byte row at {}",
                stride, row, self.resolution
            ));
        }

        if self.capture_buffers == 0 {
            return Err("At least one capture buffer is required".to_string());
        }

        if self.min_buffers > self.capture_buffers {
            return Err(format!(
                "Minimum of {} capture buffers exceeds the {} requested",
                self.min_buffers, self.capture_buffers
            ));
        }

        if self.scanout_buffers == Some(0) {
            return Err("Scanout buffer count cannot be zero".to_string());
        }

        if self.ready_timeout > MAX_READY_TIMEOUT {
            return Err(format!(
                "Ready timeout of {:?} exceeds the {:?} a poll can wait",
                self.ready_timeout, MAX_READY_TIMEOUT
            ));
        }

        Ok(())
    }
}
