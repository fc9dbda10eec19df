//! Configuration file loading and merging
//!
//! Loads user configuration from `~/.config/vcap/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CaptureConfig, OutputMode, Resolution, DEFAULT_CARD, DEFAULT_DEVICE, DEFAULT_STRIDE};
use crate::error::{Result, VcapError};
use crate::formats;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Capture device settings
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Display output settings
    #[serde(default)]
    pub display: DisplaySettings,

    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Capture device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Device node (e.g., "/dev/video7")
    #[serde(default = "default_device")]
    pub device: String,

    /// Frame size as WIDTHxHEIGHT
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Pixel format (fourcc or name)
    #[serde(default = "default_format")]
    pub format: String,

    /// Buffers to request from the driver
    #[serde(default = "default_buffers")]
    pub buffers: u32,

    /// Fewest buffers accepted
    #[serde(default = "default_buffers")]
    pub min_buffers: u32,
}

/// Display output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// DRM card path or kernel driver name
    #[serde(default = "default_card")]
    pub card: String,

    /// Scanout row pitch in bytes (0 = derive from width)
    #[serde(default = "default_stride")]
    pub stride: u32,

    /// Row alignment when deriving the stride
    #[serde(default = "default_alignment")]
    pub alignment: u32,

    /// Scanout buffers (0 = one per capture buffer)
    #[serde(default)]
    pub buffers: usize,

    /// Hide the primary plane while an overlay shows frames
    #[serde(default = "default_true")]
    pub hide_primary: bool,
}

/// Capture loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Output mode (discard, stdout, display)
    #[serde(default = "default_output")]
    pub output: String,

    /// Frames to capture (0 = until stopped)
    #[serde(default = "default_frame_count")]
    pub frame_count: u64,

    /// Readiness timeout in milliseconds
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

// Default value functions
fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_resolution() -> String {
    Resolution::default().to_string()
}

fn default_frame_rate() -> u32 {
    30
}

fn default_format() -> String {
    "YUYV".to_string()
}

fn default_buffers() -> u32 {
    4
}

fn default_card() -> String {
    DEFAULT_CARD.to_string()
}

fn default_stride() -> u32 {
    DEFAULT_STRIDE
}

fn default_alignment() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

fn default_output() -> String {
    "discard".to_string()
}

fn default_frame_count() -> u64 {
    120
}

fn default_ready_timeout_ms() -> u64 {
    2000
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: default_device(),
            resolution: default_resolution(),
            frame_rate: default_frame_rate(),
            format: default_format(),
            buffers: default_buffers(),
            min_buffers: default_buffers(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            card: default_card(),
            stride: default_stride(),
            alignment: default_alignment(),
            buffers: 0,
            hide_primary: true,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            output: default_output(),
            frame_count: default_frame_count(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("vcap").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("vcap")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/vcap/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| VcapError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| VcapError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VcapError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| VcapError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| VcapError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        let config = Self::default();
        config.save_to(path)?;
        Ok(true)
    }

    /// Build the runtime configuration described by this file
    pub fn to_capture_config(&self) -> Result<CaptureConfig> {
        let resolution: Resolution = self
            .capture
            .resolution
            .parse()
            .map_err(VcapError::Config)?;
        let format = formats::parse_fourcc(&self.capture.format).ok_or_else(|| {
            VcapError::Config(format!("Unknown pixel format: {}", self.capture.format))
        })?;
        let output: OutputMode = self.pipeline.output.parse().map_err(VcapError::Config)?;

        Ok(CaptureConfig {
            device: PathBuf::from(&self.capture.device),
            card: self.display.card.clone(),
            output,
            frame_count: self.pipeline.frame_count,
            resolution,
            frame_rate: self.capture.frame_rate,
            format,
            capture_buffers: self.capture.buffers,
            min_buffers: self.capture.min_buffers,
            scanout_buffers: (self.display.buffers > 0).then_some(self.display.buffers),
            stride: self.display.stride,
            alignment: self.display.alignment,
            hide_primary: self.display.hide_primary,
            ready_timeout: Duration::from_millis(self.pipeline.ready_timeout_ms),
        })
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# vcap configuration

[capture]
# V4L2 capture device node
device = "/dev/video7"

# Frame size as WIDTHxHEIGHT; the display must offer a mode of this size
resolution = "640x480"

# Frames per second requested from the device
frame_rate = 30

# Pixel format: YUYV, UYVY, RGB565, RGB888, XRGB8888, ARGB8888
format = "YUYV"

# Buffers requested from the driver, and the fewest accepted
buffers = 4
min_buffers = 4

[display]
# DRM card: a device path (/dev/dri/card0) or a kernel driver name
card = "xylon-drm"

# Scanout row pitch in bytes (0 = width * bpp rounded up to alignment)
stride = 2048
alignment = 64

# Scanout buffers (0 = one per granted capture buffer)
buffers = 0

# Hide the primary plane while an overlay shows frames
hide_primary = true

[pipeline]
# Output mode: discard, stdout, display
output = "discard"

# Frames to capture (0 = until interrupted)
frame_count = 120

# Give up when no frame arrives within this many milliseconds
ready_timeout_ms = 2000
"#
    .to_string()
}
