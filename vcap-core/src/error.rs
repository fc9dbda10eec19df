//! Error types for vcap

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using VcapError
pub type Result<T> = std::result::Result<T, VcapError>;

/// Main error type for vcap operations
#[derive(Debug, Error)]
pub enum VcapError {
    /// Capture device error
    #[error("Capture error: {0}")]
    Capture(String),

    /// Display device error
    #[error("Display error: {0}")]
    Display(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capability not offered by the device
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The driver granted fewer capture buffers than required
    #[error("Insufficient buffer memory: {granted} buffers granted, {required} required")]
    InsufficientBuffers {
        /// Buffers the driver handed out
        granted: u32,
        /// Minimum the pipeline needs
        required: u32,
    },

    /// Connector does not advertise the requested resolution
    #[error("Monitor does not support resolution {width}x{height}")]
    ModeNotFound {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// No usable display plane
    #[error("No compatible plane: {0}")]
    NoPlane(String),

    /// No frame arrived within the readiness window
    #[error("Capture stalled: no frame within {0:?}")]
    Stalled(Duration),

    /// A buffer was touched by the wrong owner
    #[error("Buffer {index} ownership violation: {reason}")]
    Ownership {
        /// Buffer index
        index: usize,
        /// What went wrong
        reason: &'static str,
    },

    /// Frame does not fit the configured layout
    #[error("Frame error: {0}")]
    Frame(String),

    /// A kernel call failed unexpectedly
    #[error("{op} failed: {source}")]
    Kernel {
        /// Name of the failing call
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<VcapError>,
    },
}

/// Broad classification used by the outer driver to decide what to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Requested capability, resolution or buffer grant is unavailable
    Configuration,
    /// Unexpected error code from a kernel interaction
    Kernel,
    /// Capture source produced nothing within the readiness window
    Stalled,
    /// Buffer ownership rules were broken by the caller
    Misuse,
}

impl VcapError {
    /// Create a capture error
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    /// Create a display error
    pub fn display(msg: impl Into<String>) -> Self {
        Self::Display(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an io::Error from a named kernel call
    pub fn kernel(op: &'static str, source: io::Error) -> Self {
        Self::Kernel { op, source }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::Unsupported(_)
            | Self::InsufficientBuffers { .. }
            | Self::ModeNotFound { .. }
            | Self::NoPlane(_)
            | Self::Frame(_) => ErrorKind::Configuration,
            Self::Stalled(_) => ErrorKind::Stalled,
            Self::Ownership { .. } => ErrorKind::Misuse,
            Self::Capture(_) | Self::Display(_) | Self::Kernel { .. } | Self::Io(_) => {
                ErrorKind::Kernel
            }
            Self::WithContext { source, .. } => source.kind(),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

/// Extension trait tagging raw io results with the kernel call that produced them
pub trait IoResultExt<T> {
    /// Convert into a `Kernel` error naming `op`
    fn kernel(self, op: &'static str) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn kernel(self, op: &'static str) -> Result<T> {
        self.map_err(|e| VcapError::kernel(op, e))
    }
}
