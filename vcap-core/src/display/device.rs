//! Kernel-facing primitives of a KMS display device
//!
//! Object ids are the raw 32-bit KMS ids. [`DrmCard`](super::DrmCard)
//! implements this trait on a real `/dev/dri/card*` node.

use std::io;
use std::os::fd::OwnedFd;

use serde::Serialize;

/// CRTCs and connectors reported by the device, in kernel order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// Display controller ids
    pub crtcs: Vec<u32>,
    /// Connector ids
    pub connectors: Vec<u32>,
}

/// A display timing mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModeInfo {
    /// Pixel clock in kHz
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    /// Vertical refresh in Hz
    pub vrefresh: u32,
    pub flags: u32,
    pub mode_type: u32,
    /// Mode name, e.g. "1920x1080"
    pub name: String,
}

impl ModeInfo {
    /// Active area (width, height)
    pub fn size(&self) -> (u32, u32) {
        (self.hdisplay as u32, self.vdisplay as u32)
    }
}

/// Current configuration of a display controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrtcState {
    /// CRTC id
    pub id: u32,
    /// Framebuffer being scanned out, if any
    pub framebuffer: Option<u32>,
    /// Scanout origin within the framebuffer
    pub position: (u32, u32),
    /// Active mode, if the controller is enabled
    pub mode: Option<ModeInfo>,
}

/// Current state of a display plane
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaneState {
    /// Plane id
    pub id: u32,
    /// CRTC the plane is attached to, if any
    pub crtc: Option<u32>,
    /// Framebuffer the plane shows, if any
    pub framebuffer: Option<u32>,
    /// Bit `i` set when the CRTC at resource index `i` may drive this plane
    pub possible_crtcs: u32,
    /// Supported fourcc formats
    pub formats: Vec<u32>,
    /// Plane offset (x, y)
    pub position: (u32, u32),
}

/// One entry of an enum property's value table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    pub value: u64,
    pub name: String,
}

/// A property attached to a KMS object, with its current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: u32,
    pub name: String,
    pub value: u64,
    /// Named values; empty for non-enum properties
    pub enums: Vec<EnumEntry>,
}

/// A rectangle in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Rectangle anchored at the origin
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Result of a dumb buffer allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbAllocation {
    /// GEM handle
    pub handle: u32,
    /// Row pitch chosen by the kernel
    pub pitch: u32,
    /// Allocation size in bytes
    pub size: u64,
}

/// KMS primitives consumed by the negotiator and the scanout pool
pub trait DisplayDevice {
    /// Process-visible view of a dumb buffer
    type Mapping: AsRef<[u8]> + AsMut<[u8]>;

    /// Expose primary and cursor planes alongside overlays
    fn enable_universal_planes(&self) -> io::Result<()>;

    /// List CRTCs and connectors
    fn resources(&self) -> io::Result<Resources>;

    /// Modes advertised by a connector, in kernel order
    fn connector_modes(&self, connector: u32) -> io::Result<Vec<ModeInfo>>;

    /// Read a CRTC's configuration
    fn crtc(&self, crtc: u32) -> io::Result<CrtcState>;

    /// Program a CRTC; `None` for mode and framebuffer disables it
    fn set_crtc(
        &self,
        crtc: u32,
        framebuffer: Option<u32>,
        position: (u32, u32),
        connectors: &[u32],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()>;

    /// List plane ids, in kernel order
    fn plane_ids(&self) -> io::Result<Vec<u32>>;

    /// Read a plane's state
    fn plane(&self, plane: u32) -> io::Result<PlaneState>;

    /// Read a plane's properties with their current values
    fn plane_properties(&self, plane: u32) -> io::Result<Vec<PropertyInfo>>;

    /// Attach a framebuffer to a plane; `None` detaches it
    ///
    /// `src` is in whole pixels of the framebuffer.
    fn set_plane(
        &self,
        plane: u32,
        crtc: u32,
        framebuffer: Option<u32>,
        dst: Rect,
        src: Rect,
    ) -> io::Result<()>;

    /// Allocate a CPU-writable dumb buffer
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation>;

    /// Export a buffer handle as a PRIME file descriptor
    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd>;

    /// Register a single-plane framebuffer over a buffer handle
    fn add_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: u32,
        handle: u32,
        pitch: u32,
    ) -> io::Result<u32>;

    /// Map a dumb buffer into the process
    fn map_dumb(&self, handle: u32, size: usize) -> io::Result<Self::Mapping>;

    /// Unregister a framebuffer
    fn remove_framebuffer(&self, framebuffer: u32) -> io::Result<()>;

    /// Free a dumb buffer
    fn destroy_dumb(&self, handle: u32) -> io::Result<()>;
}
