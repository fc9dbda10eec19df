//! Pixel format constants and conversions
//!
//! Centralizes fourcc handling for both sides of the pipeline. The display
//! side speaks DRM fourcc codes; the capture side speaks V4L2 codes. For the
//! packed YUV formats the two are identical, for RGB they differ.

/// DRM format fourcc constants
///
/// See: <https://github.com/torvalds/linux/blob/master/include/uapi/drm/drm_fourcc.h>
pub mod fourcc {
    /// Build a little-endian fourcc code from its four characters
    pub const fn code(c: &[u8; 4]) -> u32 {
        (c[0] as u32) | ((c[1] as u32) << 8) | ((c[2] as u32) << 16) | ((c[3] as u32) << 24)
    }

    /// YUYV - YUV 4:2:2 packed, Y0 U Y1 V
    pub const YUYV: u32 = code(b"YUYV");
    /// UYVY - YUV 4:2:2 packed, U Y0 V Y1
    pub const UYVY: u32 = code(b"UYVY");
    /// RGB565 - 16-bit RGB
    pub const RGB565: u32 = code(b"RG16");
    /// RGB888 - 24-bit RGB, B G R in memory
    pub const RGB888: u32 = code(b"RG24");
    /// XRGB8888 - 32-bit RGB with unused alpha
    pub const XRGB8888: u32 = code(b"XR24");
    /// ARGB8888 - 32-bit RGB with alpha
    pub const ARGB8888: u32 = code(b"AR24");
}

/// V4L2 pixel format codes that differ from their DRM counterparts
pub mod v4l2 {
    use super::fourcc::code;

    /// V4L2_PIX_FMT_RGB565
    pub const RGB565: u32 = code(b"RGBP");
    /// V4L2_PIX_FMT_BGR24, same memory order as DRM RGB888
    pub const BGR24: u32 = code(b"BGR3");
    /// V4L2_PIX_FMT_ARGB32
    pub const ARGB32: u32 = code(b"BA24");
    /// V4L2_PIX_FMT_XRGB32
    pub const XRGB32: u32 = code(b"BX24");
}

/// Formats the row packer can handle (single plane, whole bytes per pixel)
pub const SUPPORTED: [u32; 6] = [
    fourcc::YUYV,
    fourcc::UYVY,
    fourcc::RGB565,
    fourcc::RGB888,
    fourcc::XRGB8888,
    fourcc::ARGB8888,
];

/// Get the bytes per pixel for a fourcc format
///
/// Returns `None` for formats the pipeline cannot pack.
pub fn bytes_per_pixel(fourcc: u32) -> Option<u32> {
    use fourcc::*;
    match fourcc {
        YUYV | UYVY | RGB565 => Some(2),
        RGB888 => Some(3),
        XRGB8888 | ARGB8888 => Some(4),
        _ => None,
    }
}

/// Map a DRM fourcc to the V4L2 code the capture device must produce
pub fn capture_fourcc(fourcc: u32) -> u32 {
    match fourcc {
        fourcc::RGB565 => v4l2::RGB565,
        fourcc::RGB888 => v4l2::BGR24,
        fourcc::XRGB8888 => v4l2::XRGB32,
        fourcc::ARGB8888 => v4l2::ARGB32,
        other => other,
    }
}

/// Format information for logging
pub fn format_name(fourcc: u32) -> &'static str {
    use fourcc::*;
    match fourcc {
        YUYV => "YUYV",
        UYVY => "UYVY",
        RGB565 => "RGB565",
        RGB888 => "RGB888",
        XRGB8888 => "XRGB8888",
        ARGB8888 => "ARGB8888",
        _ => "Unknown",
    }
}

/// Render a fourcc code as its four characters
pub fn fourcc_to_string(fourcc: u32) -> String {
    fourcc
        .to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Parse a fourcc from either its four characters ("YUYV") or a format name ("XRGB8888")
pub fn parse_fourcc(s: &str) -> Option<u32> {
    if let Some(&code) = SUPPORTED
        .iter()
        .find(|&&code| format_name(code).eq_ignore_ascii_case(s))
    {
        return Some(code);
    }

    let bytes: [u8; 4] = s.as_bytes().try_into().ok()?;
    Some(fourcc::code(&bytes))
}

/// Smallest stride holding `width` pixels, rounded up to `alignment` bytes
///
/// An alignment of 0 or 1 means no rounding. Returns `None` when the
/// stride does not fit in 32 bits.
pub fn aligned_stride(width: u32, bytes_per_pixel: u32, alignment: u32) -> Option<u32> {
    let row = width.checked_mul(bytes_per_pixel)?;
    if alignment <= 1 {
        return Some(row);
    }
    row.div_ceil(alignment).checked_mul(alignment)
}
