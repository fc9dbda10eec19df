//! Row packing from tightly packed capture frames into padded scanout layout
//!
//! Capture buffers hold `width * bpp` bytes per row with no padding. Scanout
//! buffers use a fixed, larger stride. Everything the copy does not write
//! (row tails and the area past the last row) is zeroed so stale memory is
//! never scanned out.

use crate::error::{Result, VcapError};

/// Geometry of a padded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLayout {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    stride: u32,
}

impl PackedLayout {
    /// Create a layout, rejecting strides too small for a row
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32, stride: u32) -> Result<Self> {
        if width == 0 || height == 0 || bytes_per_pixel == 0 {
            return Err(VcapError::config(format!(
                "invalid frame geometry {}x{} at {} bytes per pixel",
                width, height, bytes_per_pixel
            )));
        }

        let row = width as u64 * bytes_per_pixel as u64;
        if (stride as u64) < row {
            return Err(VcapError::config(format!(
                "stride {} is smaller than a {}-byte row",
                stride, row
            )));
        }

        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            stride,
        })
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in rows
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Destination row pitch in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Bytes of pixel data in one row
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    /// Bytes a tightly packed source frame occupies
    pub fn source_len(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    /// Bytes the padded frame occupies (`stride * height`)
    pub fn packed_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// Copy `src` into `dst` row by row, zeroing every byte outside the active area
///
/// `dst` may be longer than `stride * height`; the excess is zeroed too.
/// Returns the number of source bytes consumed.
pub fn pack_into(src: &[u8], layout: &PackedLayout, dst: &mut [u8]) -> Result<usize> {
    let row = layout.row_bytes();
    let stride = layout.stride as usize;
    let needed = layout.source_len();

    if src.len() < needed {
        return Err(VcapError::Frame(format!(
            "short frame: {} bytes, {}x{} needs {}",
            src.len(),
            layout.width,
            layout.height,
            needed
        )));
    }
    if dst.len() < layout.packed_len() {
        return Err(VcapError::Frame(format!(
            "scanout buffer holds {} bytes, layout needs {}",
            dst.len(),
            layout.packed_len()
        )));
    }

    let (rows, tail) = dst.split_at_mut(layout.packed_len());
    for (out, input) in rows.chunks_exact_mut(stride).zip(src.chunks_exact(row)) {
        let (pixels, pad) = out.split_at_mut(row);
        pixels.copy_from_slice(input);
        pad.fill(0);
    }
    tail.fill(0);

    Ok(needed)
}

/// Pack a frame into a freshly allocated `stride * height` buffer
pub fn pack(src: &[u8], layout: &PackedLayout) -> Result<Vec<u8>> {
    let mut out = vec![0u8; layout.packed_len()];
    pack_into(src, layout, &mut out)?;
    Ok(out)
}
