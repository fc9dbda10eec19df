//! Pool of CPU-writable buffers the display can scan out
//!
//! Each buffer goes through four steps: dumb allocation, PRIME export,
//! framebuffer registration and mapping. A failure at any step rolls back the
//! steps already done for that buffer and then every buffer created before it.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use tracing::{debug, info, warn};

use super::device::DisplayDevice;
use crate::error::{IoResultExt, Result, VcapError};
use crate::formats;
use crate::pack::PackedLayout;

/// One scanout buffer
#[derive(Debug)]
pub struct ScanoutBuffer<M> {
    index: usize,
    handle: u32,
    prime: OwnedFd,
    framebuffer: u32,
    memory: M,
    stride: u32,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> ScanoutBuffer<M> {
    /// Position within the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Dumb buffer handle
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Exported PRIME descriptor
    pub fn prime_fd(&self) -> BorrowedFd<'_> {
        self.prime.as_fd()
    }

    /// Registered framebuffer id
    pub fn framebuffer(&self) -> u32 {
        self.framebuffer
    }

    /// Row pitch the framebuffer was registered with
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Mapped size in bytes
    pub fn total_length(&self) -> usize {
        self.memory.as_ref().len()
    }

    /// Read access to the pixels
    pub fn memory(&self) -> &[u8] {
        self.memory.as_ref()
    }

    /// Write access to the pixels
    pub fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut()
    }
}

/// Scanout buffers sharing one geometry and pixel format
#[derive(Debug)]
pub struct ScanoutPool<M> {
    buffers: Vec<ScanoutBuffer<M>>,
    layout: PackedLayout,
    format: u32,
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> ScanoutPool<M> {
    /// Create `count` buffers laid out as `layout` in DRM `format`
    pub fn create<D>(device: &D, count: usize, layout: PackedLayout, format: u32) -> Result<Self>
    where
        D: DisplayDevice<Mapping = M>,
    {
        if count == 0 {
            return Err(VcapError::config("scanout pool needs at least one buffer"));
        }
        if formats::bytes_per_pixel(format) != Some(layout.bytes_per_pixel()) {
            return Err(VcapError::config(format!(
                "{} does not use {} bytes per pixel",
                formats::format_name(format),
                layout.bytes_per_pixel()
            )));
        }

        let mut buffers: Vec<ScanoutBuffer<M>> = Vec::with_capacity(count);
        for index in 0..count {
            match create_buffer(device, index, &layout, format) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    warn!("Scanout buffer {} failed, releasing {} earlier", index, buffers.len());
                    while let Some(buffer) = buffers.pop() {
                        if let Err(cleanup) = release_buffer(device, buffer) {
                            warn!("Rollback incomplete: {}", cleanup);
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "Scanout pool: {} x {}x{} {} buffers, stride {}",
            count,
            layout.width(),
            layout.height(),
            formats::format_name(format),
            layout.stride()
        );

        Ok(Self {
            buffers,
            layout,
            format,
        })
    }

    /// Buffer `index`, if it exists
    pub fn buffer_at(&self, index: usize) -> Option<&ScanoutBuffer<M>> {
        self.buffers.get(index)
    }

    /// Mutable buffer `index`, if it exists
    pub fn buffer_at_mut(&mut self, index: usize) -> Option<&mut ScanoutBuffer<M>> {
        self.buffers.get_mut(index)
    }

    /// Number of buffers
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Geometry shared by every buffer
    pub fn layout(&self) -> &PackedLayout {
        &self.layout
    }

    /// DRM fourcc of every buffer
    pub fn format(&self) -> u32 {
        self.format
    }

    /// Release every buffer in reverse creation order
    ///
    /// Keeps going past failures and reports the first one.
    pub fn destroy<D>(mut self, device: &D) -> Result<()>
    where
        D: DisplayDevice<Mapping = M>,
    {
        let mut first = None;
        while let Some(buffer) = self.buffers.pop() {
            if let Err(e) = release_buffer(device, buffer) {
                warn!("Scanout teardown: {}", e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

fn create_buffer<D: DisplayDevice>(
    device: &D,
    index: usize,
    layout: &PackedLayout,
    format: u32,
) -> Result<ScanoutBuffer<D::Mapping>> {
    let bpp = layout.bytes_per_pixel();
    let stride = layout.stride();
    let required = layout.packed_len();

    // Allocate whole stride-wide rows so the explicit pitch fits the buffer.
    let alloc_width = stride.div_ceil(bpp);
    let dumb = device
        .create_dumb(alloc_width, layout.height(), bpp * 8)
        .kernel("DRM_IOCTL_MODE_CREATE_DUMB")?;

    let rest = (|| -> Result<(OwnedFd, u32, D::Mapping)> {
        if dumb.size < required as u64 {
            return Err(VcapError::display(format!(
                "dumb buffer of {} bytes cannot hold {} rows of {}",
                dumb.size,
                layout.height(),
                stride
            )));
        }
        let size = usize::try_from(dumb.size)
            .map_err(|_| VcapError::display("dumb buffer size exceeds address space"))?;

        let prime = device
            .export_prime(dumb.handle)
            .kernel("DRM_IOCTL_PRIME_HANDLE_TO_FD")?;

        let framebuffer = device
            .add_framebuffer(layout.width(), layout.height(), format, dumb.handle, stride)
            .kernel("DRM_IOCTL_MODE_ADDFB2")?;

        let memory = match device.map_dumb(dumb.handle, size) {
            Ok(m) => m,
            Err(e) => {
                if let Err(cleanup) = device.remove_framebuffer(framebuffer) {
                    warn!("Could not remove framebuffer {}: {}", framebuffer, cleanup);
                }
                return Err(VcapError::kernel("DRM_IOCTL_MODE_MAP_DUMB", e));
            }
        };

        Ok((prime, framebuffer, memory))
    })();

    match rest {
        Ok((prime, framebuffer, memory)) => {
            debug!(
                "Scanout buffer {}: handle {}, fb {}, {} bytes",
                index,
                dumb.handle,
                framebuffer,
                memory.as_ref().len()
            );
            Ok(ScanoutBuffer {
                index,
                handle: dumb.handle,
                prime,
                framebuffer,
                memory,
                stride,
            })
        }
        Err(e) => {
            if let Err(cleanup) = device.destroy_dumb(dumb.handle) {
                warn!("Could not destroy dumb buffer {}: {}", dumb.handle, cleanup);
            }
            Err(e)
        }
    }
}

fn release_buffer<D: DisplayDevice>(device: &D, buffer: ScanoutBuffer<D::Mapping>) -> Result<()> {
    let ScanoutBuffer {
        index,
        handle,
        prime,
        framebuffer,
        memory,
        ..
    } = buffer;

    let removed = device
        .remove_framebuffer(framebuffer)
        .kernel("DRM_IOCTL_MODE_RMFB");
    drop(prime);
    drop(memory);
    let destroyed = device
        .destroy_dumb(handle)
        .kernel("DRM_IOCTL_MODE_DESTROY_DUMB");

    debug!("Released scanout buffer {}", index);
    removed.and(destroyed)
}
