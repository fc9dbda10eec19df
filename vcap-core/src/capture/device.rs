//! V4L2 capture device
//!
//! Device setup (open, capability check, format and frame-rate negotiation,
//! stream on/off) goes through the `v4l` crate. Buffer streaming uses the raw
//! `VIDIOC_*` requests so the pool sees every queue/dequeue individually.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use serde::Serialize;
use tracing::{debug, info};
use v4l::buffer::Type as BufferType;
use v4l::capability::Flags as CapFlags;
use v4l::device::Handle;
use v4l::format::FieldOrder;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_crop, v4l2_cropcap, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::driver::CaptureDriver;
use crate::error::{IoResultExt, Result, VcapError};
use crate::formats;
use crate::mapping::MappedRegion;

/// Issue an ioctl, retrying while interrupted by a signal
///
/// # Safety
///
/// `arg` must point to the structure `request` expects.
unsafe fn xioctl<T>(fd: i32, request: v4l2::vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: forwarded from the caller.
        match unsafe { v4l2::ioctl(fd, request, arg as *mut T as *mut c_void) } {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Format the device settled on after negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Negotiated width
    pub width: u32,
    /// Negotiated height
    pub height: u32,
    /// V4L2 fourcc
    pub fourcc: u32,
    /// Bytes per line reported by the driver
    pub bytes_per_line: u32,
    /// Bytes per frame reported by the driver
    pub size_image: u32,
}

impl CaptureFormat {
    /// Fail unless rows arrive tightly packed at `bytes_per_pixel`
    ///
    /// Frames are packed assuming `width × bpp` bytes per source row.
    pub fn ensure_unpadded(&self, bytes_per_pixel: u32) -> Result<()> {
        let row = self.width as u64 * bytes_per_pixel as u64;
        if self.bytes_per_line as u64 != row {
            return Err(VcapError::Unsupported(format!(
                "capture rows are {} bytes, expected {} for {} pixels at {} bytes each",
                self.bytes_per_line, row, self.width, bytes_per_pixel
            )));
        }
        Ok(())
    }
}

/// Capability summary of a capture device
#[derive(Debug, Clone, Serialize)]
pub struct CaptureInfo {
    /// Kernel driver name
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus location
    pub bus: String,
    /// Supports single-planar video capture
    pub video_capture: bool,
    /// Supports streaming I/O
    pub streaming: bool,
}

/// An open V4L2 capture device node
pub struct V4l2Capture {
    device: Device,
    path: PathBuf,
}

impl V4l2Capture {
    /// Open a capture device node in non-blocking mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let meta = std::fs::metadata(&path)
            .map_err(|e| VcapError::capture(format!("{}: {}", path.display(), e)))?;
        if !meta.file_type().is_char_device() {
            return Err(VcapError::capture(format!(
                "{} is not a char device",
                path.display()
            )));
        }

        // v4l opens with O_RDWR | O_NONBLOCK
        let device = Device::with_path(&path)
            .map_err(|e| VcapError::capture(format!("cannot open {}: {}", path.display(), e)))?;

        info!("Opened capture device {}", path.display());
        Ok(Self { device, path })
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Query driver capabilities
    pub fn info(&self) -> Result<CaptureInfo> {
        let caps = self.device.query_caps().map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidInput {
                VcapError::Unsupported(format!("{} is not a V4L2 device", self.path.display()))
            } else {
                VcapError::kernel("VIDIOC_QUERYCAP", e)
            }
        })?;

        Ok(CaptureInfo {
            driver: caps.driver.clone(),
            card: caps.card.clone(),
            bus: caps.bus.clone(),
            video_capture: caps.capabilities.contains(CapFlags::VIDEO_CAPTURE),
            streaming: caps.capabilities.contains(CapFlags::STREAMING),
        })
    }

    /// Check capabilities and negotiate resolution, pixel format and frame rate
    pub fn configure(
        &self,
        width: u32,
        height: u32,
        fourcc: u32,
        frame_rate: u32,
    ) -> Result<CaptureFormat> {
        let info = self.info()?;
        debug!("Capture device: {} ({})", info.card, info.driver);

        if !info.video_capture {
            return Err(VcapError::Unsupported(format!(
                "{} is not a video capture device",
                self.path.display()
            )));
        }
        if !info.streaming {
            return Err(VcapError::Unsupported(format!(
                "{} is not a video streaming device",
                self.path.display()
            )));
        }

        self.reset_crop();

        let mut fmt = Format::new(width, height, FourCC::new(&fourcc.to_le_bytes()));
        fmt.field_order = FieldOrder::Interlaced;
        let fmt = self.device.set_format(&fmt).kernel("VIDIOC_S_FMT")?;

        let negotiated = u32::from_le_bytes(fmt.fourcc.repr);
        if fmt.width != width || fmt.height != height || negotiated != fourcc {
            return Err(VcapError::Unsupported(format!(
                "capture device offered {}x{} {} instead of {}x{} {}",
                fmt.width,
                fmt.height,
                formats::fourcc_to_string(negotiated),
                width,
                height,
                formats::fourcc_to_string(fourcc)
            )));
        }

        let params = self
            .device
            .set_params(&Parameters::with_fps(frame_rate))
            .kernel("VIDIOC_S_PARM")?;
        debug!("Capture interval: {:?}", params.interval);

        info!(
            "Capture format: {}x{} {} ({} bytes/line, {} bytes/frame) @ {} fps",
            fmt.width,
            fmt.height,
            formats::fourcc_to_string(negotiated),
            fmt.stride,
            fmt.size,
            frame_rate
        );

        Ok(CaptureFormat {
            width: fmt.width,
            height: fmt.height,
            fourcc: negotiated,
            bytes_per_line: fmt.stride,
            size_image: fmt.size,
        })
    }

    /// Reset cropping to the default rectangle; failures are ignored
    fn reset_crop(&self) {
        let fd = self.device.handle().fd();

        // SAFETY: plain-old-data kernel structs, zero is a valid bit pattern.
        let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
        cropcap.type_ = BufferType::VideoCapture as u32;

        // SAFETY: VIDIOC_CROPCAP takes a v4l2_cropcap.
        if let Err(e) = unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_CROPCAP, &mut cropcap) } {
            debug!("VIDIOC_CROPCAP not supported: {}", e);
            return;
        }

        // SAFETY: as above.
        let mut crop: v4l2_crop = unsafe { mem::zeroed() };
        crop.type_ = BufferType::VideoCapture as u32;
        crop.c = cropcap.defrect;

        // SAFETY: VIDIOC_S_CROP takes a v4l2_crop.
        if let Err(e) = unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_S_CROP, &mut crop) } {
            debug!("Cropping not supported: {}", e);
        }
    }

    /// Kernel-facing driver for the capture pool
    pub fn driver(&self) -> V4l2Driver {
        V4l2Driver {
            handle: self.device.handle(),
        }
    }

    /// Start streaming; every buffer must already be queued
    pub fn stream_on(&self) -> Result<()> {
        self.stream_toggle(v4l2::vidioc::VIDIOC_STREAMON)
            .kernel("VIDIOC_STREAMON")?;
        info!("Capture streaming started");
        Ok(())
    }

    /// Stop streaming; the driver reclaims every queued buffer
    pub fn stream_off(&self) -> Result<()> {
        self.stream_toggle(v4l2::vidioc::VIDIOC_STREAMOFF)
            .kernel("VIDIOC_STREAMOFF")?;
        info!("Capture streaming stopped");
        Ok(())
    }

    fn stream_toggle(&self, request: v4l2::vidioc::_IOC_TYPE) -> io::Result<()> {
        let mut typ = BufferType::VideoCapture as u32;
        // SAFETY: STREAMON/STREAMOFF take a pointer to the buffer type.
        unsafe { xioctl(self.device.handle().fd(), request, &mut typ) }
    }
}

/// Streaming-I/O driver over a V4L2 device handle
pub struct V4l2Driver {
    handle: Arc<Handle>,
}

impl V4l2Driver {
    fn fd(&self) -> i32 {
        self.handle.fd()
    }

    fn buffer(index: u32) -> v4l2_buffer {
        // SAFETY: plain-old-data kernel struct, zero is a valid bit pattern.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = BufferType::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf.index = index;
        buf
    }
}

impl CaptureDriver for V4l2Driver {
    type Mapping = MappedRegion;

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: plain-old-data kernel struct, zero is a valid bit pattern.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = BufferType::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        // SAFETY: VIDIOC_REQBUFS takes a v4l2_requestbuffers.
        unsafe { xioctl(self.fd(), v4l2::vidioc::VIDIOC_REQBUFS, &mut req)? };
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MappedRegion> {
        let mut buf = Self::buffer(index);

        // SAFETY: VIDIOC_QUERYBUF takes a v4l2_buffer.
        unsafe { xioctl(self.fd(), v4l2::vidioc::VIDIOC_QUERYBUF, &mut buf)? };

        // SAFETY: for MMAP buffers the driver fills the `offset` member.
        let offset = unsafe { buf.m.offset };
        // SAFETY: the handle keeps the fd open for the duration of the call.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd()) };
        MappedRegion::map(fd, offset as u64, buf.length as usize)
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer(index);
        // SAFETY: VIDIOC_QBUF takes a v4l2_buffer.
        unsafe { xioctl(self.fd(), v4l2::vidioc::VIDIOC_QBUF, &mut buf) }
    }

    fn dequeue(&mut self) -> io::Result<(u32, usize)> {
        let mut buf = Self::buffer(0);
        // SAFETY: VIDIOC_DQBUF takes a v4l2_buffer. The device was opened
        // non-blocking, so an empty queue comes back as EAGAIN.
        unsafe { xioctl(self.fd(), v4l2::vidioc::VIDIOC_DQBUF, &mut buf)? };
        Ok((buf.index, buf.bytesused as usize))
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        // SAFETY: the handle keeps the fd open for the duration of the call.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(timeout).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("ready timeout {:?} is too long to poll", timeout),
            )
        })?;

        let ready = poll(&mut fds, timeout).map_err(io::Error::from)?;
        Ok(ready > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(bytes_per_line: u32) -> CaptureFormat {
        CaptureFormat {
            width: 640,
            height: 480,
            fourcc: formats::fourcc::YUYV,
            bytes_per_line,
            size_image: bytes_per_line * 480,
        }
    }

    #[test]
    fn test_tight_rows_accepted() {
        assert!(format(1280).ensure_unpadded(2).is_ok());
    }

    #[test]
    fn test_padded_rows_rejected() {
        let err = format(1536).ensure_unpadded(2).unwrap_err();
        assert!(matches!(err, VcapError::Unsupported(_)));
        assert!(err.to_string().contains("1536"));
    }
}
