//! Shared memory mappings of kernel-owned buffers
//!
//! Both V4L2 capture buffers and DRM dumb buffers are exposed to the process
//! through `mmap(2)` on the device file descriptor at a driver-supplied
//! offset. The region is unmapped when dropped.

use std::io;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::ptr::NonNull;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::warn;

/// A read/write shared mapping of device memory
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<std::ffi::c_void>,
    len: usize,
}

impl MappedRegion {
    /// Map `len` bytes of `fd` at `offset`
    pub fn map(fd: impl AsFd, offset: u64, len: usize) -> io::Result<Self> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "zero-length mapping"))?;
        let offset = nix::libc::off_t::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mapping offset out of range"))?;

        // SAFETY: a fresh shared mapping chosen by the kernel; no existing
        // memory is aliased and the length matches what we unmap on drop.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset,
            )
        }
        .map_err(io::Error::from)?;

        Ok(Self { ptr, len })
    }

    /// Length of the mapping in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty (never true for a live mapping)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: the mapping is exclusively owned and carries no thread affinity.
unsafe impl Send for MappedRegion {}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }
}

impl AsMut<[u8]> for MappedRegion {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe a live mapping owned by self, and &mut self
        // guarantees no other slice into it is alive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: the region was returned by mmap with this length.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap of {} bytes failed: {}", self.len, e);
        }
    }
}
