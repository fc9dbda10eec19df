//! Fixed pool of memory-mapped capture buffers
//!
//! Every buffer is owned either by the application or by the driver's queue,
//! never both. The pool tracks that ownership and refuses any operation that
//! would touch memory the application does not currently own.

use std::io;
use std::time::Duration;

use tracing::{debug, info, trace};

use super::driver::CaptureDriver;
use crate::error::{Result, VcapError};

/// Who may touch a buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The application holds the buffer (before streaming, or after a dequeue)
    Application,
    /// The buffer sits in the driver's queue
    Kernel,
}

/// Result of a non-blocking dequeue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    /// A filled buffer is now owned by the application
    Frame {
        /// Buffer index within the pool
        index: usize,
        /// Bytes the driver wrote
        filled_length: usize,
    },
    /// Nothing ready yet; not an error
    Empty,
}

/// One capture buffer and its ownership state
#[derive(Debug)]
pub struct CaptureBuffer<M> {
    index: usize,
    memory: Option<M>,
    filled_length: usize,
    owner: Owner,
}

impl<M: AsRef<[u8]>> CaptureBuffer<M> {
    /// Buffer index within the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Mapped capacity in bytes (0 before mapping)
    pub fn length(&self) -> usize {
        self.memory.as_ref().map_or(0, |m| m.as_ref().len())
    }

    /// Bytes valid after the last capture event
    pub fn filled_length(&self) -> usize {
        self.filled_length
    }

    /// Current owner
    pub fn owner(&self) -> Owner {
        self.owner
    }
}

/// Pool of driver buffers cycled through the capture queue
pub struct CapturePool<D: CaptureDriver> {
    driver: D,
    buffers: Vec<CaptureBuffer<D::Mapping>>,
}

impl<D: CaptureDriver> CapturePool<D> {
    /// Negotiate a buffer count with the driver
    ///
    /// Fails if mmap streaming is unsupported or fewer than `minimum` buffers
    /// are granted. The driver may grant more than `requested`.
    pub fn initialize(mut driver: D, requested: u32, minimum: u32) -> Result<Self> {
        let granted = driver.request_buffers(requested).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidInput {
                VcapError::Unsupported("capture device does not support memory mapping".into())
            } else {
                VcapError::kernel("VIDIOC_REQBUFS", e)
            }
        })?;

        if granted < minimum {
            return Err(VcapError::InsufficientBuffers {
                granted,
                required: minimum,
            });
        }

        info!(
            "Capture pool: {} buffers granted ({} requested)",
            granted, requested
        );

        let buffers = (0..granted as usize)
            .map(|index| CaptureBuffer {
                index,
                memory: None,
                filled_length: 0,
                owner: Owner::Application,
            })
            .collect();

        Ok(Self { driver, buffers })
    }

    /// Map every granted buffer into the process
    ///
    /// Any single failure is fatal; buffers mapped so far are released when
    /// the pool is dropped.
    pub fn map_all(&mut self) -> Result<()> {
        for buffer in &mut self.buffers {
            let mapping = self
                .driver
                .map_buffer(buffer.index as u32)
                .map_err(|e| VcapError::kernel("mmap", e))?;
            debug!(
                "Mapped capture buffer {} ({} bytes)",
                buffer.index,
                mapping.as_ref().len()
            );
            buffer.memory = Some(mapping);
        }
        Ok(())
    }

    /// Queue every buffer ahead of stream-on
    pub fn enqueue_all(&mut self) -> Result<()> {
        for index in 0..self.buffers.len() {
            let buffer = &self.buffers[index];
            if buffer.memory.is_none() {
                return Err(VcapError::Ownership {
                    index,
                    reason: "queued before being mapped",
                });
            }
            if buffer.owner == Owner::Kernel {
                return Err(VcapError::Ownership {
                    index,
                    reason: "already queued",
                });
            }

            self.driver
                .queue(index as u32)
                .map_err(|e| VcapError::kernel("VIDIOC_QBUF", e))?;
            self.buffers[index].owner = Owner::Kernel;
        }
        debug!("Queued {} capture buffers", self.buffers.len());
        Ok(())
    }

    /// Try to take a filled buffer from the driver without blocking
    pub fn dequeue_next(&mut self) -> Result<Dequeued> {
        let (raw_index, bytes_used) = match self.driver.dequeue() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Dequeued::Empty),
            Err(e) => return Err(VcapError::kernel("VIDIOC_DQBUF", e)),
        };

        let index = raw_index as usize;
        let count = self.buffers.len();
        let buffer = self.buffers.get_mut(index).ok_or_else(|| {
            VcapError::capture(format!(
                "driver returned buffer {} outside pool of {}",
                index, count
            ))
        })?;

        if buffer.owner != Owner::Kernel {
            return Err(VcapError::Ownership {
                index,
                reason: "dequeued while held by the application",
            });
        }

        buffer.owner = Owner::Application;
        buffer.filled_length = bytes_used.min(buffer.length());
        trace!("Dequeued buffer {} ({} bytes)", index, buffer.filled_length);

        Ok(Dequeued::Frame {
            index,
            filled_length: buffer.filled_length,
        })
    }

    /// Filled bytes of a buffer the application currently owns
    pub fn frame(&self, index: usize) -> Result<&[u8]> {
        let buffer = self.buffers.get(index).ok_or(VcapError::Ownership {
            index,
            reason: "index outside pool",
        })?;

        if buffer.owner != Owner::Application {
            return Err(VcapError::Ownership {
                index,
                reason: "read while queued to the driver",
            });
        }

        let memory = buffer.memory.as_ref().ok_or(VcapError::Ownership {
            index,
            reason: "read before being mapped",
        })?;
        Ok(&memory.as_ref()[..buffer.filled_length])
    }

    /// Return a consumed buffer to the driver
    ///
    /// The caller must not touch the buffer afterwards. Requeueing a buffer
    /// that is already queued is reported as misuse.
    pub fn requeue(&mut self, index: usize) -> Result<()> {
        let buffer = self.buffers.get(index).ok_or(VcapError::Ownership {
            index,
            reason: "index outside pool",
        })?;

        if buffer.owner != Owner::Application {
            return Err(VcapError::Ownership {
                index,
                reason: "requeued while already queued",
            });
        }

        self.driver
            .queue(index as u32)
            .map_err(|e| VcapError::kernel("VIDIOC_QBUF", e))?;

        let buffer = &mut self.buffers[index];
        buffer.owner = Owner::Kernel;
        buffer.filled_length = 0;
        trace!("Requeued buffer {}", index);
        Ok(())
    }

    /// Wait for the driver to signal a filled buffer
    pub fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        self.driver.wait_ready(timeout)
    }

    /// Owner of buffer `index`
    pub fn owner(&self, index: usize) -> Option<Owner> {
        self.buffers.get(index).map(|b| b.owner)
    }

    /// Buffer `index`
    pub fn buffer(&self, index: usize) -> Option<&CaptureBuffer<D::Mapping>> {
        self.buffers.get(index)
    }

    /// Number of buffers granted
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Borrow the underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutably borrow the underlying driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
