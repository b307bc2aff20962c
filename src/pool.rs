//! Buffer pool shared between the process and the kernel driver.
//!
//! The driver decides the pool size when buffers are requested; the pool
//! then owns every mapping for the session's lifetime and records which
//! side currently owns each buffer's contents.

use std::os::raw::{c_ulong, c_void};
use std::os::unix::io::RawFd;
use std::{mem, ptr, slice};

use tracing::{debug, warn};
use v4l::v4l2;
use v4l::v4l_sys::*;

use crate::config::{BufferBacking, CaptureConfig};
use crate::error::{CaptureError, Result};
use crate::ioctl::xioctl;
use crate::traits::CaptureFormat;

/// Minimum driver grant for a double-buffered streaming pipeline.
const MIN_BUFFERS: u32 = 2;

/// Who currently owns a buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Queued; the hardware may overwrite the buffer at any time.
    Driver,
    /// Dequeued; contents are stable for as long as the caller holds it.
    Caller,
}

/// A driver buffer mapped into the process address space.
struct MappedBuffer {
    start: *mut u8,
    length: usize,
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        // Teardown keeps going past individual unmap failures.
        if let Err(err) = unsafe { v4l2::munmap(self.start.cast::<c_void>(), self.length) } {
            warn!(%err, "failed to unmap capture buffer");
        }
    }
}

enum Backing {
    Mmap(Vec<MappedBuffer>),
    UserPtr(Vec<Vec<u8>>),
}

/// Fixed-size pool of frame buffers exchanged with the driver.
///
/// Created after format negotiation and destroyed before the device is
/// closed. All mappings are released on drop.
pub struct BufferPool {
    backing: Backing,
    owners: Vec<BufferOwner>,
}

impl BufferPool {
    /// Request buffers from the driver and map or register each one.
    pub(crate) fn allocate(fd: RawFd, config: &CaptureConfig, format: CaptureFormat) -> Result<Self> {
        match config.backing {
            BufferBacking::Mmap => Self::allocate_mmap(fd, config.buffer_count),
            BufferBacking::UserPtr => Self::allocate_userptr(fd, config.buffer_count, format),
        }
    }

    fn request(fd: RawFd, count: u32, memory: v4l2_memory, unsupported: CaptureError) -> Result<u32> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory,
            ..unsafe { mem::zeroed() }
        };
        match unsafe {
            xioctl(
                fd,
                v4l2::vidioc::VIDIOC_REQBUFS,
                ptr::addr_of_mut!(req).cast::<c_void>(),
            )
        } {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => return Err(unsupported),
            Err(err) => return Err(CaptureError::BufferRequestFailed(err)),
        }
        if req.count < MIN_BUFFERS {
            return Err(CaptureError::InsufficientBuffers { granted: req.count });
        }
        Ok(req.count)
    }

    fn allocate_mmap(fd: RawFd, requested: u32) -> Result<Self> {
        let granted = Self::request(
            fd,
            requested,
            v4l2_memory_V4L2_MEMORY_MMAP,
            CaptureError::MmapUnsupported,
        )?;

        // Buffers unmap themselves on drop, so a failure partway through
        // releases everything mapped so far.
        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let buffer = unsafe {
                let mut desc = v4l2_buffer {
                    index,
                    type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
                    memory: v4l2_memory_V4L2_MEMORY_MMAP,
                    ..mem::zeroed()
                };
                xioctl(
                    fd,
                    v4l2::vidioc::VIDIOC_QUERYBUF,
                    ptr::addr_of_mut!(desc).cast::<c_void>(),
                )
                .map_err(CaptureError::MapFailed)?;

                let length = desc.length as usize;
                let start = v4l2::mmap(
                    ptr::null_mut(),
                    length,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    desc.m.offset as libc::off_t,
                )
                .map_err(CaptureError::MapFailed)?;
                MappedBuffer {
                    start: start.cast::<u8>(),
                    length,
                }
            };
            buffers.push(buffer);
        }
        debug!(granted, "mapped driver buffers");

        Ok(Self {
            owners: vec![BufferOwner::Caller; granted as usize],
            backing: Backing::Mmap(buffers),
        })
    }

    fn allocate_userptr(fd: RawFd, requested: u32, format: CaptureFormat) -> Result<Self> {
        let granted = Self::request(
            fd,
            requested,
            v4l2_memory_V4L2_MEMORY_USERPTR,
            CaptureError::UserPtrUnsupported,
        )?;

        let size = format.size as usize;
        let buffers: Vec<Vec<u8>> = (0..granted).map(|_| vec![0u8; size]).collect();
        debug!(granted, size, "allocated caller-owned buffers");

        Ok(Self {
            owners: vec![BufferOwner::Caller; granted as usize],
            backing: Backing::UserPtr(buffers),
        })
    }

    /// Number of buffers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether the pool holds no buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Current owner of buffer `index`, or `None` when out of bounds.
    #[must_use]
    pub fn owner(&self, index: u32) -> Option<BufferOwner> {
        self.owners.get(index as usize).copied()
    }

    /// Bounds-checked view of one buffer's bytes.
    ///
    /// The contents are only stable while the caller owns the buffer; a
    /// driver-owned buffer may be overwritten by hardware at any time.
    pub(crate) fn data(&self, index: u32) -> Option<&[u8]> {
        match &self.backing {
            Backing::Mmap(buffers) => buffers
                .get(index as usize)
                .map(|b| unsafe { slice::from_raw_parts(b.start, b.length) }),
            Backing::UserPtr(buffers) => buffers.get(index as usize).map(Vec::as_slice),
        }
    }

    /// Registration info needed to queue buffer `index` in user pointer
    /// mode; `None` for mapped backings.
    pub(crate) fn user_ptr(&self, index: u32) -> Option<(c_ulong, usize)> {
        match &self.backing {
            Backing::UserPtr(buffers) => buffers
                .get(index as usize)
                .map(|b| (b.as_ptr() as c_ulong, b.len())),
            Backing::Mmap(_) => None,
        }
    }

    /// The memory mode this pool was registered with.
    pub(crate) fn memory(&self) -> v4l2_memory {
        match self.backing {
            Backing::Mmap(_) => v4l2_memory_V4L2_MEMORY_MMAP,
            Backing::UserPtr(_) => v4l2_memory_V4L2_MEMORY_USERPTR,
        }
    }

    /// Record an ownership handoff for buffer `index`.
    pub(crate) fn set_owner(&mut self, index: u32, owner: BufferOwner) {
        if let Some(slot) = self.owners.get_mut(index as usize) {
            *slot = owner;
        }
    }

    /// Validate a driver-reported buffer index against the pool bounds.
    ///
    /// An out-of-range index is a driver contract violation and is never
    /// clamped or ignored.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn check_index(&self, index: u32) -> Result<()> {
        if (index as usize) < self.owners.len() {
            Ok(())
        } else {
            Err(CaptureError::BufferIndexOutOfRange {
                index,
                count: self.owners.len() as u32,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller_owned_pool(count: usize) -> BufferPool {
        BufferPool {
            backing: Backing::UserPtr((0..count).map(|_| vec![0u8; 16]).collect()),
            owners: vec![BufferOwner::Caller; count],
        }
    }

    #[test]
    fn test_check_index_accepts_pool_range() {
        let pool = caller_owned_pool(4);
        for index in 0..4 {
            assert!(pool.check_index(index).is_ok());
        }
    }

    #[test]
    fn test_check_index_rejects_out_of_range() {
        let pool = caller_owned_pool(4);
        let err = pool.check_index(4).err().expect("index 4 must be rejected");
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            CaptureError::BufferIndexOutOfRange { index: 4, count: 4 }
        ));
    }

    #[test]
    fn test_ownership_handoff_round_trip() {
        let mut pool = caller_owned_pool(2);
        assert_eq!(pool.owner(0), Some(BufferOwner::Caller));

        pool.set_owner(0, BufferOwner::Driver);
        assert_eq!(pool.owner(0), Some(BufferOwner::Driver));
        assert_eq!(pool.owner(1), Some(BufferOwner::Caller));

        pool.set_owner(0, BufferOwner::Caller);
        assert_eq!(pool.owner(0), Some(BufferOwner::Caller));
    }

    #[test]
    fn test_data_access_is_bounds_checked() {
        let pool = caller_owned_pool(2);
        assert!(pool.data(1).is_some());
        assert!(pool.data(2).is_none());
        assert!(pool.owner(2).is_none());
    }

    #[test]
    fn test_user_ptr_reports_registration_info() {
        let pool = caller_owned_pool(2);
        let (ptr, len) = pool.user_ptr(0).expect("userptr pool exposes pointers");
        assert_ne!(ptr, 0);
        assert_eq!(len, 16);
    }
}
