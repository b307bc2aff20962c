//! Streaming state and the blocking frame-acquisition loop.

use std::io;
use std::mem;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use v4l::v4l2;
use v4l::v4l_sys::*;

use crate::device::V4l2Device;
use crate::error::{CaptureError, Result};
use crate::ioctl::{wait_readable, xioctl};
use crate::pool::{BufferOwner, BufferPool};
use crate::traits::{CaptureFormat, CaptureStream, Frame};

/// An active streaming session on a capture device.
///
/// On creation every pool buffer is queued to the driver and streaming is
/// enabled. Dropping the stream disables streaming before the pool
/// releases its mappings. The stream borrows the device, so the device
/// cannot be closed while a stream exists.
pub struct V4l2Stream<'a> {
    device: &'a V4l2Device,
    pool: BufferPool,
    format: CaptureFormat,
    /// Buffer held by the caller since the previous acquisition. It is
    /// handed back to the driver at the start of the next one, keeping the
    /// last frame's contents stable for as long as the caller reads it.
    checked_out: Option<u32>,
    stopped: bool,
}

impl<'a> V4l2Stream<'a> {
    pub(crate) fn start(
        device: &'a V4l2Device,
        mut pool: BufferPool,
        format: CaptureFormat,
    ) -> Result<Self> {
        let fd = device.fd();
        #[allow(clippy::cast_possible_truncation)]
        let count = pool.len() as u32;
        for index in 0..count {
            queue_buffer(fd, &pool, index).map_err(CaptureError::StreamOnFailed)?;
            pool.set_owner(index, BufferOwner::Driver);
        }

        unsafe {
            let mut kind = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
            xioctl(
                fd,
                v4l2::vidioc::VIDIOC_STREAMON,
                ptr::addr_of_mut!(kind).cast::<c_void>(),
            )
            .map_err(CaptureError::StreamOnFailed)?;
        }
        debug!(buffers = pool.len(), "streaming enabled");

        Ok(Self {
            device,
            pool,
            format,
            checked_out: None,
            stopped: false,
        })
    }

    /// Number of buffers granted by the driver.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }

    /// The negotiated frame format.
    #[must_use]
    pub const fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Current owner of buffer `index`, if it exists.
    #[must_use]
    pub fn buffer_owner(&self, index: u32) -> Option<BufferOwner> {
        self.pool.owner(index)
    }

    /// Disable streaming. Runs automatically when the stream is dropped;
    /// calling it again afterwards is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        unsafe {
            let mut kind = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
            xioctl(
                self.device.fd(),
                v4l2::vidioc::VIDIOC_STREAMOFF,
                ptr::addr_of_mut!(kind).cast::<c_void>(),
            )
            .map_err(CaptureError::StreamOffFailed)?;
        }
        debug!("streaming disabled");
        Ok(())
    }
}

impl CaptureStream for V4l2Stream<'_> {
    fn acquire(&mut self, timeout: Duration) -> Result<Frame<'_>> {
        let fd = self.device.fd();

        // Hand the previously returned buffer back to the driver.
        if let Some(index) = self.checked_out.take() {
            queue_buffer(fd, &self.pool, index).map_err(CaptureError::RequeueFailed)?;
            self.pool.set_owner(index, BufferOwner::Driver);
        }

        let deadline = Instant::now() + timeout;
        let desc = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !wait_readable(fd, remaining).map_err(CaptureError::WaitFailed)? {
                return Err(CaptureError::Timeout);
            }
            match dequeue_buffer(fd, &self.pool) {
                Ok(desc) => break desc,
                // Readiness can be spurious; not-ready means wait again.
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    trace!("dequeue would block, waiting again");
                }
                Err(err) => return Err(CaptureError::DequeueFailed(err)),
            }
        };

        self.pool.check_index(desc.index)?;
        self.pool.set_owner(desc.index, BufferOwner::Caller);
        self.checked_out = Some(desc.index);

        #[allow(clippy::cast_possible_truncation)]
        let count = self.pool.len() as u32;
        let data = self
            .pool
            .data(desc.index)
            .ok_or(CaptureError::BufferIndexOutOfRange {
                index: desc.index,
                count,
            })?;
        let used = desc.bytesused as usize;
        let data = match data.get(..used) {
            Some(filled) if used > 0 => filled,
            _ => data,
        };

        Ok(Frame {
            data,
            width: self.format.width,
            height: self.format.height,
            sequence: desc.sequence,
        })
    }
}

impl Drop for V4l2Stream<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "failed to disable streaming");
        }
    }
}

struct DequeuedBuffer {
    index: u32,
    bytesused: u32,
    sequence: u32,
}

fn queue_buffer(fd: RawFd, pool: &BufferPool, index: u32) -> io::Result<()> {
    unsafe {
        let mut buf = v4l2_buffer {
            index,
            type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: pool.memory(),
            ..mem::zeroed()
        };
        if let Some((start, length)) = pool.user_ptr(index) {
            buf.m.userptr = start;
            #[allow(clippy::cast_possible_truncation)]
            {
                buf.length = length as u32;
            }
        }
        xioctl(
            fd,
            v4l2::vidioc::VIDIOC_QBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )
    }
}

fn dequeue_buffer(fd: RawFd, pool: &BufferPool) -> io::Result<DequeuedBuffer> {
    unsafe {
        let mut buf = v4l2_buffer {
            type_: v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: pool.memory(),
            ..mem::zeroed()
        };
        xioctl(
            fd,
            v4l2::vidioc::VIDIOC_DQBUF,
            ptr::addr_of_mut!(buf).cast::<c_void>(),
        )?;
        Ok(DequeuedBuffer {
            index: buf.index,
            bytesused: buf.bytesused,
            sequence: buf.sequence,
        })
    }
}
