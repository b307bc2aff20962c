//! Typed errors for capture sessions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for capture operations.
///
/// Variants fall into two tiers. Some conditions are worth reporting and
/// retrying: the device node is missing, the open was refused, or no frame
/// arrived within the acquisition timeout. The rest are contract
/// violations meaning the device cannot produce frames in the required
/// format at all; [`CaptureError::is_fatal`] tells the tiers apart.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device path does not exist.
    #[error("device {} not found", .0.display())]
    NotFound(PathBuf),

    /// The device path exists but is not a character special device.
    #[error("{} is not a capture device", .0.display())]
    NotACaptureDevice(PathBuf),

    /// Opening the device node failed (permissions, busy, ...).
    #[error("cannot open {}: {}", .path.display(), .source)]
    OpenError {
        /// Path of the device node.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Releasing the device descriptor failed.
    #[error("close failed: {0}")]
    CloseError(io::Error),

    /// The device rejected the capability query or lacks video capture
    /// support.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The driver rejected the requested fixed frame interval.
    #[error("frame rate negotiation failed: {0}")]
    FrameRateNegotiationFailed(io::Error),

    /// The driver rejected the required pixel format or resolution.
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(io::Error),

    /// The driver does not support memory-mapped streaming I/O.
    #[error("device does not support memory mapped buffers")]
    MmapUnsupported,

    /// The driver does not support user pointer streaming I/O.
    #[error("device does not support user pointer buffers")]
    UserPtrUnsupported,

    /// The buffer request was rejected for a reason other than the I/O
    /// method being unsupported.
    #[error("buffer request failed: {0}")]
    BufferRequestFailed(io::Error),

    /// The driver granted fewer buffers than a double-buffered stream
    /// needs.
    #[error("insufficient buffer memory: driver granted {granted}")]
    InsufficientBuffers {
        /// Number of buffers the driver granted.
        granted: u32,
    },

    /// Mapping a driver buffer into the process failed.
    #[error("buffer mapping failed: {0}")]
    MapFailed(io::Error),

    /// Streaming was requested before format negotiation.
    #[error("capture format has not been negotiated")]
    NotNegotiated,

    /// Queueing the initial buffers or enabling streaming failed.
    #[error("stream-on failed: {0}")]
    StreamOnFailed(io::Error),

    /// Disabling streaming failed.
    #[error("stream-off failed: {0}")]
    StreamOffFailed(io::Error),

    /// No frame became ready within the acquisition timeout.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// Waiting for device readiness failed for a reason other than a
    /// signal interruption.
    #[error("wait for frame failed: {0}")]
    WaitFailed(io::Error),

    /// Dequeueing a filled buffer failed for a reason other than
    /// not-ready.
    #[error("buffer dequeue failed: {0}")]
    DequeueFailed(io::Error),

    /// Handing a buffer back to the driver failed.
    #[error("buffer requeue failed: {0}")]
    RequeueFailed(io::Error),

    /// The driver returned a buffer index outside the negotiated pool.
    #[error("driver returned buffer index {index}, pool holds {count}")]
    BufferIndexOutOfRange {
        /// Index reported by the driver.
        index: u32,
        /// Number of buffers in the pool.
        count: u32,
    },
}

impl CaptureError {
    /// Whether the error means the device cannot satisfy the capture
    /// contract at all, as opposed to a condition the caller can report
    /// and retry (missing device, failed open or close, timeout).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_)
                | Self::NotACaptureDevice(_)
                | Self::OpenError { .. }
                | Self::CloseError(_)
                | Self::Timeout
        )
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
