//! Core traits and types for the capture abstraction.

use std::time::Duration;

use crate::config::CaptureConfig;
use crate::error::Result;

/// Pixel format representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Packed 32-bit XBGR layout with one padding channel (`XR24`).
    pub const XBGR32: Self = Self::new(b"XR24");

    /// The driver-facing pixel format code.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

/// Negotiated capture format. Set once per device session during
/// negotiation, immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl CaptureFormat {
    /// Bytes per pixel of the packed 32-bit XBGR layout.
    pub const BYTES_PER_PIXEL: u32 = 4;

    /// Create a format specification for the given resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        let stride = width * Self::BYTES_PER_PIXEL;
        Self {
            width,
            height,
            fourcc: FourCC::XBGR32,
            stride,
            size: stride * height,
        }
    }
}

/// Device identity and capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming I/O.
    pub can_stream: bool,
}

/// A captured frame, valid until the next acquisition on the same stream.
///
/// The data aliases a buffer co-owned with the kernel driver. The borrow
/// keeps the stream locked, so the buffer cannot be handed back to the
/// driver while the frame is held.
#[derive(Debug)]
pub struct Frame<'a> {
    /// Raw pixel data, packed 32-bit XBGR (B, G, R, X byte order).
    pub data: &'a [u8],
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Driver-assigned frame sequence number.
    pub sequence: u32,
}

impl Frame<'_> {
    /// Get the RGB value of the pixel at the specified coordinates.
    ///
    /// Returns `None` when the coordinates fall outside the frame or the
    /// underlying buffer is shorter than the format implies.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y * self.width + x) * CaptureFormat::BYTES_PER_PIXEL) as usize;
        let b = *self.data.get(offset)?;
        let g = *self.data.get(offset + 1)?;
        let r = *self.data.get(offset + 2)?;
        Some((r, g, b))
    }
}

/// Abstraction over capture device operations.
pub trait CameraDevice {
    /// The stream type returned by `start_stream`.
    type Stream<'a>: CaptureStream
    where
        Self: 'a;

    /// Identity and capability flags reported by the device, available
    /// after a successful negotiation.
    fn capabilities(&self) -> Option<&DeviceCapabilities>;

    /// Negotiate the capture contract: capability check, optional crop and
    /// frame interval, pixel format. Returns the format the driver settled
    /// on.
    fn negotiate(&mut self, config: &CaptureConfig) -> Result<CaptureFormat>;

    /// Allocate the buffer pool and enable streaming.
    fn start_stream(&mut self) -> Result<Self::Stream<'_>>;
}

/// Abstraction over a streaming capture session.
pub trait CaptureStream {
    /// Block until the next captured frame is ready, up to `timeout`.
    ///
    /// The returned frame borrows the stream and must be dropped before
    /// the next acquisition.
    fn acquire(&mut self, timeout: Duration) -> Result<Frame<'_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_code_is_little_endian() {
        // 'X' | 'R' << 8 | '2' << 16 | '4' << 24
        assert_eq!(FourCC::XBGR32.code(), 0x3432_5258);
    }

    #[test]
    fn test_format_derives_stride_and_size() {
        let format = CaptureFormat::new(1280, 1080);
        assert_eq!(format.stride, 1280 * 4);
        assert_eq!(format.size, 1280 * 1080 * 4);
        assert_eq!(format.fourcc, FourCC::XBGR32);
    }

    #[test]
    fn test_pixel_at_reads_bgrx_layout() {
        // One 2x1 frame: first pixel red, second pixel blue.
        let data = [0u8, 0, 255, 0, 255, 0, 0, 0];
        let frame = Frame {
            data: &data,
            width: 2,
            height: 1,
            sequence: 0,
        };
        assert_eq!(frame.pixel_at(0, 0), Some((255, 0, 0)));
        assert_eq!(frame.pixel_at(1, 0), Some((0, 0, 255)));
        assert_eq!(frame.pixel_at(2, 0), None);
        assert_eq!(frame.pixel_at(0, 1), None);
    }
}
