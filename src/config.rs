//! Capture session configuration.

use std::time::Duration;

/// Sub-region of the sensor's native capture area selected for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Horizontal offset from the sensor origin.
    pub left: i32,
    /// Vertical offset from the sensor origin.
    pub top: i32,
    /// Width of the cropped region in pixels.
    pub width: u32,
    /// Height of the cropped region in pixels.
    pub height: u32,
}

/// How frame buffers are backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferBacking {
    /// Driver-allocated buffers mapped into the process (zero copy).
    #[default]
    Mmap,
    /// Caller-allocated buffers registered with the driver.
    UserPtr,
}

/// Configuration for one capture session.
///
/// The defaults carry the contract the rest of the pipeline assumes:
/// 1280x1080 frames, four buffers, a two second acquisition timeout and
/// memory-mapped backing.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    /// Optional crop rectangle. Applied best-effort; devices without
    /// cropping support ignore it.
    pub crop: Option<CropRect>,
    /// Optional fixed frame rate in frames per second. When set, the
    /// driver must honor it or negotiation fails.
    pub frame_rate: Option<u32>,
    /// Number of buffers requested from the driver. The grant may be
    /// smaller, but never below two.
    pub buffer_count: u32,
    /// How long a single acquisition may block waiting for a frame.
    pub timeout: Duration,
    /// Buffer backing strategy.
    pub backing: BufferBacking,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1080,
            crop: None,
            frame_rate: None,
            buffer_count: 4,
            timeout: Duration::from_secs(2),
            backing: BufferBacking::Mmap,
        }
    }
}

impl CaptureConfig {
    /// Set the requested resolution.
    #[must_use]
    pub const fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set a crop rectangle.
    #[must_use]
    pub const fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Request a fixed frame rate.
    #[must_use]
    pub const fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Set the number of buffers requested from the driver.
    #[must_use]
    pub const fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Select the buffer backing strategy.
    #[must_use]
    pub const fn with_backing(mut self, backing: BufferBacking) -> Self {
        self.backing = backing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_contract() {
        let config = CaptureConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 1080);
        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.backing, BufferBacking::Mmap);
        assert!(config.crop.is_none());
        assert!(config.frame_rate.is_none());
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = CaptureConfig::default()
            .with_resolution(640, 480)
            .with_frame_rate(30)
            .with_buffer_count(6)
            .with_backing(BufferBacking::UserPtr);
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert_eq!(config.frame_rate, Some(30));
        assert_eq!(config.buffer_count, 6);
        assert_eq!(config.backing, BufferBacking::UserPtr);
    }
}
