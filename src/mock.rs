//! Mock device implementation for testing without hardware.

use std::time::Duration;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::traits::{
    CameraDevice, CaptureFormat, CaptureStream, DeviceCapabilities, Frame,
};

/// Mock device for testing without hardware.
///
/// Behaves like a well-formed driver by default; the builder knobs inject
/// the failure modes a real device can exhibit (no capture capability, a
/// small buffer grant, a sensor that never produces a frame).
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Option<CaptureFormat>,
    requested_buffers: u32,
    buffer_grant: u32,
    starved: bool,
    pattern: TestPattern,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: None,
            requested_buffers: 0,
            buffer_grant: u32::MAX,
            starved: false,
            pattern: TestPattern::ColorBars,
        }
    }

    /// Cap the number of buffers the mock driver will grant.
    #[must_use]
    pub const fn with_buffer_grant(mut self, grant: u32) -> Self {
        self.buffer_grant = grant;
        self
    }

    /// Report a device with no video capture capability.
    #[must_use]
    pub fn without_capture(mut self) -> Self {
        self.capabilities.can_capture = false;
        self
    }

    /// Simulate a device that never signals frame readiness.
    #[must_use]
    pub const fn starved(mut self) -> Self {
        self.starved = true;
        self
    }

    /// Set the test pattern for frame generation.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> Option<&DeviceCapabilities> {
        Some(&self.capabilities)
    }

    fn negotiate(&mut self, config: &CaptureConfig) -> Result<CaptureFormat> {
        if !self.capabilities.can_capture {
            return Err(CaptureError::UnsupportedDevice(
                "mock device has no video capture capability".to_owned(),
            ));
        }
        let format = CaptureFormat::new(config.width, config.height);
        self.format = Some(format);
        self.requested_buffers = config.buffer_count;
        Ok(format)
    }

    fn start_stream(&mut self) -> Result<Self::Stream<'_>> {
        let format = self.format.ok_or(CaptureError::NotNegotiated)?;
        let granted = self.requested_buffers.min(self.buffer_grant);
        if granted < 2 {
            return Err(CaptureError::InsufficientBuffers { granted });
        }
        let frame = vec![0u8; format.size as usize];
        Ok(MockStream {
            device: self,
            format,
            granted,
            frame,
            sequence: 0,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Eight vertical color bars.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with the given R, G, B values.
    Solid(u8, u8, u8),
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
    format: CaptureFormat,
    granted: u32,
    frame: Vec<u8>,
    sequence: u32,
}

impl MockStream<'_> {
    /// Number of buffers granted by the mock driver.
    #[must_use]
    pub const fn buffer_count(&self) -> u32 {
        self.granted
    }
}

impl CaptureStream for MockStream<'_> {
    fn acquire(&mut self, _timeout: Duration) -> Result<Frame<'_>> {
        if self.device.starved {
            return Err(CaptureError::Timeout);
        }
        generate_test_frame(&mut self.frame, self.format, self.device.pattern);
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(Frame {
            data: &self.frame,
            width: self.format.width,
            height: self.format.height,
            sequence,
        })
    }
}

/// RGB values for the 8 bars: White, Yellow, Cyan, Green, Magenta, Red,
/// Blue, Black.
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

/// Generate test frame data based on pattern.
fn generate_test_frame(data: &mut [u8], format: CaptureFormat, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => generate_color_bars(data, format.width, format.height),
        TestPattern::Gradient => generate_gradient(data, format.width, format.height),
        TestPattern::Solid(r, g, b) => generate_solid(data, r, g, b),
    }
}

/// Write one XBGR32 pixel (B, G, R, padding byte order).
fn put_pixel(data: &mut [u8], width: u32, x: u32, y: u32, r: u8, g: u8, b: u8) {
    let offset = ((y * width + x) * 4) as usize;
    if offset + 3 < data.len() {
        data[offset] = b;
        data[offset + 1] = g;
        data[offset + 2] = r;
        data[offset + 3] = 0;
    }
}

fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    let bar_width = (width / 8).max(1);
    for y in 0..height {
        for x in 0..width {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (r, g, b) = COLOR_BARS[bar_idx];
            put_pixel(data, width, x, y, r, g, b);
        }
    }
}

fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in 0..width {
            #[allow(clippy::cast_possible_truncation)]
            let value = ((x * 255) / width.max(1)) as u8;
            put_pixel(data, width, x, y, value, value, value);
        }
    }
}

fn generate_solid(data: &mut [u8], r: u8, g: u8, b: u8) {
    for offset in (0..data.len()).step_by(4) {
        if offset + 3 < data.len() {
            data[offset] = b;
            data[offset + 1] = g;
            data[offset + 2] = r;
            data[offset + 3] = 0;
        }
    }
}
