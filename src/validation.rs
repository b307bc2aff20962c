//! Frame validation utilities for test pattern verification.
//!
//! Used by unit and integration tests to check that captured frames
//! contain expected content instead of uninitialized buffer memory.

use thiserror::Error;

use crate::traits::Frame;

/// Why a frame failed validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A sampled pixel fell outside the frame.
    #[error("pixel ({x}, {y}) is out of bounds")]
    OutOfBounds {
        /// Sampled x coordinate.
        x: u32,
        /// Sampled y coordinate.
        y: u32,
    },
    /// The frame content did not match the expected pattern.
    #[error("{0}")]
    Mismatch(String),
}

/// Result type for validation checks.
pub type ValidationResult = std::result::Result<(), ValidationError>;

/// Expected RGB values for the 8 color bars generated by the mock device
/// and by common virtual camera bar patterns: White, Yellow, Cyan, Green,
/// Magenta, Red, Blue, Black.
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

/// Tolerance for RGB matching; XBGR32 carries exact channel values but
/// hardware bar generators may dither slightly.
const COLOR_TOLERANCE: u8 = 16;

/// Validates that a frame contains the 8-bar color pattern.
///
/// Samples the center of each vertical stripe at the middle row and
/// compares against the expected color within [`COLOR_TOLERANCE`].
pub fn validate_color_bars(frame: &Frame<'_>) -> ValidationResult {
    let bar_width = (frame.width / 8).max(1);
    let center_y = frame.height / 2;

    for (bar_idx, expected) in COLOR_BARS.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);
        let actual = frame
            .pixel_at(sample_x, center_y)
            .ok_or(ValidationError::OutOfBounds {
                x: sample_x,
                y: center_y,
            })?;

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(ValidationError::Mismatch(format!(
                "color bar {bar_idx} at ({sample_x}, {center_y}): \
                 expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }
    Ok(())
}

/// Validates that a frame contains a horizontal gradient.
///
/// Samples the center row and requires luminance to increase
/// monotonically from left to right with a significant total change
/// (rejects solid frames).
pub fn validate_gradient(frame: &Frame<'_>) -> ValidationResult {
    let center_y = frame.height / 2;
    let sample_step = 10u32;
    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;
    let mut last: Option<f32> = None;

    for x in (0..frame.width).step_by(sample_step as usize) {
        let (r, g, b) = frame
            .pixel_at(x, center_y)
            .ok_or(ValidationError::OutOfBounds { x, y: center_y })?;

        // Rec. 601 luma.
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if first.is_none() {
            first = Some(luminance);
        }
        if let Some(prev) = prev {
            if luminance < prev - 1.0 {
                return Err(ValidationError::Mismatch(format!(
                    "gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }
        prev = Some(luminance);
        last = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, last) {
        let change = last - first;
        if change < 50.0 {
            return Err(ValidationError::Mismatch(format!(
                "insufficient luminance change for gradient: {change} \
                 (expected at least 50.0)"
            )));
        }
    }
    Ok(())
}

/// Validates that captured sequence numbers increment by one with no gaps.
pub fn validate_sequence(sequences: &[u32]) -> ValidationResult {
    if sequences.is_empty() {
        return Err(ValidationError::Mismatch(
            "cannot validate an empty sequence".to_owned(),
        ));
    }
    for window in sequences.windows(2) {
        if let [prev, curr] = window {
            if *curr != prev + 1 {
                return Err(ValidationError::Mismatch(format!(
                    "sequence gap: expected {}, got {curr}",
                    prev + 1
                )));
            }
        }
    }
    Ok(())
}

/// Check whether two RGB colors match within a per-channel tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;
    ar.abs_diff(er) <= tolerance && ag.abs_diff(eg) <= tolerance && ab.abs_diff(eb) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::mock::{MockDevice, TestPattern};
    use crate::traits::{CameraDevice, CaptureStream};
    use std::time::Duration;

    fn mock_frame_check(
        pattern: TestPattern,
        check: fn(&Frame<'_>) -> ValidationResult,
    ) -> ValidationResult {
        let mut device = MockDevice::new().with_pattern(pattern);
        device
            .negotiate(&CaptureConfig::default().with_resolution(640, 480))
            .expect("negotiate should succeed");
        let mut stream = device.start_stream().expect("stream should start");
        let frame = stream
            .acquire(Duration::from_secs(2))
            .expect("acquire should succeed");
        check(&frame)
    }

    #[test]
    fn test_color_bars_pass_validation() {
        let result = mock_frame_check(TestPattern::ColorBars, validate_color_bars);
        assert!(result.is_ok(), "color bars should validate: {result:?}");
    }

    #[test]
    fn test_gradient_fails_color_bar_validation() {
        let result = mock_frame_check(TestPattern::Gradient, validate_color_bars);
        assert!(result.is_err(), "gradient must not pass as color bars");
    }

    #[test]
    fn test_gradient_passes_validation() {
        let result = mock_frame_check(TestPattern::Gradient, validate_gradient);
        assert!(result.is_ok(), "gradient should validate: {result:?}");
    }

    #[test]
    fn test_solid_fails_gradient_validation() {
        let result = mock_frame_check(TestPattern::Solid(128, 128, 128), validate_gradient);
        assert!(result.is_err(), "solid frame must not pass as gradient");
    }

    #[test]
    fn test_contiguous_sequence_passes() {
        assert!(validate_sequence(&[4, 5, 6, 7]).is_ok());
    }

    #[test]
    fn test_sequence_gap_is_detected() {
        assert!(validate_sequence(&[0, 1, 3]).is_err());
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        assert!(validate_sequence(&[]).is_err());
    }

    #[test]
    fn test_colors_match_within_tolerance() {
        assert!(colors_match((100, 150, 200), (100, 150, 200), 0));
        assert!(colors_match((100, 150, 200), (105, 155, 205), 10));
        assert!(!colors_match((100, 150, 200), (120, 150, 200), 10));
    }
}
