// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use crate::error::{AnalysisError, AnalysisResult};

/// Physical size represented by one image pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    pub pixel_width: f64,
    pub pixel_height: f64,

    /// Length unit of `pixel_width` and `pixel_height`, e.g. "µm".
    pub unit: String,
}

impl Default for Calibration {
    // Uncalibrated: one pixel per pixel.
    fn default() -> Self {
        Calibration{pixel_width: 1.0, pixel_height: 1.0, unit: "pixel".to_string()}
    }
}

impl Calibration {
    pub fn new(pixel_width: f64, pixel_height: f64, unit: &str) -> Self {
        Calibration{pixel_width, pixel_height, unit: unit.to_string()}
    }

    /// Returns an error unless both pixel dimensions are finite and positive.
    /// The geometry functions themselves never fail; they propagate NaN.
    pub fn validate(&self) -> AnalysisResult<()> {
        for (name, value) in [("pixel width", self.pixel_width),
                              ("pixel height", self.pixel_height)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(AnalysisError::InvalidCalibration(
                    format!("{} must be finite and positive, got {}", name, value)));
            }
        }
        Ok(())
    }

    /// Converts a pixel count to a physical area.
    pub fn to_physical_area(&self, pixel_area: f64) -> f64 {
        to_physical_area(pixel_area, self.pixel_width, self.pixel_height)
    }

    /// Converts a physical length (such as a blur radius) to pixels. Only the
    /// pixel width is used, so this assumes square pixels.
    pub fn to_pixels(&self, physical_length: f64) -> f64 {
        physical_length / self.pixel_width
    }

    /// Unit label for areas, e.g. "µm²".
    pub fn area_unit(&self) -> String {
        format!("{}\u{00b2}", self.unit)
    }
}

pub fn to_physical_area(pixel_area: f64, pixel_width: f64, pixel_height: f64) -> f64 {
    pixel_area * pixel_width * pixel_height
}

// mod tests.
