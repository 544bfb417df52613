// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Instant;

use image::{GrayImage, Luma};
use log::{debug, warn};

use crate::error::AnalysisResult;
use crate::histogram_funcs::{ThresholdMethod, Thresholder};
use crate::image_funcs::{find_edges, gaussian_blur, region_statistics, Channel,
                         ImageStack};
use crate::region::{Region, FOREGROUND};

/// Builds the region of pixels at or above an automatically chosen intensity
/// threshold.
///
/// The channel (numbered from 1) is blurred with a Gaussian of
/// `sigma_physical` (calibrated units, converted to pixels with the stack's
/// pixel width). The histogram used to pick the threshold is taken over
/// `parent` only, if given, but the threshold is then applied to the whole
/// blurred image, so the result may include pixels outside `parent`.
///
/// The chosen bin maps linearly onto the statistics range:
/// `threshold = bin / 255 × (max − min) + min`. If `thresholder` finds no
/// threshold, bin 0 is used (threshold = min).
pub fn threshold_region(stack: &ImageStack,
                        channel_index: usize,
                        parent: Option<&Region>,
                        method: ThresholdMethod,
                        sigma_physical: f64,
                        thresholder: &dyn Thresholder) -> AnalysisResult<Region> {
    let start = Instant::now();
    let channel = stack.channel(channel_index)?;
    let sigma_px = stack.calibration().to_pixels(sigma_physical);
    let blurred = gaussian_blur(channel, sigma_px);
    let stats = region_statistics(&blurred, parent);

    let bin = match thresholder.threshold(&stats.histogram, method) {
        Some(bin) => bin,
        None => {
            warn!("{} found no threshold for channel {} of {}; using minimum",
                  method, channel_index, stack.title());
            0
        },
    };
    let threshold = bin as f64 / 255.0 * (stats.max - stats.min) + stats.min;
    let mask = threshold_mask(&blurred, threshold);
    let region = Region::from_mask(&mask);
    debug!("Channel {} {} threshold {:.3} (bin {}) gave {} pixels in {:?}",
           channel_index, method, threshold, bin, region.area_px(), start.elapsed());
    Ok(region)
}

/// Builds `levels` nested density regions: level 0 is thresholded within
/// `parent`, and each further level within the level before it.
pub fn density_levels(stack: &ImageStack,
                      channel_index: usize,
                      parent: Option<&Region>,
                      levels: usize,
                      method: ThresholdMethod,
                      sigma_physical: f64,
                      thresholder: &dyn Thresholder) -> AnalysisResult<Vec<Region>> {
    let mut result = Vec::<Region>::with_capacity(levels);
    for level in 0..levels {
        let level_parent = if level == 0 { parent } else { result.last() };
        let region = threshold_region(stack, channel_index, level_parent,
                                      method, sigma_physical, thresholder)?;
        debug!("Density level {}: {} pixels", level, region.area_px());
        result.push(region);
    }
    Ok(result)
}

/// Texture measure of `channel` within `region`: mean plus standard deviation
/// of the Sobel gradient magnitude, divided by the square root of the area in
/// pixels. NaN for an empty region.
pub fn density_metric(region: &Region, channel: &Channel) -> f64 {
    density_metric_from_edges(region, &find_edges(channel))
}

/// As [density_metric()], with the gradient image already computed.
pub fn density_metric_from_edges(region: &Region, edges: &Channel) -> f64 {
    let stats = region_statistics(edges, Some(region));
    if stats.pixel_count == 0 {
        return f64::NAN;
    }
    (stats.mean + stats.stddev) / (stats.pixel_count as f64).sqrt()
}

// NaN pixels and thresholds never select anything.
fn threshold_mask(channel: &Channel, threshold: f64) -> GrayImage {
    let (width, height) = channel.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if channel.get_pixel(x, y).0[0] as f64 >= threshold {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

// mod tests.
