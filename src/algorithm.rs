//! ChromatinDetect measures cell nuclei and the chromatin inside them in
//! calibrated fluorescence microscopy images.
//!
//! Two analyses are provided, each operating on a multi-channel
//! [ImageStack] whose channel 1 is a DNA stain:
//!
//! * [run_nucleus_segmentation()] finds every nucleus in the image,
//!   splitting nuclei that touch, and reports the area, circularity and
//!   per-channel intensity of each.
//! * [run_heterochromatin_classification()] outlines a single cell's
//!   chromatin, grades it into nested density levels, and reports how much of
//!   the densest-staining material (channel 2, e.g. a heterochromatin marker)
//!   falls within the chromatin.
//!
//! Both append their measurements to a caller-owned [ResultsTable] and the
//! regions they find to a caller-owned [Overlay], so a caller processing a
//! series of images accumulates one table across all of them.
//!
//! # Algorithm
//!
//! ## Density thresholding
//!
//! Every region starts from [threshold_region()]: the channel is smoothed
//! with a Gaussian whose width is given in calibrated units, a 256 bin
//! histogram of the smoothed values is taken (optionally only within a
//! parent region), and an automatic histogram method (Otsu, Huang, etc.)
//! chooses a bin. The bin is mapped back onto the intensity range and the
//! whole smoothed image is thresholded there. Thresholding within a parent
//! only affects the histogram, so nesting regions this way grades a cell
//! into progressively brighter cores.
//!
//! ## Nucleus splitting
//!
//! Nuclei in dense fields, or nuclei breaking down during mitosis, touch or
//! merge after thresholding. A thresholded object is accepted as a nucleus
//! once its area is below the `segment_area` limit; larger objects are
//! split with a distance-map watershed at a high tolerance, and the pieces
//! that are still too large are split again at progressively lower
//! tolerances. Pieces below `min_area` are debris and are dropped. See
//! [crate::watershed] for details.
//!
//! # Caveats
//!
//! * The heterochromatin analysis computes three density levels but reports
//!   only the outermost one (level 0), and outlines only that level.
//! * "DNA Density" is a texture measure, (mean + stddev) of the Sobel gradient
//!   divided by the square root of the area in pixels, not in calibrated
//!   units. Values are therefore only comparable between images of the same
//!   pixel size.
//! * Circularity is computed in pixel units and is approximate when pixels
//!   are not square.

use std::time::Instant;

use log::{debug, info};

use crate::density::{density_levels, density_metric_from_edges, threshold_region};
use crate::error::AnalysisResult;
use crate::histogram_funcs::{ThresholdMethod, Thresholder};
use crate::image_funcs::{find_edges, region_statistics, ImageStack};
use crate::mask_funcs::fill_holes;
use crate::region::{regions_from_mask, Region};
use crate::results::{time_label, Overlay, ResultsTable, HETEROCHROMATIN_COLOR,
                     LEVEL_COLOR, NUCLEUS_COLOR};
use crate::watershed::{segment, SegmentParams, Watersheder};

/// Parameters of [run_heterochromatin_classification()].
#[derive(Copy, Clone, Debug)]
pub struct ClassifierParams {
    /// Gaussian smoothing applied before every threshold, in calibrated
    /// units.
    pub sigma: f64,

    /// Number of nested density levels.
    pub levels: usize,

    /// Channel (from 1) of the DNA stain.
    pub dna_channel: usize,

    /// Channel (from 1) of the heterochromatin marker.
    pub heterochromatin_channel: usize,

    /// Method finding the whole cell.
    pub cell_method: ThresholdMethod,

    /// Method finding each density level.
    pub level_method: ThresholdMethod,

    /// Method finding heterochromatin within level 0.
    pub heterochromatin_method: ThresholdMethod,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        ClassifierParams{sigma: 0.25, levels: 3,
                         dna_channel: 1, heterochromatin_channel: 2,
                         cell_method: ThresholdMethod::Minimum,
                         level_method: ThresholdMethod::Otsu,
                         heterochromatin_method: ThresholdMethod::MaxEntropy}
    }
}

/// Parameters of [run_nucleus_segmentation()].
#[derive(Copy, Clone, Debug)]
pub struct NucleusParams {
    /// Gaussian smoothing before thresholding, in calibrated units.
    pub sigma: f64,

    pub method: ThresholdMethod,

    /// Channel (from 1) of the DNA stain. Channels 1 and 2 are both
    /// measured regardless.
    pub channel: usize,

    pub segment: SegmentParams,
}

impl Default for NucleusParams {
    fn default() -> Self {
        NucleusParams{sigma: 0.4, method: ThresholdMethod::Huang, channel: 1,
                      segment: SegmentParams::default()}
    }
}

/// Grades the chromatin of the cell in `stack` into density levels and
/// measures the heterochromatin marker within it.
///
/// # Arguments
///   `stack` - Calibrated image with the DNA and heterochromatin channels
///   named by `params`.
///
///   `params` - See [ClassifierParams]; `ClassifierParams::default()` gives
///   the standard analysis.
///
///   `thresholder` - Chooses histogram thresholds. Normally
///   [crate::histogram_funcs::HistogramThresholder].
///
///   `table` - One row is appended, for density level 0.
///
///   `overlay` - Level 0 (light blue) and the heterochromatin region
///   (magenta) are appended.
///
/// # Returns
/// An error if a channel is missing; degenerate images produce NaN
/// measurements instead.
pub fn run_heterochromatin_classification(stack: &ImageStack,
                                          params: &ClassifierParams,
                                          thresholder: &dyn Thresholder,
                                          table: &mut ResultsTable,
                                          overlay: &mut Overlay) -> AnalysisResult<()> {
    let start = Instant::now();
    let calibration = stack.calibration();
    let dna = stack.channel(params.dna_channel)?;
    stack.channel(params.heterochromatin_channel)?;

    let cell = threshold_region(stack, params.dna_channel, None,
                                params.cell_method, params.sigma, thresholder)?;
    let cell_area_px = cell.area_px() as f64;

    let levels = density_levels(stack, params.dna_channel, None, params.levels.max(1),
                                params.level_method, params.sigma, thresholder)?;
    overlay.add(levels[0].clone(), LEVEL_COLOR);

    let heterochromatin = threshold_region(
        stack, params.heterochromatin_channel, Some(&levels[0]),
        params.heterochromatin_method, params.sigma, thresholder)?;
    overlay.add(heterochromatin.clone(), HETEROCHROMATIN_COLOR);

    let intersections: Vec<Region> =
        levels.iter().map(|level| level.intersect(&heterochromatin)).collect();
    for (i, (level, both)) in levels.iter().zip(&intersections).enumerate() {
        debug!("Level {}: {} pixels, {} with heterochromatin",
               i, level.area_px(), both.area_px());
    }

    // Only the outermost level is reported.
    let i = 0;
    let level = &levels[i];
    let level_area_px = level.area_px() as f64;
    let edges = find_edges(dna);
    let area_unit = calibration.area_unit();
    let row = table.add_row();
    table.set_value("Image", row, stack.title());
    table.set_value("Time (h)", row, time_label(stack.title()));
    table.set_value(&format!("Cell Area ({})", area_unit), row,
                    calibration.to_physical_area(cell_area_px));
    table.set_value("Density Level", row, i);
    table.set_value("DNA Density", row, density_metric_from_edges(level, &edges));
    table.set_value(&format!("DNA Area ({})", area_unit), row,
                    calibration.to_physical_area(level_area_px));
    table.set_value("Proportion of Cell Area", row, ratio(level_area_px, cell_area_px));
    table.set_value(&format!("Heterochromatin Area ({})", area_unit), row,
                    heterochromatin.physical_area(calibration));
    table.set_value("Heterochromatin Proportion", row,
                    ratio(intersections[i].area_px() as f64, level_area_px));
    table.set_value("DNA Density in Heterochromatin", row,
                    density_metric_from_edges(&intersections[i], &edges));

    info!("Classified chromatin of {} in {:?}", stack.title(), start.elapsed());
    Ok(())
}

/// Finds and measures the nuclei in `stack`.
///
/// # Arguments
///   `stack` - Calibrated image with at least two channels.
///
///   `params` - See [NucleusParams]; `NucleusParams::default()` gives the
///   standard analysis.
///
///   `thresholder` - Chooses the histogram threshold.
///
///   `watersheder` - Splits touching nuclei. Normally
///   [crate::watershed::EdmWatershed].
///
///   `table` - One row is appended per nucleus, numbered from 0.
///
///   `overlay` - Every nucleus is appended (yellow).
///
/// # Returns
/// The nuclei, in the order of their rows; or an error if a channel is
/// missing.
pub fn run_nucleus_segmentation(stack: &ImageStack,
                                params: &NucleusParams,
                                thresholder: &dyn Thresholder,
                                watersheder: &dyn Watersheder,
                                table: &mut ResultsTable,
                                overlay: &mut Overlay) -> AnalysisResult<Vec<Region>> {
    let start = Instant::now();
    let calibration = stack.calibration();
    let c1 = stack.channel(1)?;
    let c2 = stack.channel(2)?;

    let foreground = threshold_region(stack, params.channel, None, params.method,
                                      params.sigma, thresholder)?;
    let (width, height) = stack.dimensions();
    let mut mask = foreground.to_image_mask(width, height);
    fill_holes(&mut mask);
    let objects = regions_from_mask(&mask);
    debug!("{} objects before splitting", objects.len());

    let mut nuclei = Vec::<Region>::new();
    for object in &objects {
        nuclei.extend(segment(object, params.segment.start_tolerance, &params.segment,
                              calibration, watersheder));
    }

    let area_column = format!("Area ({})", calibration.area_unit());
    for (i, nucleus) in nuclei.iter().enumerate() {
        overlay.add(nucleus.clone(), NUCLEUS_COLOR);
        let c1_stats = region_statistics(c1, Some(nucleus));
        let c2_stats = region_statistics(c2, Some(nucleus));
        let row = table.add_row();
        table.set_value("Image", row, stack.title());
        table.set_value("Nucleus", row, i);
        table.set_value(&area_column, row, nucleus.physical_area(calibration));
        table.set_value("Circularity", row, nucleus.circularity());
        table.set_value("C1 Mean", row, c1_stats.mean);
        table.set_value("C1 StdDev", row, c1_stats.stddev);
        table.set_value("C2 Mean", row, c2_stats.mean);
        table.set_value("C2 StdDev", row, c2_stats.stddev);
    }
    info!("Found {} nuclei from {} objects in {} in {:?}",
          nuclei.len(), objects.len(), stack.title(), start.elapsed());
    Ok(nuclei)
}

// NaN when the denominator is zero.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return f64::NAN;
    }
    numerator / denominator
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use image::Luma;
    use crate::calibration::Calibration;
    use crate::histogram_funcs::HistogramThresholder;
    use crate::image_funcs::Channel;
    use crate::watershed::EdmWatershed;
    use super::*;

    // Disks of `value` on a background of 10. Each disk is (cx, cy, radius)
    // in pixels.
    fn disks_channel(width: u32, height: u32, disks: &[(f64, f64, f64)],
                     value: f32) -> Channel {
        Channel::from_fn(width, height, |x, y| {
            let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
            let inside = disks.iter().any(|&(cx, cy, r)| {
                (px - cx).powi(2) + (py - cy).powi(2) <= r * r
            });
            Luma([if inside { value } else { 10.0 }])
        })
    }

    // Pixel radius of a disk of `area` µm² at 0.1 µm per pixel.
    fn radius_for_area(area: f64) -> f64 {
        (area * 100.0 / std::f64::consts::PI).sqrt()
    }

    fn nucleus_stack(title: &str, c1: Channel) -> ImageStack {
        let (width, height) = c1.dimensions();
        let c2 = Channel::from_pixel(width, height, Luma([5.0]));
        ImageStack::new(title, vec![c1, c2], Calibration::new(0.1, 0.1, "µm")).unwrap()
    }

    // Light smoothing keeps thresholded areas close to the drawn ones.
    fn sharp_params() -> NucleusParams {
        NucleusParams{sigma: 0.1, ..Default::default()}
    }

    #[test]
    fn test_single_nucleus() {
        let r = radius_for_area(30.0);
        let stack = nucleus_stack("one", disks_channel(90, 90, &[(45.0, 45.0, r)], 200.0));
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        let nuclei = run_nucleus_segmentation(&stack, &sharp_params(), &HistogramThresholder,
                                              &EdmWatershed, &mut table, &mut overlay).unwrap();
        assert_eq!(nuclei.len(), 1);
        assert_eq!(table.counter(), 1);
        assert_eq!(overlay.len(), 1);
        let area = table.get_number("Area (µm²)", 0).unwrap();
        assert_abs_diff_eq!(area, 30.0, epsilon = 1.5);
        let circularity = table.get_number("Circularity", 0).unwrap();
        assert!(circularity > 0.9 && circularity < 1.05, "circularity {}", circularity);
        assert_eq!(table.get_text("Image", 0), Some("one"));
        assert_eq!(table.get_number("Nucleus", 0), Some(0.0));
        assert_abs_diff_eq!(table.get_number("C1 Mean", 0).unwrap(), 200.0, epsilon = 1.0);
        assert!(table.get_number("C1 StdDev", 0).unwrap() < 5.0);
        assert_abs_diff_eq!(table.get_number("C2 Mean", 0).unwrap(), 5.0, epsilon = 1e-3);
    }

    #[test]
    fn test_single_nucleus_default_smoothing() {
        let r = radius_for_area(30.0);
        let stack = nucleus_stack("one", disks_channel(90, 90, &[(45.0, 45.0, r)], 200.0));
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        let nuclei = run_nucleus_segmentation(&stack, &NucleusParams::default(),
                                              &HistogramThresholder, &EdmWatershed,
                                              &mut table, &mut overlay).unwrap();
        assert_eq!(nuclei.len(), 1);
        // Smoothing widens the thresholded disk somewhat.
        let area = nuclei[0].physical_area(stack.calibration());
        assert!(area > 27.0 && area < 38.0, "area {}", area);
        assert!(nuclei[0].circularity() > 0.9);
    }

    #[test]
    fn test_debris_is_dropped() {
        let r = radius_for_area(10.0);
        let stack = nucleus_stack("small", disks_channel(60, 60, &[(30.0, 30.0, r)], 200.0));
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        let nuclei = run_nucleus_segmentation(&stack, &sharp_params(), &HistogramThresholder,
                                              &EdmWatershed, &mut table, &mut overlay).unwrap();
        assert!(nuclei.is_empty());
        assert_eq!(table.counter(), 0);
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_touching_nuclei_are_split() {
        let r = radius_for_area(40.0);
        let stack = nucleus_stack(
            "pair", disks_channel(158, 92, &[(46.0, 46.0, r), (112.0, 46.0, r)], 200.0));
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        let nuclei = run_nucleus_segmentation(&stack, &sharp_params(), &HistogramThresholder,
                                              &EdmWatershed, &mut table, &mut overlay).unwrap();
        assert_eq!(nuclei.len(), 2);
        for row in 0..2 {
            let area = table.get_number("Area (µm²)", row).unwrap();
            assert!(area > 35.0 && area < 42.0, "area {}", area);
        }
        assert!(nuclei[0].intersect(&nuclei[1]).is_empty());
    }

    #[test]
    fn test_hollow_nucleus_is_filled() {
        let r = radius_for_area(30.0);
        let ring = disks_channel(90, 90, &[(45.0, 45.0, r)], 200.0);
        let c1 = Channel::from_fn(90, 90, |x, y| {
            let (dx, dy) = (x as f64 + 0.5 - 45.0, y as f64 + 0.5 - 45.0);
            if dx * dx + dy * dy < 64.0 { Luma([10.0]) } else { *ring.get_pixel(x, y) }
        });
        let stack = nucleus_stack("ring", c1);
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        let nuclei = run_nucleus_segmentation(&stack, &sharp_params(), &HistogramThresholder,
                                              &EdmWatershed, &mut table, &mut overlay).unwrap();
        assert_eq!(nuclei.len(), 1);
        assert_abs_diff_eq!(nuclei[0].physical_area(stack.calibration()), 30.0, epsilon = 1.5);
    }

    #[test]
    fn test_nucleus_segmentation_needs_two_channels() {
        let c1 = disks_channel(20, 20, &[(10.0, 10.0, 5.0)], 200.0);
        let stack = ImageStack::new("mono", vec![c1], Calibration::default()).unwrap();
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        assert!(run_nucleus_segmentation(&stack, &NucleusParams::default(),
                                         &HistogramThresholder, &EdmWatershed,
                                         &mut table, &mut overlay).is_err());
        assert_eq!(table.counter(), 0);
    }

    // A cell whose DNA stain brightens toward the middle, with a patch of
    // heterochromatin marker off centre.
    fn cell_stack(title: &str) -> ImageStack {
        let dna = Channel::from_fn(100, 100, |x, y| {
            let r = ((x as f64 + 0.5 - 50.0).powi(2) + (y as f64 + 0.5 - 50.0).powi(2)).sqrt();
            Luma([if r < 15.0 {
                220.0
            } else if r < 25.0 {
                150.0
            } else if r < 35.0 {
                80.0
            } else {
                10.0
            }])
        });
        let marker = disks_channel(100, 100, &[(40.0, 50.0, 8.0)], 180.0);
        ImageStack::new(title, vec![dna, marker], Calibration::new(0.1, 0.1, "µm")).unwrap()
    }

    #[test]
    fn test_heterochromatin_row() {
        let stack = cell_stack("sample_24h_001");
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        run_heterochromatin_classification(&stack, &ClassifierParams::default(),
                                           &HistogramThresholder,
                                           &mut table, &mut overlay).unwrap();
        // Only density level 0 is reported.
        assert_eq!(table.counter(), 1);
        assert_eq!(overlay.len(), 2);
        assert_eq!(overlay.entries()[0].1, LEVEL_COLOR);
        assert_eq!(overlay.entries()[1].1, HETEROCHROMATIN_COLOR);
        assert_eq!(table.get_text("Image", 0), Some("sample_24h_001"));
        assert_eq!(table.get_text("Time (h)", 0), Some("24"));
        assert_eq!(table.get_number("Density Level", 0), Some(0.0));
        assert_eq!(table.columns().len(), 10);
        assert!(table.get_number("Cell Area (µm²)", 0).unwrap() > 0.0);
        let dna_area = table.get_number("DNA Area (µm²)", 0).unwrap();
        assert!(dna_area > 0.0);
        let hc_area = table.get_number("Heterochromatin Area (µm²)", 0).unwrap();
        assert!(hc_area > 0.0 && hc_area <= dna_area, "{} {}", hc_area, dna_area);
        let proportion = table.get_number("Heterochromatin Proportion", 0).unwrap();
        assert!(proportion > 0.0 && proportion <= 1.0, "proportion {}", proportion);
        assert!(table.get_number("DNA Density", 0).unwrap() > 0.0);
        assert!(table.get_number("DNA Density in Heterochromatin", 0).unwrap().is_finite());
    }

    #[test]
    fn test_heterochromatin_without_time() {
        let stack = cell_stack("sample_noTime");
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        run_heterochromatin_classification(&stack, &ClassifierParams::default(),
                                           &HistogramThresholder,
                                           &mut table, &mut overlay).unwrap();
        assert_eq!(table.get_text("Time (h)", 0), Some("?"));
        // A second image appends to the same table.
        run_heterochromatin_classification(&stack, &ClassifierParams::default(),
                                           &HistogramThresholder,
                                           &mut table, &mut overlay).unwrap();
        assert_eq!(table.counter(), 2);
        assert_eq!(overlay.len(), 4);
    }

    #[test]
    fn test_nested_levels_on_uniform_disk() {
        let stack = nucleus_stack("disk", disks_channel(80, 80, &[(40.0, 40.0, 25.0)], 200.0));
        let levels = density_levels(&stack, 1, None, 3, ThresholdMethod::Otsu, 0.25,
                                    &HistogramThresholder).unwrap();
        assert_eq!(levels.len(), 3);
        assert!(levels[0].area_px() > 0);
        for pair in levels.windows(2) {
            assert!(pair[1].area_px() <= pair[0].area_px());
            assert_eq!(pair[1].intersect(&pair[0]), pair[1]);
        }
    }

    #[test]
    fn test_flat_image_selects_whole_frame() {
        let flat = Channel::from_pixel(20, 20, Luma([0.0]));
        let stack = ImageStack::new("flat", vec![flat.clone(), flat],
                                    Calibration::default()).unwrap();
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        run_heterochromatin_classification(&stack, &ClassifierParams::default(),
                                           &HistogramThresholder,
                                           &mut table, &mut overlay).unwrap();
        // Every threshold collapses to the minimum, selecting the whole image.
        assert_eq!(table.get_number("Cell Area (pixel²)", 0), Some(400.0));
        assert_eq!(table.get_number("Proportion of Cell Area", 0), Some(1.0));
        assert_eq!(table.get_number("DNA Density", 0), Some(0.0));
        assert_eq!(table.get_number("Heterochromatin Proportion", 0), Some(1.0));
    }

    #[test]
    fn test_measurements_over_empty_regions_are_nan() {
        assert!(ratio(1.0, 0.0).is_nan());
        assert!(ratio(0.0, 0.0).is_nan());
        assert_eq!(ratio(1.0, 4.0), 0.25);
        let edges = Channel::from_pixel(4, 4, Luma([1.0]));
        assert!(density_metric_from_edges(&Region::empty(), &edges).is_nan());

        let mut table = ResultsTable::new();
        let row = table.add_row();
        table.set_value("Proportion of Cell Area", row, ratio(0.0, 0.0));
        assert!(table.get_number("Proportion of Cell Area", row).unwrap().is_nan());
        assert_eq!(format!("{}", table.get_value("Proportion of Cell Area", row).unwrap()),
                   "NaN");
    }

    // Selects the brightest intensity bin, whatever the histogram.
    struct TopBin;

    impl Thresholder for TopBin {
        fn threshold(&self, _histogram: &[u32], _method: ThresholdMethod) -> Option<usize> {
            Some(255)
        }
    }

    #[test]
    fn test_one_pixel_nucleus_at_coarse_calibration() {
        // At 5 µm per pixel a single pixel covers 25 µm², enough to be kept.
        let mut c1 = Channel::from_pixel(5, 5, Luma([10.0]));
        c1.put_pixel(2, 2, Luma([200.0]));
        let c2 = Channel::from_pixel(5, 5, Luma([5.0]));
        let stack = ImageStack::new("coarse", vec![c1, c2],
                                    Calibration::new(5.0, 5.0, "µm")).unwrap();
        let params = NucleusParams{sigma: 0.0, ..Default::default()};
        let mut table = ResultsTable::new();
        let mut overlay = Overlay::new();
        let nuclei = run_nucleus_segmentation(&stack, &params, &TopBin, &EdmWatershed,
                                              &mut table, &mut overlay).unwrap();
        assert_eq!(nuclei.len(), 1);
        assert_eq!(nuclei[0].area_px(), 1);
        assert_eq!(table.get_number("Area (µm²)", 0), Some(25.0));
        let circularity = table.get_number("Circularity", 0).unwrap();
        assert!(circularity.is_finite() && circularity > 0.0, "circularity {}", circularity);
        assert_eq!(table.get_number("C1 Mean", 0), Some(200.0));
    }
}  // mod tests.
