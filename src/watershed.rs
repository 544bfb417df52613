// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Splitting of touching objects by watershed segmentation of their
//! Euclidean distance map, and the recursive segmenter that applies it with
//! a decreasing tolerance until every piece is small enough.
//!
//! The distance map of a binary mask peaks near the centre of each roughly
//! convex blob. Two touching round nuclei give two peaks joined by a saddle
//! at the neck; if the peaks rise more than the tolerance above the saddle
//! they are treated as separate objects, and flooding outward from them
//! leaves a one pixel dividing line along the neck. Lowering the tolerance
//! splits more aggressively, so the segmenter starts high and only descends
//! into pieces that are still larger than the target nucleus size.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::distance_transform::euclidean_squared_distance_transform;
use log::{debug, warn};

use crate::calibration::Calibration;
use crate::region::{regions_from_mask_at, Region, FOREGROUND};

/// Splits a binary mask into basins.
pub trait Watersheder {
    /// Returns a mask of the same size as `mask` in which separate objects
    /// are divided by background lines, or None if no segmentation was
    /// possible. `tolerance` is the minimum prominence of a distance-map
    /// maximum, in pixels.
    fn segment(&self, mask: &GrayImage, tolerance: f64) -> Option<GrayImage>;
}

/// The standard [Watersheder]: flooding of the Euclidean distance map from
/// its prominent maxima.
#[derive(Copy, Clone, Debug, Default)]
pub struct EdmWatershed;

impl Watersheder for EdmWatershed {
    fn segment(&self, mask: &GrayImage, tolerance: f64) -> Option<GrayImage> {
        let edm = distance_map(mask);
        let seeds = find_maxima(&edm, mask, tolerance);
        debug!("{} maxima at tolerance {}", seeds.len(), tolerance);
        match seeds.len() {
            0 => None,
            1 => Some(mask.clone()),
            _ => Some(flood(&edm, mask, &seeds)),
        }
    }
}

/// Recursion bounds for [segment()]. Areas are in calibrated units.
#[derive(Copy, Clone, Debug)]
pub struct SegmentParams {
    /// Watershed tolerance of the first split.
    pub start_tolerance: i32,

    /// Pieces are split further only while the tolerance is at least this.
    pub min_tolerance: i32,

    /// Pieces smaller than this are discarded.
    pub min_area: f64,

    /// Pieces larger than this are split further.
    pub segment_area: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        SegmentParams{start_tolerance: 12, min_tolerance: 4,
                      min_area: 15.0, segment_area: 50.0}
    }
}

/// Splits `region` with `watersheder` at `tolerance`, returning the resulting
/// 8-connected parts in image coordinates. If the watersheder cannot segment
/// the mask it is left whole (but still separated into its connected
/// parts).
pub fn watershed_region(region: &Region, tolerance: f64,
                        watersheder: &dyn Watersheder) -> Vec<Region> {
    if region.is_empty() {
        return Vec::new();
    }
    let mask = region.mask();
    let split = match watersheder.segment(mask, tolerance) {
        Some(split) if split.dimensions() == mask.dimensions() => split,
        Some(split) => {
            warn!("Watershed returned {:?} mask for {:?} input; ignoring",
                  split.dimensions(), mask.dimensions());
            mask.clone()
        },
        None => mask.clone(),
    };
    let (width, height) = mask.dimensions();
    let combined = GrayImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y).0[0] != 0 && split.get_pixel(x, y).0[0] != 0 {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    });
    regions_from_mask_at(&combined, region.left(), region.top())
}

/// Recursively splits `region` into pieces between `params.min_area` and
/// `params.segment_area`, starting at watershed tolerance `tolerance`.
///
/// A region smaller than `min_area` yields nothing, and one smaller than
/// `segment_area` is returned as is. Otherwise it is split; pieces still
/// larger than `segment_area` are split again at `tolerance - 1` as long as
/// the tolerance has not dropped below `min_tolerance`, and other pieces are
/// kept if at least `min_area`. Pieces that can no longer be split are kept
/// regardless of how large they are.
pub fn segment(region: &Region,
               tolerance: i32,
               params: &SegmentParams,
               calibration: &Calibration,
               watersheder: &dyn Watersheder) -> Vec<Region> {
    let start = Instant::now();
    let (pieces, depth) =
        segment_with_depth(region, tolerance, params, calibration, watersheder);
    debug!("Segmented region of {} pixels into {} pieces, depth {}, in {:?}",
           region.area_px(), pieces.len(), depth, start.elapsed());
    pieces
}

/// As [segment()], also returning the deepest recursion reached (0 if the
/// region was not split further after the first watershed).
pub fn segment_with_depth(region: &Region,
                          tolerance: i32,
                          params: &SegmentParams,
                          calibration: &Calibration,
                          watersheder: &dyn Watersheder) -> (Vec<Region>, usize) {
    let area = region.physical_area(calibration);
    if area < params.min_area {
        return (Vec::new(), 0);
    }
    if area < params.segment_area {
        return (vec![region.clone()], 0);
    }
    let mut pieces = Vec::<Region>::new();
    let mut depth = 0;
    for part in watershed_region(region, tolerance as f64, watersheder) {
        let part_area = part.physical_area(calibration);
        if tolerance >= params.min_tolerance && part_area > params.segment_area {
            let (sub_pieces, sub_depth) =
                segment_with_depth(&part, tolerance - 1, params, calibration, watersheder);
            pieces.extend(sub_pieces);
            depth = depth.max(sub_depth + 1);
        } else if part_area >= params.min_area {
            pieces.push(part);
        }
    }
    (pieces, depth)
}

// Distance from each mask pixel to the nearest background pixel, treating
// everything outside the mask's bounds as background. Zero on background.
fn distance_map(mask: &GrayImage) -> Image<Luma<f64>> {
    let (width, height) = mask.dimensions();
    // Background (including a one pixel frame) becomes the "foreground" that
    // distances are measured to.
    let padded = GrayImage::from_fn(width + 2, height + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && x <= width && y <= height &&
            mask.get_pixel(x - 1, y - 1).0[0] != 0;
        Luma([if inside { 0 } else { 255 }])
    });
    let squared = euclidean_squared_distance_transform(&padded);
    Image::<Luma<f64>>::from_fn(width, height, |x, y| {
        Luma([squared.get_pixel(x + 1, y + 1).0[0].sqrt()])
    })
}

const NEIGHBORS_8: [(i32, i32); 8] =
    [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)];
const NEIGHBORS_4: [(i32, i32); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

fn neighbors<'a>(x: u32, y: u32, width: u32, height: u32, offsets: &'a [(i32, i32)])
                 -> impl Iterator<Item = (u32, u32)> + 'a {
    offsets.iter().filter_map(move |&(dx, dy)| {
        let (nx, ny) = (x as i32 + dx, y as i32 + dy);
        if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
            None
        } else {
            Some((nx as u32, ny as u32))
        }
    })
}

// Finds the maxima of `edm` within `mask` that stand more than `tolerance`
// above every path to a higher point. Each maximum is returned as its
// plateau of equal-valued pixels, highest maxima first.
fn find_maxima(edm: &Image<Luma<f64>>, mask: &GrayImage, tolerance: f64)
               -> Vec<Vec<(u32, u32)>> {
    let (width, height) = mask.dimensions();
    let index = |x: u32, y: u32| (y * width + x) as usize;
    let value = |x: u32, y: u32| edm.get_pixel(x, y).0[0];

    let mut candidates = Vec::<(u32, u32)>::new();
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        let v = value(x, y);
        if neighbors(x, y, width, height, &NEIGHBORS_8).all(|(nx, ny)| value(nx, ny) <= v) {
            candidates.push((x, y));
        }
    }
    // Highest first; raster order among equals.
    candidates.sort_by(|a, b| value(b.0, b.1).total_cmp(&value(a.0, a.1)));

    // Pixels already reached from a higher (or earlier equal) candidate.
    let mut claimed = vec![false; (width * height) as usize];
    let mut maxima = Vec::<Vec<(u32, u32)>>::new();
    for &(cx, cy) in &candidates {
        if claimed[index(cx, cy)] {
            continue;
        }
        let peak = value(cx, cy);
        let mut visited = vec![(cx, cy)];
        let mut seen = vec![false; (width * height) as usize];
        seen[index(cx, cy)] = true;
        let mut queue = VecDeque::<(u32, u32)>::from([(cx, cy)]);
        let mut prominent = true;
        while let Some((x, y)) = queue.pop_front() {
            for (nx, ny) in neighbors(x, y, width, height, &NEIGHBORS_8) {
                let i = index(nx, ny);
                if seen[i] || mask.get_pixel(nx, ny).0[0] == 0 {
                    continue;
                }
                let v = value(nx, ny);
                if v <= peak - tolerance {
                    continue;
                }
                if v > peak || claimed[i] {
                    prominent = false;
                }
                seen[i] = true;
                visited.push((nx, ny));
                queue.push_back((nx, ny));
            }
        }
        for &(x, y) in &visited {
            claimed[index(x, y)] = true;
        }
        if prominent {
            maxima.push(plateau(edm, mask, cx, cy));
        }
    }
    maxima
}

// The 8-connected pixels of `mask` equal in value to (x, y).
fn plateau(edm: &Image<Luma<f64>>, mask: &GrayImage, x: u32, y: u32) -> Vec<(u32, u32)> {
    let (width, height) = mask.dimensions();
    let level = edm.get_pixel(x, y).0[0];
    let mut seen = vec![false; (width * height) as usize];
    seen[(y * width + x) as usize] = true;
    let mut pixels = vec![(x, y)];
    let mut queue = VecDeque::<(u32, u32)>::from([(x, y)]);
    while let Some((px, py)) = queue.pop_front() {
        for (nx, ny) in neighbors(px, py, width, height, &NEIGHBORS_8) {
            let i = (ny * width + nx) as usize;
            if !seen[i] && mask.get_pixel(nx, ny).0[0] != 0 &&
                edm.get_pixel(nx, ny).0[0] == level
            {
                seen[i] = true;
                pixels.push((nx, ny));
                queue.push_back((nx, ny));
            }
        }
    }
    pixels
}

// Flood queue entry: highest distance first, then first come first served.
struct FloodEntry {
    level: f64,
    order: u64,
    x: u32,
    y: u32,
}

impl Ord for FloodEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level.total_cmp(&other.level)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for FloodEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FloodEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodEntry {}

const UNLABELED: u32 = 0;
const LINE: u32 = u32::MAX;

// Grows a basin from each seed, descending the distance map. A pixel that
// would touch two basins (8-connected) becomes part of a dividing line.
fn flood(edm: &Image<Luma<f64>>, mask: &GrayImage, seeds: &[Vec<(u32, u32)>])
         -> GrayImage {
    let (width, height) = mask.dimensions();
    let index = |x: u32, y: u32| (y * width + x) as usize;
    let mut labels = vec![UNLABELED; (width * height) as usize];
    let mut heap = BinaryHeap::<FloodEntry>::new();
    let mut order = 0_u64;
    let mut enqueued = vec![false; (width * height) as usize];

    for (n, seed) in seeds.iter().enumerate() {
        for &(x, y) in seed {
            labels[index(x, y)] = n as u32 + 1;
            enqueued[index(x, y)] = true;
        }
    }
    let mut push_neighbors = |x: u32, y: u32, labels: &[u32],
                              heap: &mut BinaryHeap<FloodEntry>| {
        for (nx, ny) in neighbors(x, y, width, height, &NEIGHBORS_4) {
            let i = index(nx, ny);
            if !enqueued[i] && labels[i] == UNLABELED && mask.get_pixel(nx, ny).0[0] != 0 {
                enqueued[i] = true;
                heap.push(FloodEntry{level: edm.get_pixel(nx, ny).0[0], order, x: nx, y: ny});
                order += 1;
            }
        }
    };
    for seed in seeds {
        for &(x, y) in seed {
            push_neighbors(x, y, &labels, &mut heap);
        }
    }

    while let Some(FloodEntry{x, y, ..}) = heap.pop() {
        let mut label = UNLABELED;
        for (nx, ny) in neighbors(x, y, width, height, &NEIGHBORS_8) {
            let neighbor = labels[index(nx, ny)];
            if neighbor == UNLABELED || neighbor == LINE {
                continue;
            }
            if label == UNLABELED {
                label = neighbor;
            } else if label != neighbor {
                label = LINE;
                break;
            }
        }
        labels[index(x, y)] = if label == UNLABELED { LINE } else { label };
        if label != UNLABELED && label != LINE {
            push_neighbors(x, y, &labels, &mut heap);
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let label = labels[index(x, y)];
        if mask.get_pixel(x, y).0[0] != 0 && label != LINE {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

// mod tests.
