// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Regions of interest and the geometry measured on them.
//!
//! A [Region] is a set of image pixels, stored as a tight bounding box plus a
//! 0/255 mask of that box. Regions are produced by thresholding or by
//! watershed splitting, and are never mutated afterwards: they are only
//! intersected or measured. Because every constructor crops to the tight
//! bounding box, two regions covering the same pixels compare equal.

use std::collections::VecDeque;
use std::f64::consts::PI;

use image::{GrayImage, Luma};
use imageproc::rect::Rect;

use crate::calibration::Calibration;

/// Mask value of pixels inside a region.
pub const FOREGROUND: u8 = 255;

#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    // Image coordinates of the mask's upper left pixel.
    left: i32,
    top: i32,

    // Zero sized when the region is empty.
    mask: GrayImage,
}

impl Region {
    pub fn empty() -> Region {
        Region{left: 0, top: 0, mask: GrayImage::new(0, 0)}
    }

    /// Builds the single region covering every non-zero pixel of `mask`,
    /// which is in image coordinates.
    pub fn from_mask(mask: &GrayImage) -> Region {
        Region::from_mask_at(mask, 0, 0)
    }

    /// As [Region::from_mask()], with `mask` pixel (0, 0) located at image
    /// coordinates (`left`, `top`).
    pub fn from_mask_at(mask: &GrayImage, left: i32, top: i32) -> Region {
        let (width, height) = mask.dimensions();
        let mut x_min = u32::MAX;
        let mut x_max = 0_u32;
        let mut y_min = u32::MAX;
        let mut y_max = 0_u32;
        for (x, y, pixel) in mask.enumerate_pixels() {
            if pixel.0[0] != 0 {
                x_min = x_min.min(x);
                x_max = x_max.max(x);
                y_min = y_min.min(y);
                y_max = y_max.max(y);
            }
        }
        if x_min > x_max || width == 0 || height == 0 {
            return Region::empty();
        }
        let cropped = GrayImage::from_fn(x_max - x_min + 1, y_max - y_min + 1, |x, y| {
            if mask.get_pixel(x + x_min, y + y_min).0[0] != 0 {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });
        Region{left: left + x_min as i32, top: top + y_min as i32, mask: cropped}
    }

    pub fn is_empty(&self) -> bool {
        self.mask.width() == 0
    }

    /// Bounding box in image coordinates; None for an empty region.
    pub fn bounds(&self) -> Option<Rect> {
        if self.is_empty() {
            return None;
        }
        Some(Rect::at(self.left, self.top).of_size(self.mask.width(), self.mask.height()))
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    /// The 0/255 mask of the bounding box.
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Whether image pixel (x, y) belongs to the region.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (mx, my) = (x - self.left, y - self.top);
        mx >= 0 && my >= 0 &&
            (mx as u32) < self.mask.width() && (my as u32) < self.mask.height() &&
            self.mask.get_pixel(mx as u32, my as u32).0[0] != 0
    }

    /// Image coordinates of the region's pixels, in raster order. Pixels at
    /// negative coordinates are skipped.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (left, top) = (self.left, self.top);
        self.mask.enumerate_pixels()
            .filter(|(_x, _y, pixel)| pixel.0[0] != 0)
            .map(move |(x, y, _pixel)| (x as i32 + left, y as i32 + top))
            .filter(|&(x, y)| x >= 0 && y >= 0)
            .map(|(x, y)| (x as u32, y as u32))
    }

    /// Renders the region into a `width` x `height` 0/255 mask in image
    /// coordinates, clipping whatever falls outside.
    pub fn to_image_mask(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for (x, y) in self.pixels() {
            if x < width && y < height {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        mask
    }

    /// Returns the region shifted by (dx, dy).
    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        if self.is_empty() {
            return Region::empty();
        }
        Region{left: self.left + dx, top: self.top + dy, mask: self.mask.clone()}
    }

    /// Pixels common to both regions. May be empty.
    pub fn intersect(&self, other: &Region) -> Region {
        let (Some(a), Some(b)) = (self.bounds(), other.bounds()) else {
            return Region::empty();
        };
        let Some(overlap) = a.intersect(b) else {
            return Region::empty();
        };
        let mask = GrayImage::from_fn(overlap.width(), overlap.height(), |x, y| {
            let ix = overlap.left() + x as i32;
            let iy = overlap.top() + y as i32;
            if self.contains(ix, iy) && other.contains(ix, iy) {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });
        Region::from_mask_at(&mask, overlap.left(), overlap.top())
    }

    /// Pixel count.
    pub fn area_px(&self) -> usize {
        self.mask.pixels().filter(|p| p.0[0] != 0).count()
    }

    pub fn physical_area(&self, calibration: &Calibration) -> f64 {
        calibration.to_physical_area(self.area_px() as f64)
    }

    /// Outer outline of each 8-connected part, as polygons whose vertices lie
    /// on pixel corners (image coordinates), traced clockwise. Holes are not
    /// traced.
    pub fn outlines(&self) -> Vec<Vec<(i32, i32)>> {
        connected_parts(&self.mask).iter().map(|part| {
            // Parts start with their first pixel in raster order.
            let (x, y) = part[0];
            trace_outline(&self.mask, x, y).into_iter()
                .map(|(vx, vy)| (vx + self.left, vy + self.top))
                .collect()
        }).collect()
    }

    /// Outline length in pixels, summed over the outer outlines of the
    /// region's parts. Straight runs count 1 per pixel edge and staircase
    /// corners are cut diagonally, so a digitized circle measures close to
    /// its true circumference.
    pub fn perimeter(&self) -> f64 {
        self.outlines().iter().map(|outline| traced_perimeter(outline)).sum()
    }

    /// 4π·area / perimeter², in pixel units. 1.0 for a perfect circle; 0 for
    /// an empty region. Only approximate when pixels are not square.
    pub fn circularity(&self) -> f64 {
        let perimeter = self.perimeter();
        if perimeter <= 0.0 {
            return 0.0;
        }
        4.0 * PI * self.area_px() as f64 / (perimeter * perimeter)
    }
}

/// Splits `mask` into one region per 8-connected foreground component. The
/// mask is in image coordinates. Components are returned in raster order of
/// their first pixel.
pub fn regions_from_mask(mask: &GrayImage) -> Vec<Region> {
    regions_from_mask_at(mask, 0, 0)
}

/// As [regions_from_mask()], with `mask` pixel (0, 0) located at image
/// coordinates (`left`, `top`).
pub fn regions_from_mask_at(mask: &GrayImage, left: i32, top: i32) -> Vec<Region> {
    connected_parts(mask).into_iter().map(|part| {
        let mut x_min = u32::MAX;
        let mut y_min = u32::MAX;
        let mut x_max = 0;
        let mut y_max = 0;
        for &(x, y) in &part {
            x_min = x_min.min(x);
            y_min = y_min.min(y);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }
        let mut cropped = GrayImage::new(x_max - x_min + 1, y_max - y_min + 1);
        for (x, y) in part {
            cropped.put_pixel(x - x_min, y - y_min, Luma([FOREGROUND]));
        }
        Region{left: left + x_min as i32, top: top + y_min as i32, mask: cropped}
    }).collect()
}

// Pixels of each 8-connected foreground part of `mask`. Parts are ordered by
// their first pixel in raster order, and each part's list starts with that
// pixel.
fn connected_parts(mask: &GrayImage) -> Vec<Vec<(u32, u32)>> {
    let (width, height) = mask.dimensions();
    let index = |x: u32, y: u32| y as usize * width as usize + x as usize;
    let mut visited = vec![false; width as usize * height as usize];
    let mut parts = Vec::<Vec<(u32, u32)>>::new();
    let mut queue = VecDeque::<(u32, u32)>::new();
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] == 0 || visited[index(x, y)] {
            continue;
        }
        let mut part = Vec::<(u32, u32)>::new();
        visited[index(x, y)] = true;
        queue.push_back((x, y));
        while let Some((cx, cy)) = queue.pop_front() {
            part.push((cx, cy));
            let x_range = cx.saturating_sub(1)..=(cx + 1).min(width - 1);
            for ny in cy.saturating_sub(1)..=(cy + 1).min(height - 1) {
                for nx in x_range.clone() {
                    if !visited[index(nx, ny)] && mask.get_pixel(nx, ny).0[0] != 0 {
                        visited[index(nx, ny)] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }
        }
        parts.push(part);
    }
    parts
}

// Steps along pixel edges, clockwise in image coordinates (y down): east,
// south, west, north.
const STEPS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

// Follows the pixel-edge boundary of the 8-connected part containing
// (start_x, start_y), which must be the part's first pixel in raster order.
// The part is kept on the right hand side. Returns the corner points where
// the outline changes direction, in mask coordinates.
fn trace_outline(mask: &GrayImage, start_x: u32, start_y: u32) -> Vec<(i32, i32)> {
    let (width, height) = (mask.width() as i32, mask.height() as i32);
    let inside = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < width && y < height &&
            mask.get_pixel(x as u32, y as u32).0[0] != 0
    };
    let (sx, sy) = (start_x as i32, start_y as i32);
    let mut points = vec![(sx, sy)];
    let (mut vx, mut vy) = (sx, sy);
    let mut dir = 0;  // East along the top edge of the start pixel.
    loop {
        vx += STEPS[dir].0;
        vy += STEPS[dir].1;
        // The two pixels ahead of vertex (vx, vy), left and right of the
        // current heading.
        let (ahead_left, ahead_right) = match dir {
            0 => ((vx, vy - 1), (vx, vy)),
            1 => ((vx, vy), (vx - 1, vy)),
            2 => ((vx - 1, vy), (vx - 1, vy - 1)),
            _ => ((vx - 1, vy - 1), (vx, vy - 1)),
        };
        let next = if inside(ahead_left.0, ahead_left.1) {
            (dir + 3) % 4  // Turn left; also joins diagonal neighbors.
        } else if inside(ahead_right.0, ahead_right.1) {
            dir
        } else {
            (dir + 1) % 4  // Turn right.
        };
        if vx == sx && vy == sy && next == 0 {
            break;
        }
        if next != dir {
            points.push((vx, vy));
        }
        dir = next;
    }
    points
}

// Length of a traced outline. Each corner not directly following another
// corner across a unit step has 2 - √2 subtracted, replacing pairs of unit
// edges by a diagonal.
fn traced_perimeter(points: &[(i32, i32)]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    let mut edge_sum = 0_i64;
    let mut num_corners = 0;
    let mut corner = false;
    let mut side1 = {
        let (dx, dy) = (points[0].0 - points[n - 1].0, points[0].1 - points[n - 1].1);
        (dx.abs() + dy.abs()) as i64
    };
    for i in 0..n {
        let next = (i + 1) % n;
        edge_sum += side1;
        let side2 = ((points[next].0 - points[i].0).abs() +
                     (points[next].1 - points[i].1).abs()) as i64;
        if side1 > 1 || !corner {
            corner = true;
            num_corners += 1;
        } else {
            corner = false;
        }
        side1 = side2;
    }
    edge_sum as f64 - num_corners as f64 * (2.0 - 2.0_f64.sqrt())
}

// mod tests.
