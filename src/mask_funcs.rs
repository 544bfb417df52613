// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::VecDeque;

use image::{GrayImage, Luma};

use crate::region::FOREGROUND;

// Temporary marker for background reachable from the border.
const OUTSIDE: u8 = 127;

/// Sets the 4-connected run of pixels sharing the value at (x, y) to `value`.
/// Returns the number of pixels changed.
pub fn flood_fill(mask: &mut GrayImage, x: u32, y: u32, value: u8) -> u32 {
    let (width, height) = mask.dimensions();
    if x >= width || y >= height {
        return 0;
    }
    let target = mask.get_pixel(x, y).0[0];
    if target == value {
        return 0;
    }
    let mut filled = 0;
    let mut queue = VecDeque::<(u32, u32)>::new();
    mask.put_pixel(x, y, Luma([value]));
    queue.push_back((x, y));
    while let Some((cx, cy)) = queue.pop_front() {
        filled += 1;
        let neighbors = [(cx > 0, cx.wrapping_sub(1), cy),
                         (cx + 1 < width, cx + 1, cy),
                         (cy > 0, cx, cy.wrapping_sub(1)),
                         (cy + 1 < height, cx, cy + 1)];
        for (in_bounds, nx, ny) in neighbors {
            if in_bounds && mask.get_pixel(nx, ny).0[0] == target {
                mask.put_pixel(nx, ny, Luma([value]));
                queue.push_back((nx, ny));
            }
        }
    }
    filled
}

/// Fills interior holes of a binary mask: background pixels that cannot be
/// reached from the image border through 4-connected background become
/// foreground. On return every pixel is 0 or 255.
pub fn fill_holes(mask: &mut GrayImage) {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    for x in 0..width {
        for y in [0, height - 1] {
            if mask.get_pixel(x, y).0[0] == 0 {
                flood_fill(mask, x, y, OUTSIDE);
            }
        }
    }
    for y in 0..height {
        for x in [0, width - 1] {
            if mask.get_pixel(x, y).0[0] == 0 {
                flood_fill(mask, x, y, OUTSIDE);
            }
        }
    }
    for pixel in mask.pixels_mut() {
        pixel.0[0] = if pixel.0[0] == OUTSIDE { 0 } else { FOREGROUND };
    }
}

#[cfg(test)]
mod tests {
    use imageproc::gray_image;
    use super::*;

    #[test]
    fn test_flood_fill() {
        let mut mask = gray_image!(
            0, 0, 255, 0;
            0, 0, 255, 0;
            255, 255, 255, 0);
        assert_eq!(flood_fill(&mut mask, 0, 0, 7), 4);
        assert_eq!(mask, gray_image!(
            7, 7, 255, 0;
            7, 7, 255, 0;
            255, 255, 255, 0));
        // Same value: nothing to do.
        assert_eq!(flood_fill(&mut mask, 0, 0, 7), 0);
        // Out of bounds.
        assert_eq!(flood_fill(&mut mask, 9, 0, 1), 0);
    }

    #[test]
    fn test_fill_holes_ring() {
        let mut mask = gray_image!(
            0,   0,   0,   0,   0;
            0, 255, 255, 255,   0;
            0, 255,   0, 255,   0;
            0, 255, 255, 255,   0;
            0,   0,   0,   0,   0);
        fill_holes(&mut mask);
        assert_eq!(mask, gray_image!(
            0,   0,   0,   0,   0;
            0, 255, 255, 255,   0;
            0, 255, 255, 255,   0;
            0, 255, 255, 255,   0;
            0,   0,   0,   0,   0));
        let once = mask.clone();
        fill_holes(&mut mask);
        assert_eq!(mask, once);
    }

    #[test]
    fn test_fill_holes_open_cup_unchanged() {
        // The notch opens onto the border, so it is not a hole.
        let original = gray_image!(
            255,   0, 255;
            255,   0, 255;
            255, 255, 255);
        let mut mask = original.clone();
        fill_holes(&mut mask);
        assert_eq!(mask, original);
    }

    #[test]
    fn test_fill_holes_diagonal_gap_is_closed() {
        // Background connects to the hole only diagonally.
        let mut mask = gray_image!(
            255, 255, 255, 0;
            255,   0, 255, 255;
            255, 255,   0, 255;
            255, 255, 255, 255);
        fill_holes(&mut mask);
        assert_eq!(mask.pixels().filter(|p| p.0[0] == 0).count(), 1);
        assert_eq!(mask.get_pixel(3, 0).0[0], 0);
    }

    #[test]
    fn test_fill_holes_degenerate() {
        let mut empty = GrayImage::new(0, 0);
        fill_holes(&mut empty);
        assert_eq!(empty.dimensions(), (0, 0));

        let mut blank = GrayImage::new(3, 3);
        fill_holes(&mut blank);
        assert!(blank.pixels().all(|p| p.0[0] == 0));

        let mut full = GrayImage::from_pixel(3, 3, Luma([255]));
        fill_holes(&mut full);
        assert!(full.pixels().all(|p| p.0[0] == 255));
    }
}  // mod tests.
