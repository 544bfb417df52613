// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use image::{Rgb, RgbImage};
use imageproc::drawing;
use log::info;
use regex::Regex;

use crate::error::AnalysisResult;
use crate::image_funcs::Channel;
use crate::region::Region;

/// Outline color of density level 0 (light blue).
pub const LEVEL_COLOR: Rgb<u8> = Rgb([128, 128, 255]);
/// Outline color of heterochromatin.
pub const HETEROCHROMATIN_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
/// Outline color of segmented nuclei.
pub const NUCLEUS_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// A measurement.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Text(text) => write!(f, "{}", text),
            Value::Number(n) if n.is_nan() => write!(f, "NaN"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            },
            Value::Number(n) => write!(f, "{:.3}", n),
        }
    }
}

/// Rows of named measurements. Columns appear in the order they are first
/// set; a row that never sets a column leaves it blank.
#[derive(Clone, Debug, Default)]
pub struct ResultsTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl ResultsTable {
    pub fn new() -> Self {
        ResultsTable::default()
    }

    /// Appends an empty row and returns its index.
    pub fn add_row(&mut self) -> usize {
        self.rows.push(vec![None; self.columns.len()]);
        self.rows.len() - 1
    }

    /// Number of rows.
    pub fn counter(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Sets `column` of `row`, adding the column if new. Panics if `row` is
    /// not a row index.
    pub fn set_value(&mut self, column: &str, row: usize, value: impl Into<Value>) {
        let col = match self.column_index(column) {
            Some(col) => col,
            None => {
                self.columns.push(column.to_string());
                for r in &mut self.rows {
                    r.push(None);
                }
                self.columns.len() - 1
            },
        };
        self.rows[row][col] = Some(value.into());
    }

    pub fn get_value(&self, column: &str, row: usize) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)?.as_ref()
    }

    pub fn get_number(&self, column: &str, row: usize) -> Option<f64> {
        match self.get_value(column, row)? {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn get_text(&self, column: &str, row: usize) -> Option<&str> {
        match self.get_value(column, row)? {
            Value::Text(text) => Some(text.as_str()),
            Value::Number(_) => None,
        }
    }

    /// Appends the rows of `other`, merging columns by name.
    pub fn append(&mut self, other: &ResultsTable) {
        for row in 0..other.counter() {
            let new_row = self.add_row();
            for (col, name) in other.columns.iter().enumerate() {
                if let Some(value) = &other.rows[row][col] {
                    self.set_value(name, new_row, value.clone());
                }
            }
        }
    }

    /// Writes the table as tab separated text.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AnalysisResult<()> {
        fs::write(path.as_ref(), self.to_string())?;
        info!("Wrote {} rows to {:?}", self.counter(), path.as_ref());
        Ok(())
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|cell| match cell {
                Some(value) => value.to_string(),
                None => String::new(),
            }).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// Regions to outline over an image, each with its color.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    entries: Vec<(Region, Rgb<u8>)>,
}

impl Overlay {
    pub fn new() -> Self {
        Overlay::default()
    }

    pub fn add(&mut self, region: Region, color: Rgb<u8>) {
        self.entries.push((region, color));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Region, Rgb<u8>)] {
        &self.entries
    }
}

/// Draws the outlines of `overlay` over a grayscale rendering of `channel`,
/// stretched so its minimum is black and maximum white.
pub fn render_overlay(channel: &Channel, overlay: &Overlay) -> RgbImage {
    let (width, height) = channel.dimensions();
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for pixel in channel.pixels() {
        min = min.min(pixel.0[0]);
        max = max.max(pixel.0[0]);
    }
    let scale = if max > min { 255.0 / (max - min) } else { 0.0 };
    let mut image = RgbImage::from_fn(width, height, |x, y| {
        let v = ((channel.get_pixel(x, y).0[0] - min) * scale).clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    });
    for (region, color) in &overlay.entries {
        for outline in region.outlines() {
            for (i, &(x0, y0)) in outline.iter().enumerate() {
                let (x1, y1) = outline[(i + 1) % outline.len()];
                drawing::draw_line_segment_mut(
                    &mut image,
                    (x0 as f32, y0 as f32),
                    (x1 as f32, y1 as f32),
                    *color);
            }
        }
    }
    image
}

/// Extracts the time point from an image title: the digits of the first
/// "<digits>h_" in `title`, or "?" if there is none.
pub fn time_label(title: &str) -> String {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIME_RE.get_or_init(|| Regex::new(r"([0-9]+)h_").unwrap());
    match re.captures(title) {
        Some(captures) => captures[1].to_string(),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};
    use super::*;

    #[test]
    fn test_time_label() {
        assert_eq!(time_label("sample_24h_001"), "24");
        assert_eq!(time_label("sample_noTime"), "?");
        assert_eq!(time_label("run3_48h_6h_x"), "48");
        assert_eq!(time_label("24h"), "?");
        assert_eq!(time_label(""), "?");
    }

    #[test]
    fn test_table_columns_and_values() {
        let mut table = ResultsTable::new();
        let row = table.add_row();
        table.set_value("Image", row, "a");
        table.set_value("Area", row, 2.5);
        let row = table.add_row();
        table.set_value("Area", row, 3.0);
        table.set_value("Count", row, 7_usize);
        assert_eq!(table.counter(), 2);
        assert_eq!(table.columns(), &["Image", "Area", "Count"]);
        assert_eq!(table.get_text("Image", 0), Some("a"));
        assert_eq!(table.get_text("Image", 1), None);
        assert_eq!(table.get_number("Area", 1), Some(3.0));
        assert_eq!(table.get_number("Count", 0), None);
        assert_eq!(table.get_number("Missing", 0), None);
        assert_eq!(table.to_string(),
                   "Image\tArea\tCount\na\t2.500\t\n\t3\t7\n");
    }

    #[test]
    fn test_nan_formatting() {
        assert_eq!(Value::from(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::from(0.12345).to_string(), "0.123");
        assert_eq!(Value::from(-4.0).to_string(), "-4");
    }

    #[test]
    fn test_append() {
        let mut first = ResultsTable::new();
        let row = first.add_row();
        first.set_value("A", row, 1.0);
        let mut second = ResultsTable::new();
        let row = second.add_row();
        second.set_value("B", row, "x");
        second.set_value("A", row, 2.0);
        first.append(&second);
        assert_eq!(first.counter(), 2);
        assert_eq!(first.columns(), &["A", "B"]);
        assert_eq!(first.get_number("A", 1), Some(2.0));
        assert_eq!(first.get_text("B", 1), Some("x"));
    }

    #[test]
    fn test_render_overlay() {
        let channel = Channel::from_fn(10, 10, |x, _y| Luma([x as f32]));
        let mut mask = GrayImage::new(10, 10);
        for y in 3..7 {
            for x in 3..7 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let mut overlay = Overlay::new();
        overlay.add(Region::from_mask(&mask), NUCLEUS_COLOR);
        assert_eq!(overlay.len(), 1);
        let image = render_overlay(&channel, &overlay);
        assert_eq!(image.dimensions(), (10, 10));
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(9, 9), Rgb([255, 255, 255]));
        // Outline corner.
        assert_eq!(*image.get_pixel(3, 3), NUCLEUS_COLOR);
        assert_eq!(*image.get_pixel(5, 5), Rgb([141, 141, 141]));
    }

    #[test]
    fn test_render_overlay_single_pixel_region() {
        let channel = Channel::from_pixel(8, 8, Luma([3.0]));
        let mut mask = GrayImage::new(8, 8);
        mask.put_pixel(4, 4, Luma([255]));
        let mut overlay = Overlay::new();
        overlay.add(Region::from_mask(&mask), LEVEL_COLOR);
        let image = render_overlay(&channel, &overlay);
        assert_eq!(*image.get_pixel(4, 4), LEVEL_COLOR);
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(7, 1), Rgb([0, 0, 0]));
    }
}  // mod tests.
