// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::Path;

use image::{DynamicImage, ImageBuffer, Luma, Primitive, Rgb};
use imageproc::definitions::Image;
use imageproc::filter::{filter3x3, gaussian_blur_f32};
use imageproc::gradients::{HORIZONTAL_SOBEL, VERTICAL_SOBEL};
use log::debug;

use crate::calibration::Calibration;
use crate::error::{AnalysisError, AnalysisResult};
use crate::histogram_funcs::{histogram_for_values, NUM_BINS};
use crate::region::Region;

/// One intensity plane of a multi-channel image. Integer inputs are carried
/// over unscaled, so an 8-bit pixel of 200 has value 200.0.
pub type Channel = Image<Luma<f32>>;

/// A titled, calibrated stack of equally sized channels. Channels are
/// numbered from 1.
#[derive(Clone, Debug)]
pub struct ImageStack {
    title: String,
    channels: Vec<Channel>,
    calibration: Calibration,
}

impl ImageStack {
    pub fn new(title: &str, channels: Vec<Channel>, calibration: Calibration)
               -> AnalysisResult<ImageStack> {
        calibration.validate()?;
        let first = channels.first().ok_or(AnalysisError::EmptyStack)?;
        let expected = first.dimensions();
        for channel in &channels[1..] {
            if channel.dimensions() != expected {
                return Err(AnalysisError::ChannelSizeMismatch{
                    expected, actual: channel.dimensions()});
            }
        }
        Ok(ImageStack{title: title.to_string(), channels, calibration})
    }

    /// Uses the color planes of `image` as channels (R = 1, G = 2, B = 3). A
    /// grayscale image yields a single channel.
    pub fn from_image(title: &str, image: &DynamicImage, calibration: Calibration)
                      -> AnalysisResult<ImageStack> {
        ImageStack::new(title, channels_of(image), calibration)
    }

    /// Uses each image as one channel, converting color images to luma.
    pub fn from_channel_images(title: &str, images: &[DynamicImage],
                               calibration: Calibration)
                               -> AnalysisResult<ImageStack> {
        let channels = images.iter().map(|image| {
            if image.color().has_color() {
                luma_channel(image)
            } else {
                channels_of(image).swap_remove(0)
            }
        }).collect();
        ImageStack::new(title, channels, calibration)
    }

    /// Reads the stack from disk. A single path supplies the channels through
    /// its color planes; several paths supply one channel each. The title is
    /// the first file's stem.
    pub fn open<P: AsRef<Path>>(paths: &[P], calibration: Calibration)
                                -> AnalysisResult<ImageStack> {
        let first = paths.first().ok_or(AnalysisError::EmptyStack)?.as_ref();
        let title = first.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut images = Vec::<DynamicImage>::new();
        for path in paths {
            images.push(image::ImageReader::open(path)?.decode()?);
        }
        if images.len() == 1 {
            ImageStack::from_image(&title, &images[0], calibration)
        } else {
            ImageStack::from_channel_images(&title, &images, calibration)
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.channels[0].dimensions()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Returns channel `index`, counting from 1.
    pub fn channel(&self, index: usize) -> AnalysisResult<&Channel> {
        if index == 0 || index > self.channels.len() {
            return Err(AnalysisError::MissingChannel{index, count: self.channels.len()});
        }
        Ok(&self.channels[index - 1])
    }
}

fn channels_of(image: &DynamicImage) -> Vec<Channel> {
    let color = image.color();
    let wide = color.bytes_per_pixel() / color.channel_count() > 1;
    match (color.has_color(), wide) {
        (true, true) => split_planes(&image.to_rgb16()),
        (true, false) => split_planes(&image.to_rgb8()),
        (false, true) => vec![to_channel(&image.to_luma16())],
        (false, false) => vec![to_channel(&image.to_luma8())],
    }
}

fn luma_channel(image: &DynamicImage) -> Channel {
    let color = image.color();
    if color.bytes_per_pixel() / color.channel_count() > 1 {
        to_channel(&image.to_luma16())
    } else {
        to_channel(&image.to_luma8())
    }
}

fn split_planes<S>(rgb: &ImageBuffer<Rgb<S>, Vec<S>>) -> Vec<Channel>
where S: Primitive + Into<f32>,
      Rgb<S>: image::Pixel<Subpixel = S> {
    let (width, height) = rgb.dimensions();
    (0..3).map(|plane| {
        Channel::from_fn(width, height, |x, y| {
            Luma([rgb.get_pixel(x, y).0[plane].into()])
        })
    }).collect()
}

fn to_channel<S>(gray: &ImageBuffer<Luma<S>, Vec<S>>) -> Channel
where S: Primitive + Into<f32>,
      Luma<S>: image::Pixel<Subpixel = S> {
    let (width, height) = gray.dimensions();
    Channel::from_fn(width, height, |x, y| Luma([gray.get_pixel(x, y).0[0].into()]))
}

/// Returns a blurred copy of `channel`. `sigma` is in pixels; a non-positive
/// (or NaN) sigma returns an unblurred copy.
pub fn gaussian_blur(channel: &Channel, sigma: f64) -> Channel {
    if !(sigma > 0.0) {
        return channel.clone();
    }
    gaussian_blur_f32(channel, sigma as f32)
}

/// Sobel gradient magnitude of `channel`. Pixels outside the image take the
/// value of the nearest edge pixel.
pub fn find_edges(channel: &Channel) -> Channel {
    let horizontal_kernel = HORIZONTAL_SOBEL.map(|k| k as f32);
    let vertical_kernel = VERTICAL_SOBEL.map(|k| k as f32);
    let horizontal: Channel = filter3x3::<_, f32, f32>(channel, &horizontal_kernel);
    let vertical: Channel = filter3x3::<_, f32, f32>(channel, &vertical_kernel);
    let (width, height) = channel.dimensions();
    Channel::from_fn(width, height, |x, y| {
        let h = horizontal.get_pixel(x, y).0[0];
        let v = vertical.get_pixel(x, y).0[0];
        Luma([(h * h + v * v).sqrt()])
    })
}

/// Intensity statistics over some set of pixels.
#[derive(Clone, Debug)]
pub struct ImageStatistics {
    pub pixel_count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator); 0 for fewer than two
    /// pixels.
    pub stddev: f64,
    /// Histogram over [min, max].
    pub histogram: [u32; NUM_BINS],
}

/// Computes statistics of `channel` restricted to `region`, or over the whole
/// channel if `region` is None. An empty restriction yields NaN min, max and
/// mean, and an all-zero histogram.
pub fn region_statistics(channel: &Channel, region: Option<&Region>) -> ImageStatistics {
    let values: Vec<f32> = match region {
        None => channel.as_raw().clone(),
        Some(region) => {
            let (width, height) = channel.dimensions();
            region.pixels()
                .filter(|&(x, y)| x < width && y < height)
                .map(|(x, y)| channel.get_pixel(x, y).0[0])
                .collect()
        },
    };
    statistics_for_values(&values)
}

fn statistics_for_values(values: &[f32]) -> ImageStatistics {
    let n = values.len();
    if n == 0 {
        return ImageStatistics{pixel_count: 0, min: f64::NAN, max: f64::NAN,
                               mean: f64::NAN, stddev: 0.0,
                               histogram: [0_u32; NUM_BINS]};
    }
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut sum = 0.0_f64;
    let mut sum2 = 0.0_f64;
    for &value in values {
        let v = value as f64;
        min = min.min(v);
        max = max.max(v);
        sum += v;
        sum2 += v * v;
    }
    let count = n as f64;
    let mean = sum / count;
    let variance_n = (count * sum2 - sum * sum) / count;
    let stddev = if n > 1 && variance_n > 0.0 {
        (variance_n / (count - 1.0)).sqrt()
    } else {
        0.0
    };
    debug!("Statistics over {} pixels: min {} max {} mean {} stddev {}",
           n, min, max, mean, stddev);
    ImageStatistics{pixel_count: n, min, max, mean, stddev,
                    histogram: histogram_for_values(values, min, max)}
}

// mod tests.
