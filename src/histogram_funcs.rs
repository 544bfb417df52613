// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Histogram based automatic threshold selection.
//!
//! Each method maps a 256 bin histogram to the index of the threshold bin.
//! The methods follow the classic auto-threshold family found in microscopy
//! packages; see [ThresholdMethod] for the supported ones. Callers convert the
//! bin index back to an intensity using the range the histogram was built
//! over.
//!
//! Otsu differs from the common implementation in one respect. When several
//! bins tie for the largest between-class variance, which happens across an
//! empty valley such as the one between the two levels of a two-level image,
//! the result is the mean of the tied bins. The usual `>=` comparison would
//! instead keep the last tied bin, placing the threshold just below the
//! upper level. Ties are compared with a relative tolerance of 1e-12.

use std::fmt;
use std::str::FromStr;

use log::debug;

/// Number of bins in the histograms handed to a [Thresholder].
pub const NUM_BINS: usize = 256;

// Give up smoothing a histogram towards bimodality after this many passes.
const MAX_SMOOTHING_PASSES: usize = 10000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ThresholdMethod {
    /// Smooths the histogram until bimodal; threshold at the valley.
    Minimum,
    /// Maximizes the between-class variance.
    Otsu,
    /// Maximizes the sum of background and foreground entropies (Kapur).
    MaxEntropy,
    /// Minimizes the fuzzy entropy of the partition (Huang).
    Huang,
    /// Mean of the histogram.
    Mean,
    /// Smooths the histogram until bimodal; threshold midway between peaks.
    Intermodes,
}

impl ThresholdMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ThresholdMethod::Minimum => "Minimum",
            ThresholdMethod::Otsu => "Otsu",
            ThresholdMethod::MaxEntropy => "MaxEntropy",
            ThresholdMethod::Huang => "Huang",
            ThresholdMethod::Mean => "Mean",
            ThresholdMethod::Intermodes => "Intermodes",
        }
    }
}

impl fmt::Display for ThresholdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ThresholdMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for method in [ThresholdMethod::Minimum, ThresholdMethod::Otsu,
                       ThresholdMethod::MaxEntropy, ThresholdMethod::Huang,
                       ThresholdMethod::Mean, ThresholdMethod::Intermodes] {
            if method.name().eq_ignore_ascii_case(s) {
                return Ok(method);
            }
        }
        Err(format!("unknown threshold method '{}'", s))
    }
}

/// Strategy for choosing a threshold bin from a histogram.
pub trait Thresholder {
    /// Returns the threshold bin index, or None if `method` cannot find a
    /// threshold for this histogram (e.g. it is empty, or never becomes
    /// bimodal under smoothing).
    fn threshold(&self, histogram: &[u32], method: ThresholdMethod) -> Option<usize>;
}

/// The built-in [Thresholder].
#[derive(Copy, Clone, Debug, Default)]
pub struct HistogramThresholder;

impl Thresholder for HistogramThresholder {
    fn threshold(&self, histogram: &[u32], method: ThresholdMethod) -> Option<usize> {
        if histogram.iter().all(|&count| count == 0) {
            return None;
        }
        let bin = match method {
            ThresholdMethod::Minimum => minimum(histogram),
            ThresholdMethod::Otsu => otsu(histogram),
            ThresholdMethod::MaxEntropy => max_entropy(histogram),
            ThresholdMethod::Huang => huang(histogram),
            ThresholdMethod::Mean => mean(histogram),
            ThresholdMethod::Intermodes => intermodes(histogram),
        };
        debug!("{} threshold: bin {:?}", method, bin);
        bin
    }
}

/// Builds a [NUM_BINS] histogram of `values` over the range [min, max]. When
/// the range is empty (max == min) every value lands in bin 0.
pub fn histogram_for_values(values: &[f32], min: f64, max: f64) -> [u32; NUM_BINS] {
    let mut histogram = [0_u32; NUM_BINS];
    let range = max - min;
    for &value in values {
        let bin = if range > 0.0 {
            let scaled = (value as f64 - min) * NUM_BINS as f64 / range;
            (scaled as usize).min(NUM_BINS - 1)
        } else {
            0
        };
        histogram[bin] += 1;
    }
    histogram
}

/// Returns (mean, stddev) of the bin indices weighted by their counts.
pub fn stats_for_histogram(histogram: &[u32]) -> (/*mean*/f64, /*stddev*/f64) {
    let mut count = 0_u64;
    let mut first_moment = 0_u64;
    for (h, &bin_count) in histogram.iter().enumerate() {
        count += bin_count as u64;
        first_moment += bin_count as u64 * h as u64;
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = first_moment as f64 / count as f64;
    let mut second_moment: f64 = 0.0;
    for (h, &bin_count) in histogram.iter().enumerate() {
        second_moment += bin_count as f64 * (h as f64 - mean) * (h as f64 - mean);
    }
    (mean, (second_moment / count as f64).sqrt())
}

fn otsu(histogram: &[u32]) -> Option<usize> {
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    let mut cumulative = 0.0;   // Normalized cumulative histogram.
    let mut first_moment = 0.0; // Cumulative mean gray level.
    let total_mean: f64 = histogram.iter().enumerate()
        .map(|(h, &c)| h as f64 * c as f64 / total).sum();
    let mut best_variance = 0.0;
    // Bins tied for the best variance, e.g. across an empty valley.
    let mut best_bins = Vec::<usize>::new();
    for (h, &bin_count) in histogram.iter().enumerate() {
        let p = bin_count as f64 / total;
        cumulative += p;
        first_moment += h as f64 * p;
        let denominator = cumulative * (1.0 - cumulative);
        if denominator <= 0.0 {
            continue;
        }
        let diff = total_mean * cumulative - first_moment;
        let between_class_variance = diff * diff / denominator;
        if between_class_variance > best_variance * (1.0 + 1e-12) {
            best_variance = between_class_variance;
            best_bins.clear();
            best_bins.push(h);
        } else if between_class_variance >= best_variance * (1.0 - 1e-12) &&
            !best_bins.is_empty()
        {
            best_bins.push(h);
        }
    }
    if best_bins.is_empty() {
        // A single populated bin has no between-class variance anywhere.
        return first_populated_bin(histogram);
    }
    Some(best_bins.iter().sum::<usize>() / best_bins.len())
}

fn huang(histogram: &[u32]) -> Option<usize> {
    let len = histogram.len();
    let first_bin = first_populated_bin(histogram)?;
    let last_bin = last_populated_bin(histogram)?;
    if first_bin == last_bin {
        return Some(first_bin);
    }
    let term = 1.0 / (last_bin - first_bin) as f64;

    // Mean gray level of the background (bins <= t) and foreground (> t).
    let mut mu_0 = vec![0.0_f64; len];
    let mut sum_pix = 0.0;
    let mut num_pix = 0.0;
    for h in first_bin..len {
        sum_pix += h as f64 * histogram[h] as f64;
        num_pix += histogram[h] as f64;
        mu_0[h] = sum_pix / num_pix;
    }
    let mut mu_1 = vec![0.0_f64; len];
    sum_pix = 0.0;
    num_pix = 0.0;
    for h in (1..=last_bin).rev() {
        sum_pix += h as f64 * histogram[h] as f64;
        num_pix += histogram[h] as f64;
        mu_1[h - 1] = sum_pix / num_pix;
    }

    let fuzzy_entropy = |count: u32, h: usize, mu: f64| -> f64 {
        let mu_x = 1.0 / (1.0 + term * (h as f64 - mu).abs());
        if mu_x < 1e-06 || mu_x > 0.999999 {
            return 0.0;
        }
        count as f64 * (-mu_x * mu_x.ln() - (1.0 - mu_x) * (1.0 - mu_x).ln())
    };

    let mut threshold = None;
    let mut min_entropy = f64::MAX;
    for t in 0..len {
        let mut entropy = 0.0;
        for h in 0..=t {
            entropy += fuzzy_entropy(histogram[h], h, mu_0[t]);
        }
        for h in t + 1..len {
            entropy += fuzzy_entropy(histogram[h], h, mu_1[t]);
        }
        if entropy < min_entropy {
            min_entropy = entropy;
            threshold = Some(t);
        }
    }
    threshold
}

fn max_entropy(histogram: &[u32]) -> Option<usize> {
    let len = histogram.len();
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    let norm: Vec<f64> = histogram.iter().map(|&c| c as f64 / total).collect();
    // Cumulative probability of background (p1) and object (p2).
    let mut p1 = vec![0.0_f64; len];
    let mut p2 = vec![0.0_f64; len];
    p1[0] = norm[0];
    p2[0] = 1.0 - p1[0];
    for h in 1..len {
        p1[h] = p1[h - 1] + norm[h];
        p2[h] = 1.0 - p1[h];
    }
    let first_bin = (0..len).find(|&h| p1[h].abs() >= f64::EPSILON).unwrap_or(0);
    let last_bin = (first_bin..len).rev()
        .find(|&h| p2[h].abs() >= f64::EPSILON).unwrap_or(len - 1);

    let mut threshold = None;
    let mut max_entropy = 0.0;
    for t in first_bin..=last_bin {
        let mut background_entropy = 0.0;
        for h in 0..=t {
            if histogram[h] != 0 {
                let q = norm[h] / p1[t];
                background_entropy -= q * q.ln();
            }
        }
        let mut object_entropy = 0.0;
        for h in t + 1..len {
            if histogram[h] != 0 {
                let q = norm[h] / p2[t];
                object_entropy -= q * q.ln();
            }
        }
        let total_entropy = background_entropy + object_entropy;
        if total_entropy > max_entropy {
            max_entropy = total_entropy;
            threshold = Some(t);
        }
    }
    threshold.or(Some(first_bin))
}

fn minimum(histogram: &[u32]) -> Option<usize> {
    if histogram.len() < 2 {
        return None;
    }
    let max_bin = last_populated_bin(histogram)?;
    let smoothed = smooth_until_bimodal(histogram)?;
    // Threshold at the valley between the two peaks.
    (1..max_bin).find(|&h| smoothed[h - 1] > smoothed[h] && smoothed[h + 1] >= smoothed[h])
}

fn intermodes(histogram: &[u32]) -> Option<usize> {
    if histogram.len() < 3 {
        return None;
    }
    let smoothed = smooth_until_bimodal(histogram)?;
    let peak_sum: usize = (1..histogram.len() - 1)
        .filter(|&h| smoothed[h - 1] < smoothed[h] && smoothed[h + 1] < smoothed[h])
        .sum();
    Some(peak_sum / 2)
}

fn mean(histogram: &[u32]) -> Option<usize> {
    let (mean, _stddev) = stats_for_histogram(histogram);
    Some(mean.floor() as usize)
}

// Repeatedly applies a 3 point running mean (zero outside the histogram)
// until exactly two local maxima remain. Returns None if that does not
// happen within MAX_SMOOTHING_PASSES.
fn smooth_until_bimodal(histogram: &[u32]) -> Option<Vec<f64>> {
    let len = histogram.len();
    let mut smoothed: Vec<f64> = histogram.iter().map(|&c| c as f64).collect();
    let mut scratch = vec![0.0_f64; len];
    let mut passes = 0;
    while !is_bimodal(&smoothed) {
        for h in 1..len - 1 {
            scratch[h] = (smoothed[h - 1] + smoothed[h] + smoothed[h + 1]) / 3.0;
        }
        scratch[0] = (smoothed[0] + smoothed[1]) / 3.0;
        scratch[len - 1] = (smoothed[len - 2] + smoothed[len - 1]) / 3.0;
        std::mem::swap(&mut smoothed, &mut scratch);
        passes += 1;
        if passes > MAX_SMOOTHING_PASSES {
            debug!("Histogram not bimodal after {} smoothing passes", passes);
            return None;
        }
    }
    Some(smoothed)
}

fn is_bimodal(values: &[f64]) -> bool {
    let mut modes = 0;
    for k in 1..values.len() - 1 {
        if values[k - 1] < values[k] && values[k + 1] < values[k] {
            modes += 1;
            if modes > 2 {
                return false;
            }
        }
    }
    modes == 2
}

fn first_populated_bin(histogram: &[u32]) -> Option<usize> {
    histogram.iter().position(|&c| c != 0)
}

fn last_populated_bin(histogram: &[u32]) -> Option<usize> {
    histogram.iter().rposition(|&c| c != 0)
}

// mod tests.
