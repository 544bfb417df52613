// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

/// Errors that can occur while assembling an image stack or running an
/// analysis over it. Numeric degeneracies (flat histograms, empty regions)
/// are not errors; they produce NaN or empty results instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Channels are numbered from 1, as in the host application.
    #[error("channel {index} not present; image has {count} channel(s)")]
    MissingChannel { index: usize, count: usize },

    #[error("channel size mismatch: expected {expected:?}, got {actual:?}")]
    ChannelSizeMismatch { expected: (u32, u32), actual: (u32, u32) },

    #[error("image stack has no channels")]
    EmptyStack,

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
