// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Nucleus segmentation and chromatin density classification for calibrated
//! microscopy images. See [algorithm] for an overview.

pub mod algorithm;
pub mod calibration;
pub mod density;
pub mod error;
pub mod histogram_funcs;
pub mod image_funcs;
pub mod mask_funcs;
pub mod region;
pub mod results;
pub mod watershed;
