// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use env_logger;
use log::{error, info};

use chromatin_detect::algorithm::{run_heterochromatin_classification,
                                  run_nucleus_segmentation,
                                  ClassifierParams, NucleusParams};
use chromatin_detect::calibration::Calibration;
use chromatin_detect::error::AnalysisResult;
use chromatin_detect::histogram_funcs::{HistogramThresholder, ThresholdMethod};
use chromatin_detect::image_funcs::ImageStack;
use chromatin_detect::results::{render_overlay, Overlay, ResultsTable};
use chromatin_detect::watershed::EdmWatershed;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Segment and measure every nucleus.
    Nuclei,
    /// Classify chromatin density and measure heterochromatin.
    Heterochromatin,
}

/// Measures nuclei or heterochromatin in calibrated microscopy images.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Analysis to run.
    #[arg(value_enum)]
    mode: Mode,

    /// Image file(s). One color file supplies channels through its color
    /// planes; several grayscale files supply one channel each, in order.
    #[arg(short, long, num_args = 1.., required = true)]
    input: Vec<String>,

    /// Directory for Results.tsv and overlay images. Results go to stdout if
    /// omitted.
    #[arg(short, long)]
    output: Option<String>,

    /// Physical width of a pixel.
    #[arg(long, default_value_t = 1.0)]
    pixel_width: f64,

    /// Physical height of a pixel. Defaults to the pixel width.
    #[arg(long)]
    pixel_height: Option<f64>,

    /// Length unit of the pixel size, e.g. "µm".
    #[arg(long, default_value = "pixel")]
    unit: String,

    /// Gaussian smoothing in physical units. Defaults to 0.4 for nuclei and
    /// 0.25 for heterochromatin.
    #[arg(short, long)]
    sigma: Option<f64>,

    /// Threshold method for nuclei. Defaults to huang.
    #[arg(short, long, value_enum)]
    method: Option<ThresholdMethod>,

    /// Watershed tolerance of the first nucleus split.
    #[arg(long, default_value_t = 12)]
    start_tolerance: i32,

    /// Lowest watershed tolerance used when splitting nuclei.
    #[arg(long, default_value_t = 4)]
    min_tolerance: i32,

    /// Smallest nucleus area kept, in physical units.
    #[arg(long, default_value_t = 15.0)]
    min_area: f64,

    /// Nuclei larger than this area are split.
    #[arg(long, default_value_t = 50.0)]
    segment_area: f64,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> AnalysisResult<()> {
    let calibration = Calibration::new(args.pixel_width,
                                       args.pixel_height.unwrap_or(args.pixel_width),
                                       &args.unit);
    let stack = ImageStack::open(&args.input, calibration)?;
    let (width, height) = stack.dimensions();
    info!("Processing {} ({}x{}, {} channels)",
          stack.title(), width, height, stack.num_channels());

    let mut table = ResultsTable::new();
    let mut overlay = Overlay::new();
    let start = Instant::now();
    match args.mode {
        Mode::Nuclei => {
            let mut params = NucleusParams::default();
            if let Some(sigma) = args.sigma {
                params.sigma = sigma;
            }
            if let Some(method) = args.method {
                params.method = method;
            }
            params.segment.start_tolerance = args.start_tolerance;
            params.segment.min_tolerance = args.min_tolerance;
            params.segment.min_area = args.min_area;
            params.segment.segment_area = args.segment_area;
            let nuclei = run_nucleus_segmentation(
                &stack, &params, &HistogramThresholder, &EdmWatershed,
                &mut table, &mut overlay)?;
            info!("{} nuclei in {:?}", nuclei.len(), start.elapsed());
        },
        Mode::Heterochromatin => {
            let mut params = ClassifierParams::default();
            if let Some(sigma) = args.sigma {
                params.sigma = sigma;
            }
            run_heterochromatin_classification(
                &stack, &params, &HistogramThresholder, &mut table, &mut overlay)?;
            info!("Classification done in {:?}", start.elapsed());
        },
    }

    match &args.output {
        None => print!("{}", table),
        Some(output) => {
            fs::create_dir_all(output)?;
            let mut results_path = PathBuf::from(output);
            results_path.push("Results.tsv");
            table.save(&results_path)?;

            let mut overlay_path = PathBuf::from(output);
            overlay_path.push(format!("{}_overlay.png", stack.title()));
            render_overlay(stack.channel(1)?, &overlay).save(&overlay_path)?;
            info!("Wrote overlay to {:?}", overlay_path);
        },
    }
    Ok(())
}
