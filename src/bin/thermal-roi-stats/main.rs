mod args;
mod report;

use std::io;

use anyhow::Result;
use rayon::prelude::*;
use serde_derive::*;
use thermal_roi::{
    cli::{init_logging, process_frames_par, read_json},
    settings::Settings,
    stats::Stats,
    temperature::CalibrationParameters,
};
use tracing::info;

use crate::{args::Args, report::FrameReport};

#[derive(Serialize, Debug)]
struct Report {
    frames: Vec<FrameReport>,
    overall: Stats,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::from_cmd_line()?;

    let params: CalibrationParameters = read_json(&args.params_path)?;
    let settings: Settings = match &args.rois_path {
        Some(path) => read_json(path)?,
        None => Settings::default(),
    };
    let params = settings.calibration(&params);
    let correction = args.environmental_correction;

    let frames = process_frames_par(args.paths, args.encoding)
        .map(|input| -> Result<_> {
            Ok(FrameReport::from_input(
                input?,
                &params,
                correction,
                &settings.rois,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let overall = frames.iter().fold(Stats::default(), |mut acc, f| {
        acc += &f.stats;
        acc
    });
    info!("processed {} frames", frames.len());

    serde_json::to_writer_pretty(io::stdout(), &Report { frames, overall })?;
    println!();
    Ok(())
}
