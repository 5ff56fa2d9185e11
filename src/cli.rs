//! Helpers shared by the accompanying binaries: argument
//! macros, logging setup and parallel frame loading.
//!
//! APIs here shouldn't be considered stable / used as a
//! library.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
pub use clap::{App, Arg};
use indicatif::{ProgressBar, ProgressStyle};
pub use inflector::Inflector;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

use crate::raw::{RawEncoding, RawThermalFrame};

#[macro_export]
macro_rules! args_parser {
    ($name:expr) => {{
        $crate::cli::App::new($name)
            .version(clap::crate_version!())
            .author(clap::crate_authors!())
    }};
}

#[macro_export]
macro_rules! arg {
    ($name:expr) => {{
        use $crate::cli::Inflector;
        $crate::cli::Arg::with_name($name).value_name(&$name.to_screaming_snake_case())
    }};
}

#[macro_export]
macro_rules! opt {
    ($name:expr) => {{
        use $crate::cli::Inflector;
        $crate::cli::Arg::with_name($name)
            .long(&$name.to_kebab_case())
            .value_name(&$name.to_screaming_snake_case())
    }};
}

/// Install a stderr subscriber filtered by `RUST_LOG`
/// (`info` when unset).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

pub struct FrameInput {
    pub filename: String,
    pub frame: RawThermalFrame,
}

impl FrameInput {
    pub fn try_from_path(filename: String, encoding: RawEncoding) -> Result<Self> {
        let bytes = std::fs::read(&filename).with_context(|| format!("reading {}", filename))?;
        let frame = RawThermalFrame::from_bytes(&bytes, encoding)
            .with_context(|| format!("decoding {}", filename))?;
        Ok(FrameInput { filename, frame })
    }
}

pub fn process_frames_par(
    paths: Vec<String>,
    encoding: RawEncoding,
) -> impl ParallelIterator<Item = Result<FrameInput>> {
    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {wide_bar:cyan/blue} {pos:>7}/{len:7}"),
    );

    paths
        .into_par_iter()
        .map(move |p| FrameInput::try_from_path(p, encoding))
        .inspect(move |_| bar.inc(1))
}
