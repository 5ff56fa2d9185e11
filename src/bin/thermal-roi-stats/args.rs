use std::path::PathBuf;

use anyhow::Result;
use clap::value_t_or_exit;
use thermal_roi::{
    arg, args_parser, opt,
    raw::{ByteOrder, RawEncoding},
};

pub struct Args {
    pub paths: Vec<String>,
    pub encoding: RawEncoding,
    pub params_path: PathBuf,
    pub rois_path: Option<PathBuf>,
    pub environmental_correction: bool,
}

impl Args {
    pub fn from_cmd_line() -> Result<Args> {
        let matches = args_parser!("thermal-roi-stats")
            .about("Compute ROI temperature statistics from raw thermal frames.")
            .arg(
                opt!("width")
                    .required(true)
                    .help("Frame width in pixels"),
            )
            .arg(
                opt!("height")
                    .required(true)
                    .help("Frame height in pixels"),
            )
            .arg(
                opt!("big endian")
                    .takes_value(false)
                    .help("Counts are stored big endian (default: little endian)"),
            )
            .arg(
                opt!("params")
                    .short("p")
                    .required(true)
                    .help("Calibration parameters json (PascalCase keys)"),
            )
            .arg(
                opt!("rois")
                    .short("r")
                    .help("Settings json holding the ROIs and user parameters"),
            )
            .arg(
                opt!("environmental correction")
                    .short("e")
                    .takes_value(false)
                    .help("Apply the environmental offset to temperatures"),
            )
            .arg(
                arg!("paths")
                    .required(true)
                    .multiple(true)
                    .help("Raw frame paths (row-major u16 counts)"),
            )
            .get_matches();

        let paths = matches
            .values_of("paths")
            .unwrap()
            .map(|f| f.into())
            .collect();
        let byte_order = if matches.is_present("big endian") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        };
        let encoding = RawEncoding {
            width: value_t_or_exit!(matches.value_of("width"), usize),
            height: value_t_or_exit!(matches.value_of("height"), usize),
            byte_order,
        };

        Ok(Args {
            paths,
            encoding,
            params_path: matches.value_of("params").unwrap().into(),
            rois_path: matches.value_of("rois").map(PathBuf::from),
            environmental_correction: matches.is_present("environmental correction"),
        })
    }
}
