use serde_derive::*;
use serde_json::Value;
use thermal_roi::{
    cli::FrameInput,
    engine::ThermalEngine,
    registry::RoiRegistry,
    settings::DetailedRoiRecord,
    stats::Stats,
    temperature::CalibrationParameters,
};
use tracing::{info, warn};

#[derive(Serialize, Debug)]
pub struct FrameReport {
    path: String,
    width: usize,
    height: usize,
    range: Option<(f64, f64)>,
    pub(crate) stats: Stats,
    rois: Vec<DetailedRoiRecord>,
}

impl FrameReport {
    pub fn from_input(
        input: FrameInput,
        params: &CalibrationParameters,
        environmental_correction: bool,
        rois: &[Value],
    ) -> Self {
        let (width, height) = input.frame.dim();
        let mut registry = RoiRegistry::new(ThermalEngine::new(params.clone()));
        if let Err(e) = registry.set_environmental_correction(environmental_correction) {
            warn!("{}: {}", input.filename, e);
        }
        if let Err(e) = registry.load_frame(input.frame) {
            warn!("{}: temperatures unavailable: {}", input.filename, e);
        }
        let imported = registry.import_values(rois);
        info!("{}: {} rois", input.filename, imported);

        let mut stats = Stats::default();
        let range = registry.engine().field().and_then(|field| {
            field.values().iter().for_each(|&t| stats += t);
            field.range()
        });

        FrameReport {
            path: input.filename,
            width,
            height,
            range,
            stats,
            rois: registry.export_detailed(),
        }
    }
}
