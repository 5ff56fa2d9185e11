//! Live collection of ROIs and the recompute protocol that
//! keeps their statistics current.
//!
//! Everything here is single-threaded and synchronous.
//! Observers are notified in-line and may ask for further
//! recomputes; such requests, when they arrive while a
//! recompute is already running, are parked in a pending
//! list and drained once the running one finishes. At most
//! one recompute is active at any instant, and within one
//! batch every ROI is recomputed at most once, so
//! notification cycles (A asks for B, B asks for A) always
//! terminate.
//!
//! Callers sharing a registry across threads must wrap it,
//! together with its engine, in a single mutex.
use std::{
    collections::HashSet,
    fmt,
    mem,
    sync::atomic::{AtomicU64, Ordering},
};

use serde_derive::*;
use tracing::{debug, info, warn};

use crate::{
    engine::ThermalEngine,
    error::Result,
    raw::RawThermalFrame,
    roi::{Coverage, GeometryUpdate, Polygon, Rectangle, Shape, Spot},
    stats::{summarize, TemperatureStats},
    temperature::{CalibrationParameters, DEFAULT_EMISSIVITY},
};

static NEXT_ROI_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique ROI identifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoiId(u64);

impl RoiId {
    fn next() -> Self {
        RoiId(NEXT_ROI_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RoiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "roi-{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RoiColor {
    const HUE_STEP: usize = 55;

    /// HSV to RGB; `hue` in degrees, `sat` and `val` in
    /// `[0, 1]`.
    pub fn from_hsv(hue: f64, sat: f64, val: f64) -> Self {
        let c = val * sat;
        let h = (hue.rem_euclid(360.)) / 60.;
        let x = c * (1. - (h % 2. - 1.).abs());
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.),
            1 => (x, c, 0.),
            2 => (0., c, x),
            3 => (0., x, c),
            4 => (x, 0., c),
            _ => (c, 0., x),
        };
        let m = val - c;
        let to_u8 = |v: f64| ((v + m) * 255.).round().max(0.).min(255.) as u8;
        RoiColor {
            r: to_u8(r),
            g: to_u8(g),
            b: to_u8(b),
        }
    }

    /// Deterministic color for the `index`-th ROI: hues step
    /// around the wheel.
    pub fn nth(index: usize) -> Self {
        let hue = (index * Self::HUE_STEP) % 360;
        Self::from_hsv(hue as f64, 220. / 255., 1.)
    }
}

/// A region of interest with its cached statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    id: RoiId,
    pub name: String,
    pub emissivity: f64,
    pub color: RoiColor,
    pub shape: Shape,
    statistics: Option<TemperatureStats>,
}

impl Roi {
    pub fn id(&self) -> RoiId {
        self.id
    }

    /// `None` until computed, and whenever the ROI has no
    /// valid pixel.
    pub fn statistics(&self) -> Option<&TemperatureStats> {
        self.statistics.as_ref()
    }
}

/// Optional settings when creating a ROI.
#[derive(Debug, Clone, Default)]
pub struct RoiOptions {
    pub name: Option<String>,
    pub emissivity: Option<f64>,
}

/// Non-geometric properties.
#[derive(Debug, Clone, PartialEq)]
pub enum RoiProperty {
    Name(String),
    Color(RoiColor),
    Emissivity(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiEvent {
    Added(RoiId),
    Removed(RoiId),
    Modified(RoiId),
    Cleared,
    StatisticsUpdated(RoiId),
    /// All ROIs were recomputed after a field change.
    AnalysisUpdated,
}

/// Handle through which observers request recomputes.
#[derive(Debug, Default)]
pub struct RecomputeRequests(Vec<RoiId>);

impl RecomputeRequests {
    pub fn recompute(&mut self, id: RoiId) {
        self.0.push(id);
    }
}

pub type Observer = Box<dyn FnMut(&RoiEvent, &mut RecomputeRequests)>;

pub struct RoiRegistry {
    engine: ThermalEngine,
    rois: Vec<Roi>,
    next_name: usize,
    observers: Vec<Observer>,
    recomputing: bool,
    pending: Vec<RoiId>,
}

impl fmt::Debug for RoiRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoiRegistry")
            .field("rois", &self.rois)
            .field("recomputing", &self.recomputing)
            .field("pending", &self.pending)
            .finish()
    }
}

impl RoiRegistry {
    pub fn new(engine: ThermalEngine) -> Self {
        RoiRegistry {
            engine,
            rois: vec![],
            next_name: 1,
            observers: vec![],
            recomputing: false,
            pending: vec![],
        }
    }

    pub fn engine(&self) -> &ThermalEngine {
        &self.engine
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn get(&self, id: RoiId) -> Option<&Roi> {
        self.rois.iter().find(|r| r.id == id)
    }

    fn index_of(&self, id: RoiId) -> Option<usize> {
        self.rois.iter().position(|r| r.id == id)
    }

    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&RoiEvent, &mut RecomputeRequests) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, event: RoiEvent) {
        let mut observers = mem::take(&mut self.observers);
        let mut requests = RecomputeRequests::default();
        for observer in observers.iter_mut() {
            observer(&event, &mut requests);
        }
        self.observers = observers;
        for id in requests.0 {
            self.recompute(id);
        }
    }

    // Frame and calibration changes invalidate every ROI.

    pub fn load_frame(&mut self, frame: RawThermalFrame) -> Result<()> {
        let res = self.engine.load_frame(frame);
        self.recompute_all();
        res
    }

    pub fn set_parameters(&mut self, params: CalibrationParameters) -> Result<()> {
        let res = self.engine.set_parameters(params);
        self.recompute_all();
        res
    }

    pub fn set_environmental_correction(&mut self, enabled: bool) -> Result<()> {
        let res = self.engine.set_environmental_correction(enabled);
        self.recompute_all();
        res
    }

    pub fn create_rectangle(&mut self, rect: Rectangle, opts: RoiOptions) -> &Roi {
        self.create(rect.into(), "ROI", opts)
    }

    pub fn create_spot(&mut self, spot: Spot, opts: RoiOptions) -> &Roi {
        self.create(spot.into(), "Spot", opts)
    }

    pub fn create_polygon(&mut self, polygon: Polygon, opts: RoiOptions) -> &Roi {
        self.create(polygon.into(), "Polygon", opts)
    }

    fn create(&mut self, shape: Shape, prefix: &str, opts: RoiOptions) -> &Roi {
        let name = opts.name.unwrap_or_else(|| {
            let name = format!("{}_{}", prefix, self.next_name);
            self.next_name += 1;
            name
        });
        let emissivity = match opts.emissivity {
            Some(e) if e.is_finite() => e.max(0.).min(1.),
            _ => DEFAULT_EMISSIVITY,
        };

        let id = RoiId::next();
        self.rois.push(Roi {
            id,
            name,
            emissivity,
            color: RoiColor::nth(self.rois.len()),
            shape,
            statistics: None,
        });
        debug!(%id, kind = self.rois[self.rois.len() - 1].shape.kind(), "roi created");

        self.recompute(id);
        self.notify(RoiEvent::Added(id));

        let idx = self.index_of(id).unwrap_or(self.rois.len() - 1);
        &self.rois[idx]
    }

    pub fn delete(&mut self, id: RoiId) -> bool {
        let idx = match self.index_of(id) {
            Some(idx) => idx,
            None => return false,
        };
        let removed = self.rois.remove(idx);
        self.pending.retain(|&p| p != id);
        info!("deleted roi `{}`", removed.name);
        self.notify(RoiEvent::Removed(id));
        true
    }

    pub fn delete_many(&mut self, ids: &[RoiId]) -> usize {
        ids.iter().filter(|&&id| self.delete(id)).count()
    }

    /// Remove every ROI and restart automatic naming. The
    /// temperature field is left alone.
    pub fn delete_all(&mut self) -> usize {
        let count = self.rois.len();
        self.rois.clear();
        self.pending.clear();
        self.next_name = 1;
        info!("cleared {} rois", count);
        self.notify(RoiEvent::Cleared);
        count
    }

    /// Edit a non-geometric property. Emissivity must lie in
    /// `[0, 1]`; changing it recomputes this ROI.
    pub fn update_property(&mut self, id: RoiId, property: RoiProperty) -> bool {
        let idx = match self.index_of(id) {
            Some(idx) => idx,
            None => return false,
        };

        let roi = &mut self.rois[idx];
        let recompute = match property {
            RoiProperty::Name(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return false;
                }
                roi.name = name.to_string();
                false
            }
            RoiProperty::Color(color) => {
                roi.color = color;
                false
            }
            RoiProperty::Emissivity(e) => {
                if !(0. ..=1.).contains(&e) {
                    warn!("rejecting emissivity {} for `{}`", e, roi.name);
                    return false;
                }
                roi.emissivity = e;
                true
            }
        };

        if recompute {
            self.recompute(id);
        }
        self.notify(RoiEvent::Modified(id));
        true
    }

    /// Apply a partial geometry edit and recompute this ROI.
    /// Returns `false`, without side effects, if no field of
    /// the update applies to the ROI's shape or the result
    /// has a negative size or non-positive radius.
    pub fn update_geometry(&mut self, id: RoiId, update: &GeometryUpdate) -> bool {
        let idx = match self.index_of(id) {
            Some(idx) => idx,
            None => return false,
        };
        let mut shape = self.rois[idx].shape.clone();
        if !update.apply(&mut shape) {
            return false;
        }
        if !shape.has_valid_extent() {
            warn!("rejecting {} geometry for `{}`", shape.kind(), self.rois[idx].name);
            return false;
        }
        self.rois[idx].shape = shape;
        self.recompute(id);
        self.notify(RoiEvent::Modified(id));
        true
    }

    /// Recompute one ROI following the guard protocol.
    ///
    /// If a recompute is already running, `id` is queued and
    /// this returns immediately. Otherwise `id` is recomputed
    /// and the queue is drained before returning, skipping
    /// ROIs already recomputed in this batch.
    pub fn recompute(&mut self, id: RoiId) {
        if self.recomputing {
            if !self.pending.contains(&id) {
                debug!(%id, "recompute in progress, deferring");
                self.pending.push(id);
            }
            return;
        }

        let mut done = HashSet::new();
        done.insert(id);
        self.run_guarded(id);

        while !self.pending.is_empty() {
            let next = self.pending.remove(0);
            if !done.insert(next) {
                debug!(id = %next, "already recomputed in this batch");
                continue;
            }
            self.run_guarded(next);
        }
    }

    fn run_guarded(&mut self, id: RoiId) {
        self.recomputing = true;
        if self.refresh_statistics(id) {
            self.notify(RoiEvent::StatisticsUpdated(id));
        }
        self.recomputing = false;
    }

    /// Recompute every ROI once, in list order, bypassing the
    /// guard and the pending queue.
    pub fn recompute_all(&mut self) {
        let ids: Vec<_> = self.rois.iter().map(|r| r.id).collect();
        for id in ids {
            self.refresh_statistics(id);
        }
        debug!("recomputed {} rois", self.rois.len());
        self.notify(RoiEvent::AnalysisUpdated);
    }

    fn refresh_statistics(&mut self, id: RoiId) -> bool {
        let idx = match self.index_of(id) {
            Some(idx) => idx,
            None => {
                debug!(%id, "recompute requested for unknown roi");
                return false;
            }
        };

        let roi = &self.rois[idx];
        let statistics = match compute_statistics(&self.engine, roi) {
            Ok(stats) => stats,
            Err(e) => {
                warn!("statistics for `{}` unavailable: {}", roi.name, e);
                None
            }
        };
        self.rois[idx].statistics = statistics;
        true
    }

    /// Number of pixels in the ROI's mask; zero without a
    /// loaded image.
    pub fn pixel_count(&self, id: RoiId) -> Option<usize> {
        let roi = self.get(id)?;
        let (wid, ht) = match self.engine.field() {
            Some(field) => field.dim(),
            None => return Some(0),
        };
        match roi.shape.mask(wid, ht) {
            Ok(mask) => Some(mask.pixel_count()),
            Err(e) => {
                warn!("mask for `{}` unavailable: {}", roi.name, e);
                Some(0)
            }
        }
    }
}

fn compute_statistics(engine: &ThermalEngine, roi: &Roi) -> Result<Option<TemperatureStats>> {
    let (wid, ht) = match engine.field() {
        Some(field) => field.dim(),
        None => return Ok(None),
    };

    let mask = roi.shape.mask(wid, ht)?;
    match mask.coverage() {
        Coverage::Covered => (),
        Coverage::OutsideImage => {
            debug!(id = %roi.id, "roi lies outside the image");
            return Ok(None);
        }
        Coverage::Degenerate => {
            debug!(id = %roi.id, "roi covers no pixel");
            return Ok(None);
        }
    }

    let temps = engine.roi_temperatures(&mask, roi.emissivity)?;
    Ok(summarize(temps))
}
