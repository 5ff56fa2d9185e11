use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::Result;
use approx::assert_abs_diff_eq;
use ndarray::Array2;
use thermal_roi::{
    registry::{RoiEvent, RoiOptions, RoiProperty},
    roi::{Polygon, Rectangle, Spot},
    settings::Settings,
    CalibrationParameters, RawThermalFrame, RoiRegistry, ThermalEngine,
};

fn params() -> CalibrationParameters {
    let values: HashMap<String, f64> = [
        ("PlanckR1", 21106.77),
        ("PlanckR2", 0.012545258),
        ("PlanckB", 1501.),
        ("PlanckF", 1.),
        ("PlanckO", -7340.),
        ("Emissivity", 0.95),
    ]
    .iter()
    .map(|&(k, v)| (k.to_string(), v))
    .collect();
    CalibrationParameters::from_map(&values, &Default::default())
}

fn session() -> Result<RoiRegistry> {
    let mut registry = RoiRegistry::new(ThermalEngine::new(params()));
    let counts = Array2::from_shape_fn((48, 64), |(r, c)| 14500 + (r * 30 + c * 5) as u16);
    registry.load_frame(RawThermalFrame::from_array(counts))?;
    Ok(registry)
}

fn populate(registry: &mut RoiRegistry) {
    registry.create_rectangle(
        Rectangle {
            x: 4.,
            y: 4.,
            width: 10.,
            height: 6.,
        },
        RoiOptions::default(),
    );
    registry.create_spot(
        Spot {
            x: 40.,
            y: 20.,
            radius: 3.5,
        },
        RoiOptions {
            name: Some("hot spot".into()),
            emissivity: Some(0.8),
        },
    );
    registry.create_polygon(
        Polygon {
            points: vec![(30., 30.), (60., 32.), (45., 46.)],
        },
        RoiOptions::default(),
    );
}

#[test]
fn settings_round_trip_restores_rois() -> Result<()> {
    let mut registry = session()?;
    populate(&mut registry);

    let dir = tempfile::tempdir()?;
    let image = dir.path().join("frame_0001.jpg");
    let path = Settings::path_for_image(&image);
    Settings::capture(&registry)?.save(&path)?;

    let loaded = Settings::load(&path)?.expect("settings written");
    assert_eq!(loaded.rois.len(), 3);

    let mut restored = session()?;
    restored.set_parameters(loaded.calibration(restored.engine().parameters()))?;
    assert_eq!(restored.import_values(&loaded.rois), 3);

    assert_eq!(restored.export_rois(), registry.export_rois());
    for (before, after) in registry.rois().iter().zip(restored.rois()) {
        assert_eq!(before.name, after.name);
        assert_eq!(before.shape, after.shape);
        let (b, a) = (before.statistics().unwrap(), after.statistics().unwrap());
        assert_abs_diff_eq!(b.mean, a.mean, epsilon = 1e-9);
        assert_abs_diff_eq!(b.median, a.median, epsilon = 1e-9);
    }
    Ok(())
}

#[test]
fn missing_settings_file_is_not_an_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(Settings::load(&dir.path().join("absent.json"))?.is_none());
    Ok(())
}

#[test]
fn observers_requesting_each_other_terminate() -> Result<()> {
    let mut registry = session()?;
    populate(&mut registry);
    let ids: Vec<_> = registry.rois().iter().map(|r| r.id()).collect();

    // every roi update asks for the next one, forming a ring
    let updates = Rc::new(RefCell::new(vec![]));
    let seen = updates.clone();
    let ring = ids.clone();
    registry.subscribe(move |event, requests| {
        if let RoiEvent::StatisticsUpdated(id) = event {
            seen.borrow_mut().push(*id);
            let pos = ring.iter().position(|r| r == id).unwrap();
            requests.recompute(ring[(pos + 1) % ring.len()]);
        }
    });

    assert!(registry.update_property(ids[0], RoiProperty::Emissivity(0.7)));
    let mut updated = updates.borrow().clone();
    assert_eq!(updated.len(), ids.len());
    updated.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(updated, expected);
    Ok(())
}

#[test]
fn detailed_export_follows_emissivity_changes() -> Result<()> {
    let mut registry = session()?;
    populate(&mut registry);
    let id = registry.rois()[0].id();
    let before = registry.export_detailed()[0].temp_mean.unwrap();

    registry.update_property(id, RoiProperty::Emissivity(0.5));
    let detailed = registry.export_detailed();
    assert_eq!(detailed[0].emissivity, 0.5);
    // the scene is colder than the reflected temperature
    assert!(detailed[0].temp_mean.unwrap() < before);
    assert_eq!(detailed[0].pixel_count, 60);
    Ok(())
}
