//! End-to-end tests of indexing and extracting model output on disk.

use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use ilamb_core::grid::TargetGrid;
use ilamb_core::netcdf_io::{read_variable, write_variable};
use ilamb_core::{
    discover_models, DiscoveryOptions, ExtractOptions, IlambError, MaskedArray, ModelOptions,
    ModelResult, Variable,
};
use ndarray::{Array2, Array3};
use tempfile::TempDir;

/// Monthly field on a 2x4 grid with `months` steps from `start_month`.
fn monthly_tas(start_month: usize, months: usize, value: f64) -> Variable {
    let grid = TargetGrid::global(90.0);
    let data = Array3::from_elem((months, 2, 4), value);
    let mut v = Variable::new("tas", "K", MaskedArray::from_data(data.into_dyn()));
    let bounds: Vec<[f64; 2]> = (start_month..start_month + months)
        .map(|m| [m as f64 * 30.0, (m + 1) as f64 * 30.0])
        .collect();
    v.time = Some(bounds.iter().map(|b| 0.5 * (b[0] + b[1])).collect());
    v.time_bnds = Some(bounds);
    v.lat = Some(grid.lat.clone());
    v.lat_bnds = Some(grid.lat_bnds.clone());
    v.lon = Some(grid.lon.clone());
    v.lon_bnds = Some(grid.lon_bnds.clone());
    v
}

/// Writes a file in the raw CF layout of a model, with its own calendar.
fn write_raw_tas(path: &Path, units: &str, calendar: &str, times: &[f64], fill: f32) {
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", times.len()).unwrap();
    file.add_dimension("lat", 2).unwrap();
    file.add_dimension("lon", 2).unwrap();
    {
        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", units).unwrap();
        time.put_attribute("calendar", calendar).unwrap();
        time.put_values(times, ..).unwrap();
    }
    {
        let mut lat = file.add_variable::<f64>("lat", &["lat"]).unwrap();
        lat.put_values(&[-45.0, 45.0], ..).unwrap();
    }
    {
        let mut lon = file.add_variable::<f64>("lon", &["lon"]).unwrap();
        lon.put_values(&[90.0, 270.0], ..).unwrap();
    }
    let mut tas = file.add_variable::<f32>("tas", &["time", "lat", "lon"]).unwrap();
    tas.put_attribute("units", "K").unwrap();
    tas.put_attribute("long_name", "Near-Surface Air Temperature").unwrap();
    tas.put_attribute("_FillValue", fill).unwrap();
    let mut values = vec![280.0f32; times.len() * 4];
    values[1] = fill;
    tas.put_values(&values, ..).unwrap();
}

#[test]
fn test_read_raw_file_converts_calendar_and_masks_fill() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tas_Amon.nc");
    write_raw_tas(&path, "days since 1900-01-01", "noleap", &[15.5, 45.0], -999.0);

    let tas = read_variable(&path, "tas").unwrap();
    assert_eq!(tas.data.shape(), &[2, 2, 2]);
    assert_relative_eq!(tas.time.as_ref().unwrap()[0], 50.0 * 365.0 + 15.5);
    // Bounds are synthesised from midpoints when the file has none.
    assert_eq!(tas.time_bnds.as_ref().unwrap().len(), 2);
    assert_eq!(tas.data.get(&[0, 0, 1]), None);
    assert_eq!(tas.data.get(&[0, 0, 0]), Some(280.0));
    assert!(tas.lat_bnds.is_none());
    assert!(tas.unsupported_reason().is_none());
}

#[test]
fn test_written_variable_reads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tas_mean.nc");
    let mut tas = monthly_tas(0, 3, 290.0);
    tas.area = Some(TargetGrid::global(90.0).cell_areas());
    write_variable(&path, &tas).unwrap();

    let back = read_variable(&path, "tas").unwrap();
    assert_eq!(back.unit, "K");
    assert_eq!(back.time, tas.time);
    assert_eq!(back.time_bnds, tas.time_bnds);
    assert_eq!(back.lon_bnds, tas.lon_bnds);
    assert_eq!(back.data.data(), tas.data.data());

    let area = read_variable(&path, "areacella").unwrap();
    assert_eq!(area.unit, "m2");
    assert_eq!(area.data.shape(), &[2, 4]);
}

#[test]
fn test_model_indexes_names_and_grid() {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("CLM");
    fs::create_dir_all(model_dir.join("nested")).unwrap();
    write_raw_tas(
        &model_dir.join("nested/tas_Amon_CLM.nc"),
        "days since 1850-01-01",
        "noleap",
        &[15.5],
        1e20,
    );
    let tas = monthly_tas(0, 1, 1.0);
    let mut sftlf = Variable::new(
        "sftlf",
        "%",
        MaskedArray::from_data(Array2::from_elem((2, 4), 50.0).into_dyn()),
    );
    sftlf.lat = tas.lat.clone();
    sftlf.lat_bnds = tas.lat_bnds.clone();
    sftlf.lon = tas.lon.clone();
    sftlf.lon_bnds = tas.lon_bnds.clone();
    write_variable(&model_dir.join("sftlf_fx_CLM.nc"), &sftlf).unwrap();
    fs::write(model_dir.join("notes.txt"), "ignored").unwrap();

    let model = ModelResult::new(&model_dir, "CLM", &ModelOptions::default()).unwrap();
    assert!(model.has_variable("tas"));
    assert!(model.has_variable("sftlf"));
    assert_eq!(model.names["tas"], "Near-Surface Air Temperature");

    // Cell areas come from the bounds written with sftlf.
    let areas = model.cell_areas.as_ref().unwrap();
    assert_eq!(areas.shape(), &[2, 4]);
    let fraction = model.land_fraction.as_ref().unwrap();
    assert_relative_eq!(fraction.data.max().unwrap(), 0.5);
    assert_relative_eq!(model.land_area.unwrap(), 0.5 * areas.sum(), max_relative = 1e-12);
}

#[test]
fn test_extract_combines_files_and_applies_shift() {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("m");
    fs::create_dir(&model_dir).unwrap();
    write_variable(&model_dir.join("tas_2.nc"), &monthly_tas(12, 12, 2.0)).unwrap();
    write_variable(&model_dir.join("tas_1.nc"), &monthly_tas(0, 12, 1.0)).unwrap();

    let options = ModelOptions {
        model_year: vec![1850, 1851],
        ..Default::default()
    };
    let model = ModelResult::new(&model_dir, "m", &options).unwrap();
    let tas = model
        .extract_time_series("tas", &ExtractOptions::default())
        .unwrap();
    assert_eq!(tas.ntime(), 24);
    assert_eq!(tas.time_bnds.as_ref().unwrap()[0], [365.0, 395.0]);
    assert_eq!(tas.data.get(&[0, 0, 0]), Some(1.0));
    assert_eq!(tas.data.get(&[23, 0, 0]), Some(2.0));

    // A window in shifted time selects only the second file.
    let windowed = model
        .extract_time_series(
            "tas",
            &ExtractOptions {
                initial_time: 365.0 + 12.0 * 30.0 + 1.0,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(windowed.ntime(), 12);
    assert_eq!(windowed.data.get(&[0, 0, 0]), Some(2.0));
}

#[test]
fn test_extract_falls_back_to_alternates() {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("m");
    fs::create_dir(&model_dir).unwrap();
    let mut ts = monthly_tas(0, 2, 300.0);
    ts.name = "ts".to_string();
    write_variable(&model_dir.join("ts.nc"), &ts).unwrap();

    let model = ModelResult::new(&model_dir, "m", &ModelOptions::default()).unwrap();
    let missing = model.extract_time_series("tas", &ExtractOptions::default());
    assert!(matches!(missing, Err(ref e) if e.is_not_found()));

    let found = model
        .extract_time_series(
            "tas",
            &ExtractOptions {
                alt_vars: vec!["ts".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(found.name, "tas");
    assert_eq!(found.ntime(), 2);
}

#[test]
fn test_discovery_is_repeatable() {
    let root = TempDir::new().unwrap();
    for name in ["modelB", "ModelA"] {
        let dir = root.path().join(name);
        fs::create_dir(&dir).unwrap();
        write_variable(&dir.join("tas.nc"), &monthly_tas(0, 1, 1.0)).unwrap();
    }
    let first = discover_models(root.path(), &DiscoveryOptions::default()).unwrap();
    let second = discover_models(root.path(), &DiscoveryOptions::default()).unwrap();
    let names = |models: &[ModelResult]| models.iter().map(|m| m.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&first), vec!["ModelA", "modelB"]);
    assert_eq!(names(&first), names(&second));
    assert!(first.iter().all(|m| m.has_variable("tas")));
}

#[test]
fn test_missing_root_is_io_error() {
    let root = TempDir::new().unwrap();
    let result = discover_models(&root.path().join("absent"), &DiscoveryOptions::default());
    assert!(matches!(result, Err(IlambError::Io { .. })));
}

#[test]
fn test_fill_value_in_time_axis_is_an_error_not_a_panic() {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("m");
    fs::create_dir(&model_dir).unwrap();
    let path = model_dir.join("tas_Amon.nc");
    write_raw_tas(&path, "days since 1850-01-01", "standard", &[15.5, 9.969209968386869e36], 1e20);

    assert!(matches!(read_variable(&path, "tas"), Err(IlambError::TimeUnits(_))));

    let model = ModelResult::new(&model_dir, "m", &ModelOptions::default()).unwrap();
    let result = model.extract_time_series("tas", &ExtractOptions::default());
    assert!(matches!(result, Err(ref e) if !e.is_not_found()));
}

#[test]
fn test_derived_variable_from_expression() {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("m");
    fs::create_dir(&model_dir).unwrap();
    for (name, value) in [("rsds", 300.0), ("rsus", 50.0)] {
        let mut v = monthly_tas(0, 2, value);
        v.name = name.to_string();
        v.unit = "W m-2".to_string();
        write_variable(&model_dir.join(format!("{name}.nc")), &v).unwrap();
    }
    let model = ModelResult::new(&model_dir, "m", &ModelOptions::default()).unwrap();

    let options = ExtractOptions {
        expression: Some("rsds - rsus".to_string()),
        ..Default::default()
    };
    let rsns = model.extract_time_series("rsns", &options).unwrap();
    assert_eq!(rsns.name, "rsns");
    assert_eq!(rsns.ntime(), 2);
    assert_eq!(rsns.data.shape(), &[2, 2, 4]);
    assert_eq!(rsns.data.get(&[1, 1, 3]), Some(250.0));
    assert_eq!(
        ilamb_core::units::Unit::parse(&rsns.unit).unwrap(),
        ilamb_core::units::Unit::parse("W m-2").unwrap()
    );

    // An operand the model lacks leaves the variable missing.
    let options = ExtractOptions {
        expression: Some("rsds - rlus".to_string()),
        ..Default::default()
    };
    let missing = model.extract_time_series("rsns", &options);
    assert!(matches!(missing, Err(ref e) if e.is_not_found()));
}

#[test]
fn test_extract_at_sites() {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("m");
    fs::create_dir(&model_dir).unwrap();
    let mut tas = monthly_tas(0, 2, 0.0);
    tas.data = MaskedArray::from_data(
        Array3::from_shape_fn((2, 2, 4), |(t, i, j)| (100 * t + 10 * i + j) as f64).into_dyn(),
    );
    write_variable(&model_dir.join("tas.nc"), &tas).unwrap();
    let model = ModelResult::new(&model_dir, "m", &ModelOptions::default()).unwrap();

    let options = ExtractOptions {
        lats: Some(vec![50.0, -40.0]),
        lons: Some(vec![140.0, -130.0]),
        ..Default::default()
    };
    let sites = model.extract_time_series("tas", &options).unwrap();
    assert_eq!(sites.ndata, Some(2));
    assert_eq!(sites.data.shape(), &[2, 2]);
    assert_eq!(sites.data.get(&[0, 0]), Some(13.0));
    assert_eq!(sites.data.get(&[1, 1]), Some(100.0));
    assert!(sites.area.is_none());

    let unpaired = ExtractOptions {
        lats: Some(vec![50.0]),
        ..Default::default()
    };
    assert!(model.extract_time_series("tas", &unpaired).is_err());
}
