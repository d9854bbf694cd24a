//! Reading and writing CF-style NetCDF files.
//!
//! Axes are recognised by dimension name. Time axes are converted to days
//! since 1850-01-01 on the noleap calendar as they are read, and written
//! back out in the same convention.

use std::path::Path;

use log::debug;
use ndarray::{ArrayD, Axis, IxDyn};
use netcdf::AttributeValue;

use crate::calendar::{bounds_from_midpoints, TimeUnits, TIME_CALENDAR, TIME_UNITS};
use crate::errors::{IlambError, IlambResult};
use crate::masked::{MaskedArray, FILL_VALUE};
use crate::variable::Variable;

const TIME_NAMES: [&str; 2] = ["time", "t"];
const LAT_NAMES: [&str; 2] = ["lat", "latitude"];
const LON_NAMES: [&str; 2] = ["lon", "longitude"];
const DEPTH_NAMES: [&str; 9] = [
    "depth", "lev", "level", "plev", "layer", "sdepth", "olevel", "alt", "height",
];
const SITE_NAMES: [&str; 4] = ["data", "ndata", "site", "sites"];

/// Name of the bounds dimension in written files.
const BOUNDS_DIM: &str = "nb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisKind {
    Time,
    Depth,
    Lat,
    Lon,
    Site,
    Other,
}

fn classify(name: &str) -> AxisKind {
    let lower = name.to_ascii_lowercase();
    let is = |names: &[&str]| names.contains(&lower.as_str());
    if is(&TIME_NAMES) {
        AxisKind::Time
    } else if is(&LAT_NAMES) {
        AxisKind::Lat
    } else if is(&LON_NAMES) {
        AxisKind::Lon
    } else if is(&DEPTH_NAMES) {
        AxisKind::Depth
    } else if is(&SITE_NAMES) {
        AxisKind::Site
    } else {
        AxisKind::Other
    }
}

fn attribute_string(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)? {
        Ok(AttributeValue::Str(s)) => Some(s),
        Ok(AttributeValue::Strs(mut s)) if !s.is_empty() => Some(s.swap_remove(0)),
        _ => None,
    }
}

fn attribute_f64s(var: &netcdf::Variable, name: &str) -> Vec<f64> {
    match var.attribute_value(name) {
        Some(Ok(value)) => match value {
            AttributeValue::Double(v) => vec![v],
            AttributeValue::Doubles(v) => v,
            AttributeValue::Float(v) => vec![f64::from(v)],
            AttributeValue::Floats(v) => v.into_iter().map(f64::from).collect(),
            AttributeValue::Int(v) => vec![f64::from(v)],
            AttributeValue::Ints(v) => v.into_iter().map(f64::from).collect(),
            AttributeValue::Short(v) => vec![f64::from(v)],
            AttributeValue::Shorts(v) => v.into_iter().map(f64::from).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Variable names in a file, each paired with its `long_name` or else its
/// `standard_name`.
pub fn list_variables(path: &Path) -> IlambResult<Vec<(String, Option<String>)>> {
    let file = netcdf::open(path).map_err(|e| IlambError::netcdf(path, e))?;
    Ok(file
        .variables()
        .map(|var| {
            let description = attribute_string(&var, "long_name")
                .or_else(|| attribute_string(&var, "standard_name"));
            (var.name(), description)
        })
        .collect())
}

/// Reads a plain array variable such as `lat_bnds` or `areacella`.
pub fn read_array(path: &Path, name: &str) -> IlambResult<MaskedArray> {
    let file = netcdf::open(path).map_err(|e| IlambError::netcdf(path, e))?;
    let var = file.variable(name).ok_or_else(|| IlambError::VarNotInModel {
        model: path.display().to_string(),
        variable: name.to_string(),
    })?;
    read_masked(path, &var)
}

fn read_masked(path: &Path, var: &netcdf::Variable) -> IlambResult<MaskedArray> {
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let values: Vec<f64> = var
        .get_values::<f64, _>(..)
        .map_err(|e| IlambError::netcdf(path, e))?;
    let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| IlambError::Error(format!("{}: {e}", var.name())))?;

    let mut fill_values = attribute_f64s(var, "_FillValue");
    fill_values.extend(attribute_f64s(var, "missing_value"));
    let mut masked = MaskedArray::from_data_with_fill(data, &fill_values);

    let scale = attribute_f64s(var, "scale_factor").first().copied().unwrap_or(1.0);
    let offset = attribute_f64s(var, "add_offset").first().copied().unwrap_or(0.0);
    if scale != 1.0 || offset != 0.0 {
        masked.map_inplace(|v| v * scale + offset);
    }
    Ok(masked)
}

fn read_coordinate(file: &netcdf::File, path: &Path, name: &str) -> IlambResult<Option<Vec<f64>>> {
    match file.variable(name) {
        Some(var) => var
            .get_values::<f64, _>(..)
            .map(Some)
            .map_err(|e| IlambError::netcdf(path, e)),
        None => Ok(None),
    }
}

/// Bounds of coordinate `dim`, named by its `bounds` attribute or by the
/// `<dim>_bnds` / `<dim>_bounds` conventions.
fn read_bounds(file: &netcdf::File, path: &Path, dim: &str) -> IlambResult<Option<Vec<[f64; 2]>>> {
    let attribute = file
        .variable(dim)
        .and_then(|var| attribute_string(&var, "bounds"));
    let candidates = attribute
        .into_iter()
        .chain([format!("{dim}_bnds"), format!("{dim}_bounds")]);
    for name in candidates {
        if let Some(values) = read_coordinate(file, path, &name)? {
            if values.len() % 2 != 0 {
                continue;
            }
            return Ok(Some(values.chunks_exact(2).map(|c| [c[0], c[1]]).collect()));
        }
    }
    Ok(None)
}

/// Reads `name` from `path` with its axes, converting time to model days.
pub fn read_variable(path: &Path, name: &str) -> IlambResult<Variable> {
    let file = netcdf::open(path).map_err(|e| IlambError::netcdf(path, e))?;
    let var = file.variable(name).ok_or_else(|| IlambError::VarNotInModel {
        model: path.display().to_string(),
        variable: name.to_string(),
    })?;

    let unit = attribute_string(&var, "units").unwrap_or_else(|| "1".to_string());
    let mut data = read_masked(path, &var)?;
    let mut out = Variable::new(name, unit.trim(), MaskedArray::zeros(&[0]));

    let dims: Vec<(String, usize)> = var
        .dimensions()
        .iter()
        .map(|d| (d.name(), d.len()))
        .collect();

    // Unrecognised dimensions of length one carry no information.
    let mut squeeze = Vec::new();
    for (axis, (dim, len)) in dims.iter().enumerate() {
        match classify(dim) {
            AxisKind::Time => {
                let values = read_coordinate(&file, path, dim)?
                    .unwrap_or_else(|| (0..*len).map(|i| i as f64).collect());
                let coordinate = file.variable(dim);
                let units = coordinate
                    .as_ref()
                    .and_then(|c| attribute_string(c, "units"))
                    .ok_or_else(|| IlambError::TimeUnits(String::new()))?;
                let calendar = coordinate.as_ref().and_then(|c| attribute_string(c, "calendar"));
                let time_units = TimeUnits::parse(&units, calendar.as_deref())?;

                let time = values
                    .iter()
                    .map(|t| time_units.to_model_days(*t))
                    .collect::<IlambResult<Vec<f64>>>()?;
                let bounds = match read_bounds(&file, path, dim)? {
                    Some(b) if b.len() == time.len() => b
                        .iter()
                        .map(|b| Ok([time_units.to_model_days(b[0])?, time_units.to_model_days(b[1])?]))
                        .collect::<IlambResult<Vec<[f64; 2]>>>()?,
                    _ => bounds_from_midpoints(&time),
                };
                out.time = Some(time);
                out.time_bnds = Some(bounds);
            }
            AxisKind::Lat => {
                out.lat = read_coordinate(&file, path, dim)?;
                out.lat_bnds = read_bounds(&file, path, dim)?;
            }
            AxisKind::Lon => {
                out.lon = read_coordinate(&file, path, dim)?;
                out.lon_bnds = read_bounds(&file, path, dim)?;
            }
            AxisKind::Depth => {
                out.depth = Some(
                    read_coordinate(&file, path, dim)?
                        .unwrap_or_else(|| (0..*len).map(|i| i as f64).collect()),
                );
            }
            AxisKind::Site => out.ndata = Some(*len),
            AxisKind::Other if *len == 1 => squeeze.push(axis),
            AxisKind::Other => debug!("{name} in {} has unrecognised dimension {dim}", path.display()),
        }
    }

    if !squeeze.is_empty() {
        let (mut values, mut mask) = data.into_parts();
        for axis in squeeze.into_iter().rev() {
            values = values.index_axis_move(Axis(axis), 0);
            mask = mask.index_axis_move(Axis(axis), 0);
        }
        data = MaskedArray::new(values, mask);
    }
    out.data = data;
    Ok(out)
}

fn nc_error(path: &Path) -> impl Fn(netcdf::Error) -> IlambError + '_ {
    move |e| IlambError::netcdf(path, e)
}

fn put_axis(
    file: &mut netcdf::FileMut,
    path: &Path,
    dim: &str,
    values: &[f64],
    bounds: Option<&[[f64; 2]]>,
    attributes: &[(&str, &str)],
) -> IlambResult<()> {
    let nc = nc_error(path);
    file.add_dimension(dim, values.len()).map_err(&nc)?;
    let bounds_name = format!("{dim}_bnds");
    {
        let mut var = file.add_variable::<f64>(dim, &[dim]).map_err(&nc)?;
        for (key, value) in attributes {
            var.put_attribute(key, *value).map_err(&nc)?;
        }
        if bounds.is_some() {
            var.put_attribute("bounds", bounds_name.as_str()).map_err(&nc)?;
        }
        var.put_values(values, ..).map_err(&nc)?;
    }
    if let Some(bounds) = bounds {
        let flat: Vec<f64> = bounds.iter().flat_map(|b| b.iter().copied()).collect();
        let mut var = file
            .add_variable::<f64>(&bounds_name, &[dim, BOUNDS_DIM])
            .map_err(&nc)?;
        var.put_values(&flat, ..).map_err(&nc)?;
    }
    Ok(())
}

fn put_field(
    file: &mut netcdf::FileMut,
    path: &Path,
    name: &str,
    unit: &str,
    dims: &[&str],
    data: &MaskedArray,
) -> IlambResult<()> {
    let nc = nc_error(path);
    let values: Vec<f64> = data.filled(FILL_VALUE).iter().copied().collect();
    let mut var = file.add_variable::<f64>(name, dims).map_err(&nc)?;
    var.put_attribute("_FillValue", FILL_VALUE).map_err(&nc)?;
    var.put_attribute("units", unit).map_err(&nc)?;
    var.put_values(&values, ..).map_err(&nc)?;
    Ok(())
}

/// Writes `variable` to a new file at `path`.
///
/// Coordinates and bounds are written for whichever axes the variable has.
/// Cell areas, when present, are written alongside as `areacella` in m2.
pub fn write_variable(path: &Path, variable: &Variable) -> IlambResult<()> {
    let nc = nc_error(path);
    let mut file = netcdf::create(path).map_err(&nc)?;
    file.add_dimension(BOUNDS_DIM, 2).map_err(&nc)?;

    let mut dims = Vec::new();
    if let Some(time) = &variable.time {
        put_axis(
            &mut file,
            path,
            "time",
            time,
            variable.time_bnds.as_deref(),
            &[("units", TIME_UNITS), ("calendar", TIME_CALENDAR)],
        )?;
        dims.push("time");
    }
    if let Some(depth) = &variable.depth {
        put_axis(&mut file, path, "depth", depth, None, &[])?;
        dims.push("depth");
    }
    let mut spatial = Vec::new();
    if let Some(lat) = &variable.lat {
        put_axis(
            &mut file,
            path,
            "lat",
            lat,
            variable.lat_bnds.as_deref(),
            &[("units", "degrees_north")],
        )?;
        spatial.push("lat");
    }
    if let Some(lon) = &variable.lon {
        put_axis(
            &mut file,
            path,
            "lon",
            lon,
            variable.lon_bnds.as_deref(),
            &[("units", "degrees_east")],
        )?;
        spatial.push("lon");
    }
    if let Some(n) = variable.ndata {
        file.add_dimension("ndata", n).map_err(&nc)?;
        spatial = vec!["ndata"];
    }
    dims.extend(spatial.iter().copied());

    if dims.len() != variable.data.ndim() {
        return Err(IlambError::UnsupportedShape {
            variable: variable.name.clone(),
            reason: format!(
                "{} data dimensions but {} known axes",
                variable.data.ndim(),
                dims.len()
            ),
        });
    }
    put_field(&mut file, path, &variable.name, &variable.unit, &dims, &variable.data)?;

    if let Some(area) = &variable.area {
        if variable.name != "areacella" && spatial == ["lat", "lon"] && area.ndim() == 2 {
            put_field(&mut file, path, "areacella", "m2", &spatial, area)?;
        }
    }
    debug!("Wrote {} to {}", variable.name, path.display());
    Ok(())
}
