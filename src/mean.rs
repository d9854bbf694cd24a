//! Multi-model means.
//!
//! Two modes:
//!
//! * same-grid: every model is already on one grid, so the mean is the
//!   plain elementwise average of the raw arrays;
//! * general: every model is interpolated onto a global grid at a chosen
//!   resolution and a monthly historical time axis, and each cell averages
//!   only the models with data there.

use std::path::{Path, PathBuf};

use ilamb_core::grid::{TargetGrid, TimeAxis};
use ilamb_core::netcdf_io::write_variable;
use ilamb_core::model::{CELL_AREA_VARIABLE, LAND_FRACTION_VARIABLE};
use ilamb_core::{ExtractOptions, IlambError, IlambResult, MaskedArray, ModelResult, Variable};
use log::{debug, info, warn};
use ndarray::{ArrayD, IxDyn, Zip};

/// Fixed fields that some models store with a single time step.
pub const STATIC_VARIABLES: [&str; 4] = ["sftlf", "areacella", "orog", "sftgif"];

/// Variables averaged when none are requested.
pub const DEFAULT_VARIABLES: [&str; 20] = [
    "gpp", "ra", "rh", "nbp", "lai", "cSoil", "cVeg", "burntArea", "hfls", "hfss", "rsus",
    "rlus", "rsds", "rlds", "pr", "tas", "mrro", "mrsos", "snw", "evspsbl",
];

pub fn is_static(variable: &str) -> bool {
    STATIC_VARIABLES.contains(&variable)
}

/// Running per-cell sum and count of contributing models.
#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    sum: ArrayD<f64>,
    count: ArrayD<u32>,
}

impl MeanAccumulator {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            sum: ArrayD::zeros(IxDyn(shape)),
            count: ArrayD::zeros(IxDyn(shape)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.sum.shape()
    }

    pub fn count(&self) -> &ArrayD<u32> {
        &self.count
    }

    /// Adds the unmasked values of `values`.
    ///
    /// `values` must have the accumulator's shape, or that shape without a
    /// leading axis of length one.
    pub fn add(&mut self, values: &MaskedArray) -> IlambResult<()> {
        let shape = self.sum.shape();
        let matches = values.shape() == shape || (shape[0] == 1 && values.shape() == &shape[1..]);
        if !matches {
            return Err(IlambError::Error(format!(
                "cannot accumulate shape {:?} into {:?}",
                values.shape(),
                shape
            )));
        }
        let incoming = values.data().iter().zip(values.mask().iter());
        for ((sum, count), (value, masked)) in self.sum.iter_mut().zip(self.count.iter_mut()).zip(incoming) {
            if !masked {
                *sum += value;
                *count += 1;
            }
        }
        Ok(())
    }

    /// True once any cell has received a value.
    pub fn contributed(&self) -> bool {
        self.count.iter().any(|c| *c > 0)
    }

    /// `sum / count`, masked where nothing contributed.
    pub fn finish(self) -> MaskedArray {
        let data = Zip::from(&self.sum)
            .and(&self.count)
            .map_collect(|&s, &c| s / f64::from(c.max(1)));
        let mask = self.count.mapv(|c| c == 0);
        MaskedArray::new(data, mask)
    }
}

fn fetch(model: &ModelResult, variable: &str) -> Option<Variable> {
    match model.extract_time_series(variable, &ExtractOptions::default()) {
        Ok(series) => Some(series),
        Err(e) if e.is_not_found() => {
            debug!("[{}] {e}", model.name);
            None
        }
        Err(e) => {
            warn!("[{}] could not read {variable}: {e}", model.name);
            None
        }
    }
}

/// Mean of `variable` over models that share one grid.
///
/// Returns `None` when no model provides the variable.
///
/// # Errors
///
/// [`IlambError::GridMismatch`] when a model's axes differ from those of
/// the first model providing the variable.
pub fn same_grid_mean(models: &[ModelResult], variable: &str) -> IlambResult<Option<Variable>> {
    // reference series, running sum, union of masks
    let mut state: Option<(Variable, ArrayD<f64>, ArrayD<bool>)> = None;
    let mut fetched = 0u32;

    for model in models {
        let Some(mut series) = fetch(model, variable) else {
            continue;
        };
        fetched += 1;
        series.area = model.cell_areas.clone();
        let Some((reference, sum, mask)) = state.as_mut() else {
            let sum = series.data.data().clone();
            let mask = series.data.mask().clone();
            state = Some((series, sum, mask));
            continue;
        };
        series
            .check_same_grid(reference)
            .map_err(|axis| IlambError::GridMismatch {
                model: model.name.clone(),
                axis: axis.to_string(),
            })?;
        *sum += series.data.data();
        Zip::from(mask)
            .and(series.data.mask())
            .for_each(|m, &other| *m |= other);
    }

    let Some((mut mean, mut sum, mask)) = state else {
        return Ok(None);
    };
    sum.mapv_inplace(|s| s / f64::from(fetched));
    mean.data = MaskedArray::new(sum, mask);
    debug!("{variable}: averaged {fetched} models on a shared grid");
    Ok(Some(mean))
}

/// Target grid and time axis for the general mode.
#[derive(Debug, Clone)]
pub struct Regridder {
    pub time: TimeAxis,
    pub grid: TargetGrid,
}

impl Regridder {
    /// Global grid at `res` degrees over the historical monthly axis.
    pub fn new(res: f64) -> Self {
        Self {
            time: TimeAxis::historical_monthly(),
            grid: TargetGrid::global(res),
        }
    }

    /// Mean of `variable` on the target grid.
    ///
    /// The first accepted model fixes the unit and whether the mean has a
    /// time axis; later models disagreeing on the latter end the variable.
    /// Returns `None` when no model contributed a single value.
    ///
    /// # Errors
    ///
    /// [`IlambError::Units`] when a model's unit cannot be converted into the
    /// unit of the first accepted model.
    pub fn mean(&self, models: &[ModelResult], variable: &str) -> IlambResult<Option<Variable>> {
        let listed_static = is_static(variable);
        let (nlat, nlon) = self.grid.shape();
        let mut state: Option<Accumulation> = None;

        for model in models {
            let series = match (fetch(model, variable), &model.land_fraction) {
                (Some(series), _) => series,
                (None, Some(fraction)) if variable == LAND_FRACTION_VARIABLE => {
                    debug!("[{}] using the land fraction from grid information", model.name);
                    fraction.clone()
                }
                (None, _) => continue,
            };
            let mut series = as_static_if_single_step(series, listed_static);

            let rejection = series.unsupported_reason().or_else(|| {
                let temporal = state.as_ref()?.temporal;
                (series.temporal() != temporal).then(|| {
                    if temporal {
                        "no time axis for a time-varying variable".to_string()
                    } else {
                        "time-varying data for a static variable".to_string()
                    }
                })
            });
            if let Some(reason) = rejection {
                warn!("[{}] skipping {variable} for this and remaining models: {reason}", model.name);
                break;
            }

            let acc = state.get_or_insert_with(|| {
                let nt = if series.temporal() { self.time.len() } else { 1 };
                Accumulation {
                    unit: series.unit.clone(),
                    temporal: series.temporal(),
                    sum: MeanAccumulator::new(&[nt, nlat, nlon]),
                }
            });
            if series.unit != acc.unit {
                series.convert(&acc.unit)?;
            }

            let time = acc.temporal.then_some(&self.time);
            let regridded = series.interpolate(time, &self.grid)?;
            acc.sum.add(&regridded.data)?;
        }

        let Some(acc) = state.filter(|acc| acc.sum.contributed()) else {
            return Ok(None);
        };
        let mut data = acc.sum.finish();
        if !acc.temporal {
            data = data.squeeze_leading();
        }
        let mut mean = Variable::new(variable, &acc.unit, data);
        if acc.temporal {
            mean.time = Some(self.time.values.clone());
            mean.time_bnds = Some(self.time.bounds.clone());
        }
        mean.lat = Some(self.grid.lat.clone());
        mean.lat_bnds = Some(self.grid.lat_bnds.clone());
        mean.lon = Some(self.grid.lon.clone());
        mean.lon_bnds = Some(self.grid.lon_bnds.clone());
        mean.area = Some(self.grid.cell_areas());
        Ok(Some(mean))
    }
}

/// Unit, time presence and running sum fixed by the first accepted model.
struct Accumulation {
    unit: String,
    temporal: bool,
    sum: MeanAccumulator,
}

/// Static fields are sometimes stored with a single time step.
fn as_static_if_single_step(mut series: Variable, static_variable: bool) -> Variable {
    if static_variable && series.ntime() == 1 {
        series.data = series.data.squeeze_leading();
        series.time = None;
        series.time_bnds = None;
    }
    series
}

/// Path of the mean file for `variable`.
pub fn output_path(output_dir: &Path, variable: &str) -> PathBuf {
    output_dir.join(format!("{variable}_mean.nc"))
}

/// Writes `mean` to `<output_dir>/<name>_mean.nc`.
pub fn write_mean(output_dir: &Path, mean: &Variable) -> IlambResult<PathBuf> {
    let path = output_path(output_dir, &mean.name);
    write_variable(&path, mean)?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Writes the cell areas of a same-grid mean to `areacella_mean.nc`.
pub fn write_cell_areas(output_dir: &Path, mean: &Variable) -> IlambResult<Option<PathBuf>> {
    let Some(area) = &mean.area else {
        return Ok(None);
    };
    let mut areas = Variable::new(CELL_AREA_VARIABLE, "m2", area.clone());
    areas.lat = mean.lat.clone();
    areas.lat_bnds = mean.lat_bnds.clone();
    areas.lon = mean.lon.clone();
    areas.lon_bnds = mean.lon_bnds.clone();
    write_mean(output_dir, &areas).map(Some)
}

/// How models are brought onto a common grid.
#[derive(Debug, Clone)]
pub enum MeanMode {
    SameGrid,
    Regrid(Regridder),
}

/// Computes and writes the mean of each of `variables`, returning the files
/// written. `progress` is called with each variable before it is processed.
pub fn compute_means(
    models: &[ModelResult],
    variables: &[String],
    output_dir: &Path,
    mode: &MeanMode,
    mut progress: impl FnMut(&str),
) -> IlambResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    let mut areas_written = false;
    for variable in variables {
        progress(variable);
        match mode {
            MeanMode::SameGrid => {
                let Some(mean) = same_grid_mean(models, variable)? else {
                    debug!("{variable}: no model provides it, nothing written");
                    continue;
                };
                written.push(write_mean(output_dir, &mean)?);
                if !areas_written {
                    let areas = write_cell_areas(output_dir, &mean)?;
                    areas_written = areas.is_some();
                    written.extend(areas);
                }
            }
            MeanMode::Regrid(regridder) => {
                let Some(mean) = regridder.mean(models, variable)? else {
                    debug!("{variable}: no contributions, nothing written");
                    continue;
                };
                written.push(write_mean(output_dir, &mean)?);
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_accumulator_counts_unmasked_contributions() {
        let mut acc = MeanAccumulator::new(&[1, 1, 3]);
        assert!(!acc.contributed());
        let a = MaskedArray::from_data(arr2(&[[10.0, 1e20, 4.0]]).into_dyn());
        let b = MaskedArray::from_data(arr2(&[[20.0, 1e20, 1e20]]).into_dyn());
        acc.add(&a).unwrap();
        acc.add(&b).unwrap();
        assert_eq!(acc.count().iter().copied().collect::<Vec<_>>(), vec![2, 0, 1]);

        let mean = acc.finish();
        assert_eq!(mean.get(&[0, 0, 0]), Some(15.0));
        assert_eq!(mean.get(&[0, 0, 1]), None);
        assert_eq!(mean.get(&[0, 0, 2]), Some(4.0));
    }

    #[test]
    fn test_accumulator_rejects_other_shapes() {
        let mut acc = MeanAccumulator::new(&[2, 2, 2]);
        assert!(acc.add(&MaskedArray::zeros(&[2, 2])).is_err());
        assert!(acc.add(&MaskedArray::zeros(&[2, 2, 2])).is_ok());
    }

    #[test]
    fn test_static_variables() {
        assert!(is_static("sftlf"));
        assert!(is_static("orog"));
        assert!(!is_static("tas"));
    }

    #[test]
    fn test_single_step_static_field_drops_time() {
        let mut v = Variable::new("orog", "m", MaskedArray::zeros(&[1, 2, 3]));
        v.time = Some(vec![15.5]);
        v.time_bnds = Some(vec![[0.0, 31.0]]);
        let v = as_static_if_single_step(v, true);
        assert!(!v.temporal());
        assert_eq!(v.data.shape(), &[2, 3]);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(output_path(Path::new("out"), "tas"), Path::new("out/tas_mean.nc"));
    }
}
