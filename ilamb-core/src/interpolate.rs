//! Nearest-neighbour interpolation onto a target grid.
//!
//! Each target cell takes the value of the closest source cell in latitude
//! and (wrapped) longitude. Target cells outside the extent of the source
//! grid are masked rather than extrapolated. In time, a target step takes
//! the source step whose bounds contain it.

use ndarray::{ArrayD, Axis, Dimension, IxDyn};

use crate::errors::{IlambError, IlambResult};
use crate::grid::{TargetGrid, TimeAxis};
use crate::masked::MaskedArray;
use crate::variable::Variable;

/// Slack applied to extent checks, in degrees or days.
const EXTENT_TOLERANCE: f64 = 1e-6;

impl Variable {
    /// Puts this variable onto `grid`, and onto `time` when given.
    ///
    /// The result has shape `(nt, nlat, nlon)` when `time` is given and
    /// `(nlat, nlon)` otherwise. Cell areas of the result are those of the
    /// target grid.
    ///
    /// # Errors
    ///
    /// Fails for variables that are not plain lat/lon fields, and when the
    /// time presence of the variable disagrees with `time`.
    pub fn interpolate(&self, time: Option<&TimeAxis>, grid: &TargetGrid) -> IlambResult<Variable> {
        if let Some(reason) = self.unsupported_reason() {
            return Err(IlambError::UnsupportedShape {
                variable: self.name.clone(),
                reason,
            });
        }
        let unsupported = |reason: &str| IlambError::UnsupportedShape {
            variable: self.name.clone(),
            reason: reason.to_string(),
        };

        let (Some(src_lat), Some(src_lon)) = (self.lat.as_deref(), self.lon.as_deref()) else {
            return Err(unsupported("missing lat/lon coordinates"));
        };

        let lat_index = lat_indices(src_lat, self.lat_bnds.as_deref(), &grid.lat);
        let lon_index = lon_indices(src_lon, self.lon_bnds.as_deref(), &grid.lon);
        let (nlat, nlon) = grid.shape();
        let source = self.data.data();
        let source_mask = self.data.mask();

        let (data, mask) = match (time, &self.time_bnds) {
            (Some(axis), Some(src_bnds)) => {
                let time_index = time_indices(src_bnds, &axis.values);
                let shape = [axis.len(), nlat, nlon];
                let mut data = ArrayD::from_elem(IxDyn(&shape), 0.0);
                let mut mask = ArrayD::from_elem(IxDyn(&shape), true);
                for (t, ti) in time_index.iter().enumerate() {
                    let Some(ti) = *ti else { continue };
                    for (i, li) in lat_index.iter().enumerate() {
                        let Some(li) = *li else { continue };
                        for (j, lj) in lon_index.iter().enumerate() {
                            let Some(lj) = *lj else { continue };
                            let src = [ti, li, lj];
                            if !source_mask[&src[..]] {
                                data[[t, i, j]] = source[&src[..]];
                                mask[[t, i, j]] = false;
                            }
                        }
                    }
                }
                (data, mask)
            }
            (None, None) if self.data.ndim() == 2 => {
                let shape = [nlat, nlon];
                let mut data = ArrayD::from_elem(IxDyn(&shape), 0.0);
                let mut mask = ArrayD::from_elem(IxDyn(&shape), true);
                for (i, li) in lat_index.iter().enumerate() {
                    let Some(li) = *li else { continue };
                    for (j, lj) in lon_index.iter().enumerate() {
                        let Some(lj) = *lj else { continue };
                        let src = [li, lj];
                        if !source_mask[&src[..]] {
                            data[[i, j]] = source[&src[..]];
                            mask[[i, j]] = false;
                        }
                    }
                }
                (data, mask)
            }
            (Some(_), None) => return Err(unsupported("static variable on a time axis")),
            _ => return Err(unsupported("time-varying variable without a target time axis")),
        };

        let mut out = Variable::new(&self.name, &self.unit, MaskedArray::new(data, mask));
        if let Some(axis) = time {
            out.time = Some(axis.values.clone());
            out.time_bnds = Some(axis.bounds.clone());
        }
        out.lat = Some(grid.lat.clone());
        out.lat_bnds = Some(grid.lat_bnds.clone());
        out.lon = Some(grid.lon.clone());
        out.lon_bnds = Some(grid.lon_bnds.clone());
        out.area = Some(grid.cell_areas());
        Ok(out)
    }
}

impl Variable {
    /// Values of a lat/lon field at the cells nearest to each site.
    ///
    /// The result is site data of shape `(time?, depth?, nsites)` located at
    /// the requested coordinates.
    ///
    /// # Errors
    ///
    /// Fails for variables that are not on a lat/lon grid.
    pub fn extract_sites(&self, lats: &[f64], lons: &[f64]) -> IlambResult<Variable> {
        let (Some(src_lat), Some(src_lon)) = (self.lat.as_deref(), self.lon.as_deref()) else {
            return Err(IlambError::UnsupportedShape {
                variable: self.name.clone(),
                reason: "site extraction needs lat/lon coordinates".into(),
            });
        };
        if !self.spatial() || self.data.ndim() < 2 {
            return Err(IlambError::UnsupportedShape {
                variable: self.name.clone(),
                reason: "site extraction needs a lat/lon grid".into(),
            });
        }

        let cells: Vec<(usize, usize)> = lats
            .iter()
            .zip(lons)
            .filter_map(|(&y, &x)| {
                let i = nearest(src_lat, |c| (c - y).abs())?;
                let j = nearest(src_lon, |c| lon_distance(c, x))?;
                Some((i, j))
            })
            .collect();

        let ndim = self.data.ndim();
        let mut shape = self.data.shape()[..ndim - 2].to_vec();
        shape.push(cells.len());
        let source_index = |idx: &IxDyn| {
            let idx = idx.slice();
            let (i, j) = cells[idx[ndim - 2]];
            let mut src = idx[..ndim - 2].to_vec();
            src.extend([i, j]);
            src
        };
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |idx| self.data.data()[&source_index(&idx)[..]]);
        let mask = ArrayD::from_shape_fn(IxDyn(&shape), |idx| self.data.mask()[&source_index(&idx)[..]]);

        let mut out = Variable::new(&self.name, &self.unit, MaskedArray::new(data, mask));
        out.time = self.time.clone();
        out.time_bnds = self.time_bnds.clone();
        out.depth = self.depth.clone();
        out.lat = Some(lats.to_vec());
        out.lon = Some(lons.to_vec());
        out.ndata = Some(cells.len());
        Ok(out)
    }

    /// The sites of site data lying within `epsilon` degrees of a requested
    /// location, in request order; `None` when no site is close enough.
    pub fn select_sites(&self, lats: &[f64], lons: &[f64], epsilon: f64) -> Option<Variable> {
        let (src_lat, src_lon) = (self.lat.as_deref()?, self.lon.as_deref()?);
        self.ndata?;
        let indices: Vec<usize> = lats
            .iter()
            .zip(lons)
            .filter_map(|(&y, &x)| {
                src_lat
                    .iter()
                    .zip(src_lon)
                    .map(|(&a, &b)| ((a - y).powi(2) + (b - x).powi(2)).sqrt())
                    .enumerate()
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .filter(|(_, r)| *r < epsilon)
                    .map(|(k, _)| k)
            })
            .collect();
        if indices.is_empty() {
            return None;
        }

        let site_axis = Axis(self.data.ndim() - 1);
        let data = self.data.data().select(site_axis, &indices);
        let mask = self.data.mask().select(site_axis, &indices);
        let mut out = self.clone();
        out.data = MaskedArray::new(data, mask);
        out.lat = Some(indices.iter().map(|&k| src_lat[k]).collect());
        out.lon = Some(indices.iter().map(|&k| src_lon[k]).collect());
        out.ndata = Some(indices.len());
        Some(out)
    }
}

/// Lower and upper edge of an axis, from its bounds or else half a step
/// beyond the outermost centres.
fn axis_extent(centres: &[f64], bounds: Option<&[[f64; 2]]>) -> (f64, f64) {
    if let Some(bounds) = bounds.filter(|b| !b.is_empty()) {
        let lo = bounds.iter().flat_map(|b| b.iter().copied()).fold(f64::MAX, f64::min);
        let hi = bounds.iter().flat_map(|b| b.iter().copied()).fold(f64::MIN, f64::max);
        return (lo, hi);
    }
    let lo = centres.iter().copied().fold(f64::MAX, f64::min);
    let hi = centres.iter().copied().fold(f64::MIN, f64::max);
    let half_step = if centres.len() > 1 {
        0.5 * (hi - lo) / (centres.len() - 1) as f64
    } else {
        0.5
    };
    (lo - half_step, hi + half_step)
}

fn nearest(centres: &[f64], distance: impl Fn(f64) -> f64) -> Option<usize> {
    centres
        .iter()
        .enumerate()
        .map(|(k, c)| (k, distance(*c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(k, _)| k)
}

pub(crate) fn lat_indices(
    centres: &[f64],
    bounds: Option<&[[f64; 2]]>,
    targets: &[f64],
) -> Vec<Option<usize>> {
    let (lo, hi) = axis_extent(centres, bounds);
    targets
        .iter()
        .map(|&y| {
            if y < lo - EXTENT_TOLERANCE || y > hi + EXTENT_TOLERANCE {
                None
            } else {
                nearest(centres, |c| (c - y).abs())
            }
        })
        .collect()
}

/// Longitude in [-180, 180).
pub(crate) fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

fn lon_distance(a: f64, b: f64) -> f64 {
    let d = (wrap_longitude(a) - wrap_longitude(b)).abs();
    d.min(360.0 - d)
}

pub(crate) fn lon_indices(
    centres: &[f64],
    bounds: Option<&[[f64; 2]]>,
    targets: &[f64],
) -> Vec<Option<usize>> {
    let (lo, hi) = axis_extent(centres, bounds);
    let global = hi - lo >= 360.0 - EXTENT_TOLERANCE;
    let inside = |x: f64| {
        global
            || [x - 360.0, x, x + 360.0]
                .iter()
                .any(|&v| v >= lo - EXTENT_TOLERANCE && v <= hi + EXTENT_TOLERANCE)
    };
    targets
        .iter()
        .map(|&x| {
            if inside(x) {
                nearest(centres, |c| lon_distance(c, x))
            } else {
                None
            }
        })
        .collect()
}

/// For each target time, the source step whose bounds contain it.
pub(crate) fn time_indices(bounds: &[[f64; 2]], targets: &[f64]) -> Vec<Option<usize>> {
    let mut order: Vec<usize> = (0..bounds.len()).collect();
    order.sort_by(|&a, &b| bounds[a][0].total_cmp(&bounds[b][0]));
    targets
        .iter()
        .map(|&t| {
            let after = order.partition_point(|&k| bounds[k][0] <= t);
            let k = *order.get(after.checked_sub(1)?)?;
            (t <= bounds[k][1]).then_some(k)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn static_field(lat: Vec<f64>, lon: Vec<f64>) -> Variable {
        let data = Array2::from_shape_fn((lat.len(), lon.len()), |(i, j)| (10 * i + j) as f64);
        let mut v = Variable::new("orog", "m", MaskedArray::from_data(data.into_dyn()));
        v.lat = Some(lat);
        v.lon = Some(lon);
        v
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(190.0), -170.0);
        assert_eq!(wrap_longitude(-180.0), -180.0);
        assert_eq!(wrap_longitude(180.0), -180.0);
        assert_eq!(wrap_longitude(359.5), -0.5);
    }

    #[test]
    fn test_nearest_wraps_across_dateline() {
        // Source on 0..360 with cells centred at 0, 90, 180, 270.
        let idx = lon_indices(&[0.0, 90.0, 180.0, 270.0], None, &[-179.5, -91.0, 44.0]);
        assert_eq!(idx, vec![Some(2), Some(3), Some(0)]);
    }

    #[test]
    fn test_targets_outside_regional_source_are_masked() {
        let idx = lat_indices(&[10.0, 20.0, 30.0], None, &[0.0, 6.0, 25.0, 36.0]);
        assert_eq!(idx, vec![None, Some(0), Some(1), None]);

        let idx = lon_indices(&[-10.0, 0.0, 10.0], Some(&[[-15.0, -5.0], [-5.0, 5.0], [5.0, 15.0]]), &[-20.0, 14.0]);
        assert_eq!(idx, vec![None, Some(2)]);
    }

    #[test]
    fn test_time_containment() {
        let bounds = [[0.0, 31.0], [31.0, 59.0], [90.0, 120.0]];
        let idx = time_indices(&bounds, &[-1.0, 15.5, 45.0, 74.5, 105.0, 200.0]);
        assert_eq!(idx, vec![None, Some(0), Some(1), None, Some(2), None]);
    }

    #[test]
    fn test_interpolate_static_field() {
        let v = static_field(vec![-45.0, 45.0], vec![0.0, 90.0, 180.0, 270.0]);
        let grid = TargetGrid::global(90.0);
        let out = v.interpolate(None, &grid).unwrap();
        assert_eq!(out.data.shape(), &[2, 4]);
        // Target lon -135 is nearest to source 180 or 270; tie goes to the first.
        assert_eq!(out.data.get(&[0, 0]), Some(2.0));
        assert_eq!(out.data.get(&[1, 2]), Some(10.0));
        assert!(out.area.is_some());
    }

    #[test]
    fn test_interpolate_time_masks_outside_source() {
        let mut v = static_field(vec![0.0], vec![0.0]);
        v.data = MaskedArray::from_data(ndarray::Array3::from_elem((2, 1, 1), 5.0).into_dyn());
        v.lat_bnds = Some(vec![[-90.0, 90.0]]);
        v.lon_bnds = Some(vec![[-180.0, 180.0]]);
        v.time = Some(vec![15.5, 45.0]);
        v.time_bnds = Some(vec![[0.0, 31.0], [31.0, 59.0]]);
        let axis = TimeAxis::monthly(1850, 1);
        let out = v.interpolate(Some(&axis), &TargetGrid::global(90.0)).unwrap();
        assert_eq!(out.data.shape(), &[12, 2, 4]);
        assert_eq!(out.data.get(&[0, 0, 0]), Some(5.0));
        assert_eq!(out.data.get(&[1, 1, 3]), Some(5.0));
        assert_eq!(out.data.get(&[2, 0, 0]), None);
    }

    #[test]
    fn test_interpolate_rejects_time_kind_mismatch() {
        let v = static_field(vec![0.0], vec![0.0]);
        let axis = TimeAxis::monthly(1850, 1);
        assert!(matches!(
            v.interpolate(Some(&axis), &TargetGrid::global(90.0)),
            Err(IlambError::UnsupportedShape { .. })
        ));
    }

    #[test]
    fn test_extract_sites_takes_nearest_cells() {
        let mut v = static_field(vec![-45.0, 45.0], vec![0.0, 90.0, 180.0, 270.0]);
        v.data = MaskedArray::from_data(
            ndarray::Array3::from_shape_fn((2, 2, 4), |(t, i, j)| (100 * t + 10 * i + j) as f64).into_dyn(),
        );
        v.time = Some(vec![15.5, 45.0]);
        v.time_bnds = Some(vec![[0.0, 31.0], [31.0, 59.0]]);

        let sites = v.extract_sites(&[40.0, -50.0], &[-95.0, 10.0]).unwrap();
        assert_eq!(sites.data.shape(), &[2, 2]);
        assert_eq!(sites.ndata, Some(2));
        assert!(!sites.spatial());
        assert_eq!(sites.lat, Some(vec![40.0, -50.0]));
        // -95 wraps to the source cell at 270.
        assert_eq!(sites.data.get(&[0, 0]), Some(13.0));
        assert_eq!(sites.data.get(&[1, 0]), Some(113.0));
        assert_eq!(sites.data.get(&[1, 1]), Some(100.0));
    }

    #[test]
    fn test_select_sites_within_tolerance() {
        let mut v = Variable::new(
            "gpp",
            "g m-2 d-1",
            MaskedArray::from_data(ndarray::arr2(&[[1.0, 2.0, 3.0]]).into_dyn()),
        );
        v.time = Some(vec![15.5]);
        v.lat = Some(vec![10.0, 20.0, 30.0]);
        v.lon = Some(vec![-50.0, -60.0, -70.0]);
        v.ndata = Some(3);

        let picked = v.select_sites(&[30.05, 12.0, 20.0], &[-70.0, -50.0, -60.0], 0.1).unwrap();
        assert_eq!(picked.ndata, Some(2));
        assert_eq!(picked.lat, Some(vec![30.0, 20.0]));
        assert_eq!(picked.data.get(&[0, 0]), Some(3.0));
        assert_eq!(picked.data.get(&[0, 1]), Some(2.0));

        assert!(v.select_sites(&[0.0], &[0.0], 0.1).is_none());
    }
}
