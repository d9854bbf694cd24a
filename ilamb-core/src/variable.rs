//! Variables read from model output.
//!
//! A [`Variable`] is one geophysical field from one model: a masked data
//! array plus whichever coordinate axes it has. The data dimensions are
//! ordered `(time?, depth?, lat, lon)` for gridded fields and
//! `(time?, depth?, ndata)` for site data.

use log::debug;
use ndarray::{concatenate, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{IlambError, IlambResult};
use crate::masked::MaskedArray;
use crate::units::Unit;

/// Relative tolerance when comparing coordinate axes between models.
pub const AXIS_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub unit: String,
    pub data: MaskedArray,
    /// Days since 1850-01-01 on the noleap calendar.
    pub time: Option<Vec<f64>>,
    pub time_bnds: Option<Vec<[f64; 2]>>,
    pub lat: Option<Vec<f64>>,
    pub lat_bnds: Option<Vec<[f64; 2]>>,
    pub lon: Option<Vec<f64>>,
    pub lon_bnds: Option<Vec<[f64; 2]>>,
    /// Vertical coordinate; present means the variable is layered.
    pub depth: Option<Vec<f64>>,
    /// Number of sites for site data.
    pub ndata: Option<usize>,
    /// Cell areas on the `(lat, lon)` grid.
    pub area: Option<MaskedArray>,
}

impl Variable {
    /// A variable with data and unit only; axes are attached by the caller.
    pub fn new(name: &str, unit: &str, data: MaskedArray) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            data,
            time: None,
            time_bnds: None,
            lat: None,
            lat_bnds: None,
            lon: None,
            lon_bnds: None,
            depth: None,
            ndata: None,
            area: None,
        }
    }

    pub fn temporal(&self) -> bool {
        self.time.is_some()
    }

    pub fn spatial(&self) -> bool {
        self.lat.is_some() && self.lon.is_some() && self.ndata.is_none()
    }

    pub fn layered(&self) -> bool {
        self.depth.is_some()
    }

    pub fn ntime(&self) -> usize {
        self.time.as_ref().map_or(0, Vec::len)
    }

    /// Why this variable cannot be averaged on a lat/lon grid, if it cannot.
    ///
    /// Layered fields, fields with more than three data dimensions, single
    /// dimension series and site data are all rejected.
    pub fn unsupported_reason(&self) -> Option<String> {
        let ndim = self.data.ndim();
        if self.layered() {
            Some("layered variables are not supported".to_string())
        } else if ndim > 3 {
            Some(format!("{ndim} data dimensions, at most 3 supported"))
        } else if ndim <= 1 {
            Some(format!("{ndim} data dimension(s), a lat/lon grid is required"))
        } else if self.ndata.is_some() {
            Some("site data is not on a lat/lon grid".to_string())
        } else if !self.spatial() {
            Some("not on a lat/lon grid".to_string())
        } else if ndim != self.axis_count() {
            Some("unrecognised data dimensions".to_string())
        } else {
            None
        }
    }

    /// Number of data dimensions accounted for by known axes.
    fn axis_count(&self) -> usize {
        usize::from(self.temporal())
            + usize::from(self.layered())
            + if self.ndata.is_some() {
                1
            } else {
                usize::from(self.lat.is_some()) + usize::from(self.lon.is_some())
            }
    }

    /// Converts the data in place into `unit`.
    ///
    /// # Errors
    ///
    /// Fails when either unit cannot be parsed or the dimensions differ.
    pub fn convert(&mut self, unit: &str) -> IlambResult<()> {
        let from = Unit::parse(&self.unit)?;
        let to = Unit::parse(unit)?;
        let conversion = from.conversion_to(&to)?;
        if !conversion.is_identity() {
            debug!(
                "Converting {} from '{}' to '{}' (x{} + {})",
                self.name, self.unit, unit, conversion.scale, conversion.offset
            );
            self.data.map_inplace(|v| conversion.apply(v));
        }
        self.unit = unit.to_string();
        Ok(())
    }

    /// Shifts time and time bounds by `days`.
    pub fn shift_time(&mut self, days: f64) {
        if days == 0.0 {
            return;
        }
        if let Some(time) = self.time.as_mut() {
            time.iter_mut().for_each(|t| *t += days);
        }
        if let Some(bounds) = self.time_bnds.as_mut() {
            bounds.iter_mut().for_each(|b| {
                b[0] += days;
                b[1] += days;
            });
        }
    }

    /// Keeps only the time steps whose bounds intersect `[t0, tf]`.
    pub fn trim_time(&mut self, t0: f64, tf: f64) {
        let Some(bounds) = self.time_bnds.as_ref() else {
            return;
        };
        let keep: Vec<usize> = bounds
            .iter()
            .enumerate()
            .filter(|(_, b)| b[1] >= t0 && b[0] <= tf)
            .map(|(k, _)| k)
            .collect();
        if keep.len() == bounds.len() {
            return;
        }
        let (data, mask) = std::mem::replace(&mut self.data, MaskedArray::zeros(&[0])).into_parts();
        self.data = MaskedArray::new(data.select(Axis(0), &keep), mask.select(Axis(0), &keep));
        self.time = self
            .time
            .take()
            .map(|t| keep.iter().map(|&k| t[k]).collect());
        self.time_bnds = self
            .time_bnds
            .take()
            .map(|b| keep.iter().map(|&k| b[k]).collect());
    }

    /// Earliest and latest time bound, if temporal.
    pub fn time_extent(&self) -> Option<(f64, f64)> {
        let bounds = self.time_bnds.as_ref()?;
        let lo = bounds.iter().map(|b| b[0]).reduce(f64::min)?;
        let hi = bounds.iter().map(|b| b[1]).reduce(f64::max)?;
        Some((lo, hi))
    }

    /// Checks that `self` lies on exactly the same grid as `reference`,
    /// cell areas included.
    ///
    /// Returns the name of the first axis that differs.
    pub fn check_same_grid(&self, reference: &Variable) -> Result<(), &'static str> {
        if self.data.shape() != reference.data.shape() {
            return Err("shape");
        }
        if !axes_close(self.time.as_deref(), reference.time.as_deref()) {
            return Err("time");
        }
        if !bounds_close(self.time_bnds.as_deref(), reference.time_bnds.as_deref()) {
            return Err("time_bnds");
        }
        if !axes_close(self.lat.as_deref(), reference.lat.as_deref()) {
            return Err("lat");
        }
        if !bounds_close(self.lat_bnds.as_deref(), reference.lat_bnds.as_deref()) {
            return Err("lat_bnds");
        }
        if !axes_close(self.lon.as_deref(), reference.lon.as_deref()) {
            return Err("lon");
        }
        if !bounds_close(self.lon_bnds.as_deref(), reference.lon_bnds.as_deref()) {
            return Err("lon_bnds");
        }
        if !areas_close(self.area.as_ref(), reference.area.as_ref()) {
            return Err("area");
        }
        Ok(())
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= AXIS_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn values_close(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| close(*x, *y))
}

fn axes_close(a: Option<&[f64]>, b: Option<&[f64]>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => values_close(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn bounds_close(a: Option<&[[f64; 2]]>, b: Option<&[[f64; 2]]>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| close(x[0], y[0]) && close(x[1], y[1]))
        }
        (None, None) => true,
        _ => false,
    }
}

fn areas_close(a: Option<&MaskedArray>, b: Option<&MaskedArray>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            a.shape() == b.shape()
                && a.mask() == b.mask()
                && a.data()
                    .iter()
                    .zip(b.data().iter())
                    .zip(a.mask().iter())
                    .all(|((x, y), masked)| *masked || close(*x, *y))
        }
        (None, None) => true,
        _ => false,
    }
}

/// Joins pieces of one variable read from several files along time.
///
/// Pieces are ordered by their first time; a piece starting before the end
/// of what has been combined so far overlaps it and is dropped. Non-temporal
/// pieces cannot be joined, so the first one is returned.
pub fn combine(mut pieces: Vec<Variable>) -> IlambResult<Variable> {
    if pieces.is_empty() {
        return Err(IlambError::Error("no variable pieces to combine".into()));
    }
    if pieces.len() == 1 || pieces.iter().any(|p| !p.temporal()) {
        return Ok(pieces.swap_remove(0));
    }

    pieces.sort_by(|a, b| {
        let ta = a.time.as_ref().and_then(|t| t.first().copied()).unwrap_or(f64::MAX);
        let tb = b.time.as_ref().and_then(|t| t.first().copied()).unwrap_or(f64::MAX);
        ta.total_cmp(&tb)
    });

    let mut kept: Vec<Variable> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if let Some(last) = kept.last() {
            let end = last.time_extent().map_or(f64::MIN, |(_, hi)| hi);
            let start = piece.time_extent().map_or(f64::MAX, |(lo, _)| lo);
            if start < end - AXIS_TOLERANCE {
                debug!(
                    "Dropping overlapping piece of {} starting at day {start}",
                    piece.name
                );
                continue;
            }
            if piece.data.shape()[1..] != last.data.shape()[1..] {
                return Err(IlambError::UnsupportedShape {
                    variable: piece.name.clone(),
                    reason: "files disagree on the non-time dimensions".into(),
                });
            }
        }
        kept.push(piece);
    }

    let first = kept.remove(0);
    if kept.is_empty() {
        return Ok(first);
    }

    let mut combined = first;
    let mut data_views = vec![combined.data.data().view()];
    let mut mask_views = vec![combined.data.mask().view()];
    for piece in &kept {
        data_views.push(piece.data.data().view());
        mask_views.push(piece.data.mask().view());
    }
    let data = concatenate(Axis(0), &data_views)
        .map_err(|e| IlambError::Error(format!("cannot join {}: {e}", combined.name)))?;
    let mask = concatenate(Axis(0), &mask_views)
        .map_err(|e| IlambError::Error(format!("cannot join {}: {e}", combined.name)))?;

    let mut time = combined.time.take().unwrap_or_default();
    let mut time_bnds = combined.time_bnds.take().unwrap_or_default();
    for piece in kept {
        time.extend(piece.time.unwrap_or_default());
        time_bnds.extend(piece.time_bnds.unwrap_or_default());
    }

    combined.data = MaskedArray::new(data, mask);
    combined.time = Some(time);
    combined.time_bnds = Some(time_bnds);
    Ok(combined)
}
