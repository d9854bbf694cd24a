//! Target space-time grids.
//!
//! The general mean mode puts every model onto a grid built here: a
//! regular global latitude/longitude grid at a chosen resolution and a
//! monthly time axis over the historical period.

use serde::{Deserialize, Serialize};

use crate::calendar::{DAYS_PER_YEAR, MONTH_BOUNDARIES};
use crate::masked::MaskedArray;

/// First year of the historical period.
pub const HISTORICAL_START_YEAR: i32 = 1850;

/// Length of the historical period in years.
pub const HISTORICAL_YEARS: usize = 166;

/// Mean Earth radius in metres, used for cell areas.
pub const EARTH_RADIUS: f64 = 6.371e6;

/// A time axis of cell centres and bounds in days since 1850 (noleap).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub values: Vec<f64>,
    pub bounds: Vec<[f64; 2]>,
}

impl TimeAxis {
    /// Monthly axis with explicit month lengths, starting January of
    /// `start_year` and spanning `years` years.
    pub fn monthly(start_year: i32, years: usize) -> Self {
        let first = f64::from(start_year - crate::calendar::REFERENCE_YEAR) * DAYS_PER_YEAR;
        let bounds: Vec<[f64; 2]> = (0..years)
            .flat_map(|year| {
                let year_start = first + year as f64 * DAYS_PER_YEAR;
                MONTH_BOUNDARIES
                    .windows(2)
                    .map(move |w| [year_start + w[0], year_start + w[1]])
            })
            .collect();
        let values = bounds.iter().map(|b| 0.5 * (b[0] + b[1])).collect();
        Self { values, bounds }
    }

    /// The fixed historical axis: monthly from 1850 for 166 years.
    pub fn historical_monthly() -> Self {
        Self::monthly(HISTORICAL_START_YEAR, HISTORICAL_YEARS)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A rectilinear latitude/longitude grid with cell bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub lat: Vec<f64>,
    pub lat_bnds: Vec<[f64; 2]>,
    pub lon: Vec<f64>,
    pub lon_bnds: Vec<[f64; 2]>,
}

impl TargetGrid {
    /// Global grid with cells of `res` degrees, longitudes from -180 to 180.
    ///
    /// The cell count per axis is rounded, so a resolution that does not
    /// divide 180 evenly is adjusted to the nearest one that does.
    pub fn global(res: f64) -> Self {
        let (lat, lat_bnds) = regular_axis(-90.0, 90.0, res);
        let (lon, lon_bnds) = regular_axis(-180.0, 180.0, res);
        Self {
            lat,
            lat_bnds,
            lon,
            lon_bnds,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    /// Cell areas in m² for this grid.
    pub fn cell_areas(&self) -> MaskedArray {
        cell_areas(&self.lat_bnds, &self.lon_bnds)
    }
}

fn regular_axis(start: f64, end: f64, res: f64) -> (Vec<f64>, Vec<[f64; 2]>) {
    let n = (((end - start) / res).round() as usize).max(1);
    let step = (end - start) / n as f64;
    let bounds: Vec<[f64; 2]> = (0..n)
        .map(|i| [start + i as f64 * step, start + (i + 1) as f64 * step])
        .collect();
    let centres = bounds.iter().map(|b| 0.5 * (b[0] + b[1])).collect();
    (centres, bounds)
}

/// Spherical cell areas in m² from latitude and longitude bounds in degrees.
///
/// Longitude widths wrap, so a cell from 359.5 to 0.5 is one degree wide.
pub fn cell_areas(lat_bnds: &[[f64; 2]], lon_bnds: &[[f64; 2]]) -> MaskedArray {
    let lat_weights: Vec<f64> = lat_bnds
        .iter()
        .map(|b| (b[1].to_radians().sin() - b[0].to_radians().sin()).abs())
        .collect();
    let lon_widths: Vec<f64> = lon_bnds
        .iter()
        .map(|b| {
            let width = b[1] - b[0];
            if width < 0.0 {
                width + 360.0
            } else {
                width
            }
        })
        .map(f64::to_radians)
        .collect();

    let data = ndarray::Array2::from_shape_fn((lat_weights.len(), lon_widths.len()), |(i, j)| {
        EARTH_RADIUS * EARTH_RADIUS * lat_weights[i] * lon_widths[j]
    });
    MaskedArray::from_data(data.into_dyn())
}
