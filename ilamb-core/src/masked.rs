//! Masked n-dimensional arrays.
//!
//! Model output marks missing cells (ocean points of a land variable, times
//! outside a run) with fill values. Once read, missing cells are carried as
//! an explicit boolean mask alongside the values so that no arithmetic ever
//! sees a fill value.

use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// Absolute values at or above this are treated as missing, as most CMIP
/// writers use 1e20 as the fill value.
pub const MISSING_THRESHOLD: f64 = 1e20;

/// Fill value written to output files.
pub const FILL_VALUE: f64 = 1e20;

/// Values plus a mask of the same shape; `true` in the mask means missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedArray {
    data: ArrayD<f64>,
    mask: ArrayD<bool>,
}

impl MaskedArray {
    /// Wraps `data` with an explicit mask.
    ///
    /// # Panics
    ///
    /// Panics if `data` and `mask` have different shapes.
    pub fn new(data: ArrayD<f64>, mask: ArrayD<bool>) -> Self {
        assert_eq!(data.shape(), mask.shape(), "mask shape must match data");
        Self { data, mask }
    }

    /// Masks non-finite values and values at or above [`MISSING_THRESHOLD`].
    pub fn from_data(data: ArrayD<f64>) -> Self {
        let mask = data.mapv(|v| !v.is_finite() || v.abs() >= MISSING_THRESHOLD);
        Self { data, mask }
    }

    /// Like [`MaskedArray::from_data`], additionally masking each value
    /// equal to one of `fill_values`.
    pub fn from_data_with_fill(data: ArrayD<f64>, fill_values: &[f64]) -> Self {
        let mut masked = Self::from_data(data);
        if !fill_values.is_empty() {
            Zip::from(&mut masked.mask)
                .and(&masked.data)
                .for_each(|m, &v| *m |= fill_values.contains(&v));
        }
        masked
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
            mask: ArrayD::from_elem(IxDyn(shape), false),
        }
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn mask(&self) -> &ArrayD<bool> {
        &self.mask
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Value at `index`, or `None` where masked.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if self.mask[index] {
            None
        } else {
            Some(self.data[index])
        }
    }

    pub fn count_unmasked(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    /// Maximum of the unmasked values.
    pub fn max(&self) -> Option<f64> {
        self.data
            .iter()
            .zip(self.mask.iter())
            .filter(|(_, m)| !**m)
            .map(|(v, _)| *v)
            .reduce(f64::max)
    }

    /// Applies `f` to the unmasked values in place.
    pub fn map_inplace(&mut self, f: impl Fn(f64) -> f64) {
        Zip::from(&mut self.data)
            .and(&self.mask)
            .for_each(|v, &m| {
                if !m {
                    *v = f(*v);
                }
            });
    }

    /// Elementwise product; masked where either operand is masked.
    ///
    /// # Panics
    ///
    /// Panics if the shapes differ.
    pub fn multiply(&self, other: &Self) -> Self {
        let data = &self.data * &other.data;
        let mask = Zip::from(&self.mask)
            .and(&other.mask)
            .map_collect(|&a, &b| a || b);
        Self { data, mask }
    }

    /// Sum of the unmasked values.
    pub fn sum(&self) -> f64 {
        self.data
            .iter()
            .zip(self.mask.iter())
            .filter(|(_, m)| !**m)
            .map(|(v, _)| *v)
            .sum()
    }

    /// Values with masked cells replaced by `fill`.
    pub fn filled(&self, fill: f64) -> ArrayD<f64> {
        Zip::from(&self.data)
            .and(&self.mask)
            .map_collect(|&v, &m| if m { fill } else { v })
    }

    /// Drops a leading axis of length one.
    pub fn squeeze_leading(self) -> Self {
        if self.ndim() > 1 && self.shape()[0] == 1 {
            Self {
                data: self.data.index_axis_move(ndarray::Axis(0), 0),
                mask: self.mask.index_axis_move(ndarray::Axis(0), 0),
            }
        } else {
            self
        }
    }

    pub fn into_parts(self) -> (ArrayD<f64>, ArrayD<bool>) {
        (self.data, self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_fill_values_are_masked() {
        let data = arr2(&[[1.0, 1e20], [f64::NAN, -999.0]]).into_dyn();
        let masked = MaskedArray::from_data_with_fill(data, &[-999.0]);
        assert_eq!(masked.count_unmasked(), 1);
        assert_eq!(masked.get(&[0, 0]), Some(1.0));
        assert_eq!(masked.get(&[0, 1]), None);
        assert_eq!(masked.get(&[1, 0]), None);
        assert_eq!(masked.get(&[1, 1]), None);
    }

    #[test]
    fn test_max_and_sum_ignore_masked() {
        let data = arr2(&[[1.0, 2.0], [3.0, 1e30]]).into_dyn();
        let masked = MaskedArray::from_data(data);
        assert_eq!(masked.max(), Some(3.0));
        assert_eq!(masked.sum(), 6.0);
    }

    #[test]
    fn test_map_inplace_skips_masked() {
        let data = arr2(&[[50.0, 1e20]]).into_dyn();
        let mut masked = MaskedArray::from_data(data);
        masked.map_inplace(|v| v * 0.01);
        assert_eq!(masked.data()[[0, 0]], 0.5);
        assert_eq!(masked.data()[[0, 1]], 1e20);
    }

    #[test]
    fn test_multiply_unions_masks() {
        let a = MaskedArray::from_data(arr2(&[[2.0, 1e20]]).into_dyn());
        let b = MaskedArray::from_data(arr2(&[[3.0, 4.0]]).into_dyn());
        let c = a.multiply(&b);
        assert_eq!(c.get(&[0, 0]), Some(6.0));
        assert_eq!(c.get(&[0, 1]), None);
    }

    #[test]
    fn test_squeeze_leading() {
        let masked = MaskedArray::zeros(&[1, 3, 4]).squeeze_leading();
        assert_eq!(masked.shape(), &[3, 4]);
        let kept = MaskedArray::zeros(&[2, 3]).squeeze_leading();
        assert_eq!(kept.shape(), &[2, 3]);
    }
}
