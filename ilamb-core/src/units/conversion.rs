//! Unit conversion calculations.
//!
//! [`Unit`] combines parsing, normalization and conversion. Conversions are
//! affine so that absolute temperatures (`K` to `degC`) convert correctly;
//! every other pair of compatible units has a zero offset.
//!
//! ```
//! use ilamb_core::units::Unit;
//!
//! let per_second = Unit::parse("kg m-2 s-1").unwrap();
//! let per_day = Unit::parse("kg/m2/d").unwrap();
//! let conversion = per_second.conversion_to(&per_day).unwrap();
//! assert!((conversion.apply(1.0) - 86400.0).abs() < 1e-9);
//! ```

use super::dimension::Dimension;
use super::parser::{ParseError, ParsedUnit};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for unit conversion failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    IncompatibleDimensions {
        from: Dimension,
        to: Dimension,
        from_unit: String,
        to_unit: String,
    },
    ParseError(ParseError),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleDimensions {
                from,
                to,
                from_unit,
                to_unit,
            } => {
                write!(
                    f,
                    "cannot convert from '{from_unit}' to '{to_unit}': \
                     incompatible dimensions ({from} vs {to})"
                )
            }
            Self::ParseError(e) => write!(f, "unit parse error: {e}"),
        }
    }
}

impl std::error::Error for ConversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ParseError(e) => Some(e),
            Self::IncompatibleDimensions { .. } => None,
        }
    }
}

impl From<ParseError> for ConversionError {
    fn from(e: ParseError) -> Self {
        Self::ParseError(e)
    }
}

/// An affine map `value * scale + offset` between two units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub scale: f64,
    pub offset: f64,
}

impl Conversion {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }
}

/// A parsed and validated unit.
///
/// Two units are equal if they have the same normalized representation, so
/// `Unit::parse("W m-2") == Unit::parse("W/m^2")`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// The original input string, preserved for writing back to files.
    original: String,
    parsed: ParsedUnit,
}

impl Unit {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let parsed = ParsedUnit::parse(input)?;
        Ok(Self {
            original: input.trim().to_string(),
            parsed,
        })
    }

    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    #[must_use]
    pub fn normalized(&self) -> String {
        self.parsed.normalized()
    }

    /// False when the dimension cannot be computed (unknown symbol).
    #[must_use]
    pub fn is_dimensionless(&self) -> bool {
        self.parsed.is_dimensionless().unwrap_or(false)
    }

    pub fn dimension(&self) -> Result<Dimension, ParseError> {
        self.parsed.dimension()
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        match (self.dimension(), other.dimension()) {
            (Ok(d1), Ok(d2)) => d1.is_compatible(&d2),
            _ => false,
        }
    }

    /// Calculates the affine conversion from this unit to `other`.
    ///
    /// Equal units always convert with the identity, even when their symbols
    /// are not in the registry.
    pub fn conversion_to(&self, other: &Self) -> Result<Conversion, ConversionError> {
        if self == other {
            return Ok(Conversion::IDENTITY);
        }

        let dim_self = self.dimension()?;
        let dim_other = other.dimension()?;
        if !dim_self.is_compatible(&dim_other) {
            return Err(ConversionError::IncompatibleDimensions {
                from: dim_self,
                to: dim_other,
                from_unit: self.original.clone(),
                to_unit: other.original.clone(),
            });
        }

        // si = v_self * f_self + o_self = v_other * f_other + o_other
        let factor_self = self.parsed.to_si_factor()?;
        let factor_other = other.parsed.to_si_factor()?;
        let offset_self = self.parsed.to_si_offset()?;
        let offset_other = other.parsed.to_si_offset()?;

        Ok(Conversion {
            scale: factor_self / factor_other,
            offset: (offset_self - offset_other) / factor_other,
        })
    }

    /// Multiplicative factor from this unit to `other`, ignoring offsets.
    pub fn conversion_factor(&self, other: &Self) -> Result<f64, ConversionError> {
        Ok(self.conversion_to(other)?.scale)
    }

    pub fn convert_to(&self, value: f64, other: &Self) -> Result<f64, ConversionError> {
        Ok(self.conversion_to(other)?.apply(value))
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for Unit {}

impl std::hash::Hash for Unit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Checks if two unit strings are equivalent after normalization.
pub fn units_equal(a: &str, b: &str) -> Result<bool, ParseError> {
    Ok(Unit::parse(a)? == Unit::parse(b)?)
}

/// Calculates the affine conversion between two unit strings.
pub fn conversion(from: &str, to: &str) -> Result<Conversion, ConversionError> {
    Unit::parse(from)?.conversion_to(&Unit::parse(to)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::registry::{CO2_TO_C_RATIO, SECONDS_PER_DAY};
    use approx::assert_relative_eq;

    #[test]
    fn test_unit_equality_across_notations() {
        let u1 = Unit::parse("W m-2").unwrap();
        let u2 = Unit::parse("W / m ^ 2").unwrap();
        let u3 = Unit::parse("W/m2").unwrap();
        assert_eq!(u1, u2);
        assert_eq!(u2, u3);
    }

    #[test]
    fn test_display_preserves_original() {
        let unit = Unit::parse(" kg m-2 s-1 ").unwrap();
        assert_eq!(unit.to_string(), "kg m-2 s-1");
        assert_eq!(unit.normalized(), "kg / m^2 s");
    }

    #[test]
    fn test_flux_per_second_to_per_day() {
        let factor = conversion("kg m-2 s-1", "kg m-2 d-1").unwrap();
        assert_relative_eq!(factor.scale, SECONDS_PER_DAY);
        assert_eq!(factor.offset, 0.0);
    }

    #[test]
    fn test_gpp_carbon_units() {
        let c = conversion("kg m-2 s-1", "g m-2 d-1").unwrap();
        assert_relative_eq!(c.apply(1e-8), 1e-8 * 1e3 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_carbon_to_co2() {
        let c = conversion("GtC", "GtCO2").unwrap();
        assert_relative_eq!(c.scale, CO2_TO_C_RATIO, epsilon = 1e-12);
    }

    #[test]
    fn test_kelvin_to_celsius() {
        let k = Unit::parse("K").unwrap();
        let c = Unit::parse("degC").unwrap();
        assert_relative_eq!(k.convert_to(273.15, &c).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(c.convert_to(15.0, &k).unwrap(), 288.15, epsilon = 1e-12);
    }

    #[test]
    fn test_percent_to_fraction() {
        let c = conversion("%", "1").unwrap();
        assert_relative_eq!(c.apply(50.0), 0.5);
    }

    #[test]
    fn test_incompatible_dimensions_error() {
        let result = conversion("kg m-2 s-1", "W m-2");
        assert!(matches!(
            result,
            Err(ConversionError::IncompatibleDimensions { .. })
        ));
    }

    #[test]
    fn test_identical_unknown_units_are_identity() {
        let u = Unit::parse("furlong").unwrap();
        assert!(u.conversion_to(&u.clone()).unwrap().is_identity());
        let other = Unit::parse("fortnight").unwrap();
        assert!(matches!(
            u.conversion_to(&other),
            Err(ConversionError::ParseError(ParseError::UnknownUnit(_)))
        ));
    }

    #[test]
    fn test_units_equal_helper() {
        assert!(units_equal("kg/m2/s", "kg m-2 s-1").unwrap());
        assert!(!units_equal("W/m^2", "W/m").unwrap());
    }
}
