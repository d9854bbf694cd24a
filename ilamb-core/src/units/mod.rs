//! Unit parsing, normalization, and conversion for model output variables.
//!
//! Models from different centres report the same quantity in different
//! spellings and scales (`kg m-2 s-1`, `kg/m2/s`, `g m-2 d-1`). The mean
//! computer fixes the unit of the first accepted model and converts every
//! later model into it; this module provides that conversion.
//!
//! # Quick Start
//!
//! ```
//! use ilamb_core::units::Unit;
//!
//! let canonical = Unit::parse("kg m-2 s-1").unwrap();
//! let incoming = Unit::parse("g/m2/d").unwrap();
//! assert!(incoming.is_compatible(&canonical));
//!
//! let conversion = incoming.conversion_to(&canonical).unwrap();
//! let value = conversion.apply(86.4);
//! assert!((value - 1e-6).abs() < 1e-15);
//!
//! let flux = Unit::parse("W m-2").unwrap();
//! assert!(canonical.conversion_to(&flux).is_err());
//! ```
//!
//! # Supported Syntax
//!
//! | Notation | Meaning |
//! |----------|---------|
//! | `m-2`, `m^-2`, `m**-2` | Per square metre |
//! | `kg/m2/s`, `kg m-2 s-1` | Mass flux |
//! | `kg m`, `kg*m`, `kg.m` | Kilogram-metres |
//! | `%` | Percent (0.01) |
//!
//! # Module Structure
//!
//! - [`dimension`]: Physical dimension types (M, L, T, Θ, ...)
//! - [`registry`]: Known units with conversion factors
//! - [`parser`]: Unit string parsing with normalization
//! - [`conversion`]: High-level [`Unit`] type and conversion API

pub mod conversion;
pub mod dimension;
pub mod parser;
pub mod registry;

pub use conversion::{conversion, units_equal, Conversion, ConversionError, Unit};
pub use dimension::Dimension;
pub use parser::{ParseError, ParsedUnit};
pub use registry::{UnitInfo, UnitRegistry, UNIT_REGISTRY};

#[cfg(test)]
mod tests {
    use super::*;

    /// Typical set of spellings seen across CMIP-style model output.
    #[test]
    fn test_model_output_spellings() {
        let spellings = ["kg m-2 s-1", "kg/m2/s", "kg m^-2 s^-1", "kg.m-2.s-1"];
        let units: Vec<Unit> = spellings.iter().map(|s| Unit::parse(s).unwrap()).collect();
        for unit in &units[1..] {
            assert_eq!(unit, &units[0]);
        }
    }

    #[test]
    fn test_precipitation_mm_per_day() {
        // 1 kg m-2 of water is 1 mm, so mm/d and kg m-2 d-1 differ only in
        // dimension, not convertible without a density.
        let mm = Unit::parse("mm/d").unwrap();
        let flux = Unit::parse("kg m-2 d-1").unwrap();
        assert!(!mm.is_compatible(&flux));
    }

    #[test]
    fn test_land_fraction_percent() {
        let pct = Unit::parse("%").unwrap();
        let one = Unit::parse("1").unwrap();
        assert!(pct.is_dimensionless());
        let factor = pct.conversion_factor(&one).unwrap();
        assert!((factor - 0.01).abs() < 1e-15);
    }
}
