//! Physical dimensions for unit validation.
//!
//! Dimensions are integer exponents of the SI base quantities. Two units
//! can be converted into each other only when their dimensions are equal,
//! which is how the mean computer decides whether a model's series can be
//! brought into the canonical unit of a variable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// The physical dimension of a quantity, as exponents of SI base dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Dimension {
    /// Mass exponent (M)
    pub mass: i8,
    /// Length exponent (L)
    pub length: i8,
    /// Time exponent (T)
    pub time: i8,
    /// Temperature exponent (Θ)
    pub temperature: i8,
    /// Amount of substance exponent (N)
    pub amount: i8,
    /// Electric current exponent (I)
    pub current: i8,
}

impl Dimension {
    #[must_use]
    pub const fn dimensionless() -> Self {
        Self::new(0, 0, 0, 0, 0, 0)
    }

    #[must_use]
    pub const fn new(
        mass: i8,
        length: i8,
        time: i8,
        temperature: i8,
        amount: i8,
        current: i8,
    ) -> Self {
        Self {
            mass,
            length,
            time,
            temperature,
            amount,
            current,
        }
    }

    pub const MASS: Self = Self::new(1, 0, 0, 0, 0, 0);
    pub const LENGTH: Self = Self::new(0, 1, 0, 0, 0, 0);
    pub const TIME: Self = Self::new(0, 0, 1, 0, 0, 0);
    pub const TEMPERATURE: Self = Self::new(0, 0, 0, 1, 0, 0);
    pub const AMOUNT: Self = Self::new(0, 0, 0, 0, 1, 0);
    pub const CURRENT: Self = Self::new(0, 0, 0, 0, 0, 1);

    /// Area (L²), the dimension of `areacella`.
    pub const AREA: Self = Self::new(0, 2, 0, 0, 0, 0);

    /// Energy (M·L²·T⁻²).
    pub const ENERGY: Self = Self::new(1, 2, -2, 0, 0, 0);

    /// Power (M·L²·T⁻³).
    pub const POWER: Self = Self::new(1, 2, -3, 0, 0, 0);

    /// Pressure (M·L⁻¹·T⁻²).
    pub const PRESSURE: Self = Self::new(1, -1, -2, 0, 0, 0);

    /// Radiative flux (M·T⁻³), the dimension of `W m-2`.
    pub const RADIATIVE_FLUX: Self = Self::new(1, 0, -3, 0, 0, 0);

    /// Mass flux density (M·L⁻²·T⁻¹), the dimension of `kg m-2 s-1`.
    pub const MASS_FLUX: Self = Self::new(1, -2, -1, 0, 0, 0);

    #[must_use]
    pub const fn is_dimensionless(&self) -> bool {
        self.is_compatible(&Self::dimensionless())
    }

    /// Two dimensions are compatible if they are identical.
    #[must_use]
    pub const fn is_compatible(&self, other: &Self) -> bool {
        self.mass == other.mass
            && self.length == other.length
            && self.time == other.time
            && self.temperature == other.temperature
            && self.amount == other.amount
            && self.current == other.current
    }

    #[must_use]
    pub const fn pow(&self, exp: i8) -> Self {
        Self::new(
            self.mass * exp,
            self.length * exp,
            self.time * exp,
            self.temperature * exp,
            self.amount * exp,
            self.current * exp,
        )
    }
}

impl Add for Dimension {
    type Output = Self;

    /// Combining quantities multiplies them, which adds the exponents.
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(
            self.mass + rhs.mass,
            self.length + rhs.length,
            self.time + rhs.time,
            self.temperature + rhs.temperature,
            self.amount + rhs.amount,
            self.current + rhs.current,
        )
    }
}

impl Sub for Dimension {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl Neg for Dimension {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.pow(-1)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }

        let symbols = [
            (self.mass, "M"),
            (self.length, "L"),
            (self.time, "T"),
            (self.temperature, "Θ"),
            (self.amount, "N"),
            (self.current, "I"),
        ];

        let parts: Vec<String> = symbols
            .iter()
            .filter(|(exp, _)| *exp != 0)
            .map(|(exp, sym)| {
                if *exp == 1 {
                    (*sym).to_string()
                } else {
                    format!("{sym}^{exp}")
                }
            })
            .collect();

        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mass_flux_from_base_dimensions() {
        let flux = Dimension::MASS - Dimension::AREA - Dimension::TIME;
        assert_eq!(flux, Dimension::MASS_FLUX);
    }

    #[test]
    fn test_radiative_flux() {
        assert_eq!(
            Dimension::POWER - Dimension::AREA,
            Dimension::RADIATIVE_FLUX
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Dimension::dimensionless().to_string(), "dimensionless");
        assert_eq!(Dimension::AREA.to_string(), "L^2");
        assert_eq!(Dimension::MASS_FLUX.to_string(), "M L^-2 T^-1");
    }
}
