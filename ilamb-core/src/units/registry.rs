//! Registry of the units found in CF-convention model output.
//!
//! Conversion factors are multipliers from the registered unit TO the SI
//! base unit. Units on an offset scale (`degC`) additionally carry an
//! offset: `si = value * factor + offset`.

use super::dimension::Dimension;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Information about a known unit.
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub name: String,
    pub dimension: Dimension,
    /// Multiplier to SI base units.
    pub to_si_factor: f64,
    /// Additive offset to SI, only non-zero for absolute temperature scales.
    pub to_si_offset: f64,
    /// The base unit this is derived from (for compound units like gC).
    pub base_unit: Option<String>,
}

impl UnitInfo {
    fn new(name: &str, dimension: Dimension, to_si_factor: f64) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            to_si_factor,
            to_si_offset: 0.0,
            base_unit: None,
        }
    }

    fn with_base(name: &str, dimension: Dimension, to_si_factor: f64, base: &str) -> Self {
        Self {
            base_unit: Some(base.to_string()),
            ..Self::new(name, dimension, to_si_factor)
        }
    }

    fn with_offset(name: &str, dimension: Dimension, to_si_factor: f64, offset: f64) -> Self {
        Self {
            to_si_offset: offset,
            ..Self::new(name, dimension, to_si_factor)
        }
    }
}

/// SI prefix multipliers.
#[derive(Debug, Clone, Copy)]
pub struct SiPrefix {
    pub symbol: &'static str,
    pub factor: f64,
}

/// SI prefixes, longest symbols first so `da` wins over `d`.
pub static SI_PREFIXES: &[SiPrefix] = &[
    SiPrefix { symbol: "da", factor: 1e1 },
    SiPrefix { symbol: "E", factor: 1e18 },
    SiPrefix { symbol: "P", factor: 1e15 },
    SiPrefix { symbol: "T", factor: 1e12 },
    SiPrefix { symbol: "G", factor: 1e9 },
    SiPrefix { symbol: "M", factor: 1e6 },
    SiPrefix { symbol: "k", factor: 1e3 },
    SiPrefix { symbol: "h", factor: 1e2 },
    SiPrefix { symbol: "d", factor: 1e-1 },
    SiPrefix { symbol: "c", factor: 1e-2 },
    SiPrefix { symbol: "m", factor: 1e-3 },
    SiPrefix { symbol: "u", factor: 1e-6 },
    SiPrefix { symbol: "n", factor: 1e-9 },
    SiPrefix { symbol: "p", factor: 1e-12 },
];

/// Seconds per year on the 365-day model calendar.
pub const SECONDS_PER_YEAR: f64 = 365.0 * SECONDS_PER_DAY;
pub const SECONDS_PER_DAY: f64 = 24.0 * 3600.0;
pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const SECONDS_PER_MINUTE: f64 = 60.0;

/// Molecular weight ratio CO2/C = 44/12.
pub const CO2_TO_C_RATIO: f64 = 44.0 / 12.0;
/// Molecular weight ratio C/CO2 = 12/44.
pub const C_TO_CO2_RATIO: f64 = 12.0 / 44.0;

/// Offset between the Celsius and Kelvin scales.
pub const CELSIUS_OFFSET: f64 = 273.15;

/// The global unit registry.
pub static UNIT_REGISTRY: LazyLock<UnitRegistry> = LazyLock::new(UnitRegistry::new);

/// Registry of known units with their dimensions and conversion factors.
#[derive(Debug)]
pub struct UnitRegistry {
    units: HashMap<&'static str, UnitInfo>,
    aliases: HashMap<&'static str, &'static str>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            units: HashMap::new(),
            aliases: HashMap::new(),
        };
        registry.register_base_units();
        registry.register_time_units();
        registry.register_carbon_units();
        registry.register_ratio_units();
        registry.register_derived_units();
        registry.register_temperature_units();
        registry
    }

    /// Looks up a unit by symbol, handling prefixes and aliases.
    pub fn lookup(&self, symbol: &str) -> Option<UnitInfo> {
        if let Some(info) = self.units.get(symbol) {
            return Some(info.clone());
        }

        if let Some(info) = self
            .aliases
            .get(symbol)
            .and_then(|canonical| self.units.get(canonical))
        {
            return Some(info.clone());
        }

        self.lookup_prefixed(symbol)
    }

    fn lookup_prefixed(&self, symbol: &str) -> Option<UnitInfo> {
        for prefix in SI_PREFIXES {
            let Some(base_symbol) = symbol.strip_prefix(prefix.symbol) else {
                continue;
            };
            let canonical = self
                .aliases
                .get(base_symbol)
                .copied()
                .unwrap_or(base_symbol);
            if let Some(base_info) = self.units.get(canonical) {
                // Prefixing an offset scale ("kdegC") is meaningless.
                if base_info.to_si_offset != 0.0 {
                    return None;
                }
                return Some(UnitInfo {
                    name: symbol.to_string(),
                    dimension: base_info.dimension,
                    to_si_factor: base_info.to_si_factor * prefix.factor,
                    to_si_offset: 0.0,
                    base_unit: Some(base_info.name.clone()),
                });
            }
        }
        None
    }

    fn register(&mut self, info: UnitInfo, symbol: &'static str) {
        self.units.insert(symbol, info);
    }

    fn register_base_units(&mut self) {
        self.register(UnitInfo::new("kg", Dimension::MASS, 1.0), "kg");
        self.register(UnitInfo::new("g", Dimension::MASS, 1e-3), "g");
        self.register(UnitInfo::new("t", Dimension::MASS, 1e3), "t");
        self.register(UnitInfo::new("m", Dimension::LENGTH, 1.0), "m");
        self.register(UnitInfo::new("s", Dimension::TIME, 1.0), "s");
        self.register(UnitInfo::new("K", Dimension::TEMPERATURE, 1.0), "K");
        self.register(UnitInfo::new("mol", Dimension::AMOUNT, 1.0), "mol");
        self.register(UnitInfo::new("A", Dimension::CURRENT, 1.0), "A");
        self.register(UnitInfo::new("1", Dimension::dimensionless(), 1.0), "1");

        self.aliases.insert("dimensionless", "1");
        self.aliases.insert("meter", "m");
        self.aliases.insert("meters", "m");
        self.aliases.insert("metre", "m");
        self.aliases.insert("kelvin", "K");
    }

    fn register_time_units(&mut self) {
        self.register(UnitInfo::new("yr", Dimension::TIME, SECONDS_PER_YEAR), "yr");
        self.register(UnitInfo::new("day", Dimension::TIME, SECONDS_PER_DAY), "day");
        self.register(UnitInfo::new("h", Dimension::TIME, SECONDS_PER_HOUR), "h");
        self.register(UnitInfo::new("min", Dimension::TIME, SECONDS_PER_MINUTE), "min");

        self.aliases.insert("year", "yr");
        self.aliases.insert("years", "yr");
        self.aliases.insert("y", "yr");
        self.aliases.insert("a", "yr");
        self.aliases.insert("d", "day");
        self.aliases.insert("days", "day");
        self.aliases.insert("hr", "h");
        self.aliases.insert("hour", "h");
        self.aliases.insert("hours", "h");
        self.aliases.insert("minute", "min");
        self.aliases.insert("minutes", "min");
        self.aliases.insert("sec", "s");
        self.aliases.insert("second", "s");
        self.aliases.insert("seconds", "s");
    }

    /// Carbon units are masses of carbon; CO2 units are scaled by the
    /// molecular weight ratio so the two are interconvertible.
    fn register_carbon_units(&mut self) {
        self.register(UnitInfo::new("C", Dimension::MASS, 1.0), "C");
        self.register(UnitInfo::with_base("gC", Dimension::MASS, 1e-3, "C"), "gC");
        self.register(UnitInfo::with_base("tC", Dimension::MASS, 1e3, "C"), "tC");
        self.register(UnitInfo::with_base("PgC", Dimension::MASS, 1e12, "C"), "PgC");
        self.register(UnitInfo::with_base("GtC", Dimension::MASS, 1e12, "C"), "GtC");

        self.register(
            UnitInfo::new("CO2", Dimension::MASS, C_TO_CO2_RATIO),
            "CO2",
        );
        self.register(
            UnitInfo::with_base("gCO2", Dimension::MASS, 1e-3 * C_TO_CO2_RATIO, "CO2"),
            "gCO2",
        );
        self.register(
            UnitInfo::with_base("GtCO2", Dimension::MASS, 1e12 * C_TO_CO2_RATIO, "CO2"),
            "GtCO2",
        );
    }

    /// Dimensionless ratios: fractions, percentages and mixing ratios.
    fn register_ratio_units(&mut self) {
        self.register(UnitInfo::new("%", Dimension::dimensionless(), 1e-2), "%");
        self.register(
            UnitInfo::new("ppm", Dimension::dimensionless(), 1e-6),
            "ppm",
        );
        self.register(
            UnitInfo::new("ppb", Dimension::dimensionless(), 1e-9),
            "ppb",
        );

        self.aliases.insert("percent", "%");
        self.aliases.insert("fraction", "1");
    }

    fn register_derived_units(&mut self) {
        self.register(UnitInfo::new("J", Dimension::ENERGY, 1.0), "J");
        self.register(UnitInfo::new("W", Dimension::POWER, 1.0), "W");
        self.register(UnitInfo::new("Pa", Dimension::PRESSURE, 1.0), "Pa");
    }

    /// `degC` is an absolute Celsius temperature; `delta_degC` is a
    /// temperature difference and converts to Kelvin without an offset.
    fn register_temperature_units(&mut self) {
        self.register(
            UnitInfo::with_offset("degC", Dimension::TEMPERATURE, 1.0, CELSIUS_OFFSET),
            "degC",
        );
        self.register(
            UnitInfo::new("delta_degC", Dimension::TEMPERATURE, 1.0),
            "delta_degC",
        );

        self.aliases.insert("celsius", "degC");
        self.aliases.insert("Celsius", "degC");
        self.aliases.insert("deg_C", "degC");
        self.aliases.insert("degrees_C", "degC");
        self.aliases.insert("degree_Celsius", "degC");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_unit_lookup() {
        let registry = UnitRegistry::new();

        let km = registry.lookup("km").expect("km should exist");
        assert_eq!(km.dimension, Dimension::LENGTH);
        assert!((km.to_si_factor - 1e3).abs() < f64::EPSILON);

        let mm = registry.lookup("mm").expect("mm should exist");
        assert!((mm.to_si_factor - 1e-3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_prefixed_carbon_units() {
        let registry = UnitRegistry::new();

        let kgc = registry.lookup("kgC").expect("kgC should exist");
        assert_eq!(kgc.dimension, Dimension::MASS);
        assert!((kgc.to_si_factor - 1.0).abs() < f64::EPSILON);
        assert_eq!(kgc.base_unit.as_deref(), Some("gC"));
    }

    #[test]
    fn test_time_aliases() {
        let registry = UnitRegistry::new();

        let d = registry.lookup("d").expect("d alias should work");
        assert!((d.to_si_factor - SECONDS_PER_DAY).abs() < f64::EPSILON);

        let year = registry.lookup("year").expect("year alias should work");
        assert!((year.to_si_factor - SECONDS_PER_YEAR).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percent_is_dimensionless() {
        let registry = UnitRegistry::new();

        let pct = registry.lookup("%").expect("% should exist");
        assert!(pct.dimension.is_dimensionless());
        assert!((pct.to_si_factor - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_celsius_carries_offset() {
        let registry = UnitRegistry::new();

        let degc = registry.lookup("degC").unwrap();
        assert!((degc.to_si_offset - CELSIUS_OFFSET).abs() < f64::EPSILON);
        assert!(registry.lookup("kdegC").is_none());

        let delta = registry.lookup("delta_degC").unwrap();
        assert_eq!(delta.to_si_offset, 0.0);
    }

    #[test]
    fn test_unknown_unit() {
        let registry = UnitRegistry::new();
        assert!(registry.lookup("furlong").is_none());
    }
}
