//! CF time units and calendar conversion.
//!
//! Every time axis is converted on read to days since 1850-01-01 on a
//! 365-day ("noleap") calendar, so that series from models with different
//! calendars and reference dates can be compared directly.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use regex::Regex;

use crate::errors::{IlambError, IlambResult};

/// Year of day zero of the model time axis.
pub const REFERENCE_YEAR: i32 = 1850;

/// Days in a model year.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Units string written for model time axes.
pub const TIME_UNITS: &str = "days since 1850-01-01 00:00:00";

/// Calendar name written for model time axes.
pub const TIME_CALENDAR: &str = "noleap";

/// Month boundaries of a 365-day year, in days from January 1st.
pub const MONTH_BOUNDARIES: [f64; 13] = [
    0.0, 31.0, 59.0, 90.0, 120.0, 151.0, 181.0, 212.0, 243.0, 273.0, 304.0, 334.0, 365.0,
];

static TIME_UNITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\w+)\s+since\s+(-?\d{1,4})-(\d{1,2})-(\d{1,2})(?:[ T]+(\d{1,2}):(\d{1,2})(?::(\d{1,2}(?:\.\d*)?))?)?",
    )
    .expect("time units pattern is valid")
});

/// Calendars understood by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    /// `noleap` / `365_day`
    NoLeap,
    /// `all_leap` / `366_day`
    AllLeap,
    /// `360_day`
    Day360,
    /// `standard`, `gregorian`, `proleptic_gregorian`, `julian`
    Gregorian,
}

impl Calendar {
    /// Parses a CF calendar attribute. Absent or unrecognised calendars are
    /// read as Gregorian, the CF default.
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
            Some("noleap" | "365_day" | "no_leap") => Self::NoLeap,
            Some("all_leap" | "366_day") => Self::AllLeap,
            Some("360_day") => Self::Day360,
            _ => Self::Gregorian,
        }
    }

    fn days_per_year(self) -> f64 {
        match self {
            Self::NoLeap | Self::Gregorian => 365.0,
            Self::AllLeap => 366.0,
            Self::Day360 => 360.0,
        }
    }

    /// Day of year (from zero) of a month/day pair in a fixed-length calendar.
    fn day_of_year(self, month: u32, day: u32) -> f64 {
        let m = (month.clamp(1, 12) - 1) as usize;
        let d = f64::from(day.max(1) - 1);
        match self {
            Self::Day360 => m as f64 * 30.0 + d,
            Self::AllLeap => MONTH_BOUNDARIES[m] + if m >= 2 { 1.0 } else { 0.0 } + d,
            Self::NoLeap | Self::Gregorian => MONTH_BOUNDARIES[m] + d,
        }
    }
}

/// A parsed `<unit> since <date>` time specification.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnits {
    /// Length of one unit in days.
    unit_days: f64,
    reference: NaiveDateTime,
    /// Year, month and day exactly as written in the units string.
    reference_fields: (i32, u32, u32),
    calendar: Calendar,
}

impl TimeUnits {
    pub fn parse(units: &str, calendar: Option<&str>) -> IlambResult<Self> {
        let caps = TIME_UNITS_RE
            .captures(units)
            .ok_or_else(|| IlambError::TimeUnits(units.to_string()))?;

        let unit_days = match caps[1].to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => 1.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 1.0 / 24.0,
            "minutes" | "minute" | "mins" | "min" => 1.0 / 1440.0,
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0 / 86400.0,
            _ => return Err(IlambError::TimeUnits(units.to_string())),
        };

        let bad = || IlambError::TimeUnits(units.to_string());
        let year: i32 = caps[2].parse().map_err(|_| bad())?;
        let month: u32 = caps[3].parse().map_err(|_| bad())?;
        let day: u32 = caps[4].parse().map_err(|_| bad())?;
        let hour: u32 = caps.get(5).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| bad())?;
        let minute: u32 = caps.get(6).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| bad())?;
        let second: f64 = caps
            .get(7)
            .map_or(Ok(0.0), |m| m.as_str().parse())
            .map_err(|_| bad())?;

        // 360-day calendars have a 30th of February, which chrono rejects.
        // The datetime only feeds Gregorian arithmetic and the time of day.
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .or_else(|| NaiveDate::from_ymd_opt(year, month, 28))
            .ok_or_else(bad)?;
        let reference = date.and_hms_opt(hour, minute, 0).ok_or_else(bad)?
            + TimeDelta::milliseconds((second * 1000.0).round() as i64);

        Ok(Self {
            unit_days,
            reference,
            reference_fields: (year, month, day),
            calendar: Calendar::parse(calendar),
        })
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    /// Converts a raw time value to days since 1850-01-01 (noleap).
    ///
    /// # Errors
    ///
    /// [`IlambError::TimeUnits`] for non-finite values and for values that
    /// fall outside the representable date range, such as fill values left
    /// in unwritten time slots.
    pub fn to_model_days(&self, value: f64) -> IlambResult<f64> {
        let out_of_range = || IlambError::TimeUnits(format!("time value {value} is out of range"));
        if !value.is_finite() {
            return Err(out_of_range());
        }
        let offset = value * self.unit_days;
        match self.calendar {
            Calendar::NoLeap => Ok(self.reference_fixed_days() + offset),
            Calendar::AllLeap | Calendar::Day360 => {
                let length = self.calendar.days_per_year();
                let t = self.reference_fixed_days() + offset;
                let year = (t / length).floor();
                let doy = t - year * length;
                Ok(year * DAYS_PER_YEAR + doy * DAYS_PER_YEAR / length)
            }
            Calendar::Gregorian => {
                let millis = (offset * 86_400_000.0).round();
                if millis.abs() >= i64::MAX as f64 {
                    return Err(out_of_range());
                }
                let when = TimeDelta::try_milliseconds(millis as i64)
                    .and_then(|delta| self.reference.checked_add_signed(delta))
                    .ok_or_else(out_of_range)?;
                Ok(noleap_days(&when))
            }
        }
    }

    /// Reference date as days since 1850 within this fixed-length calendar.
    fn reference_fixed_days(&self) -> f64 {
        let (year, month, day) = self.reference_fields;
        f64::from(year - REFERENCE_YEAR) * self.calendar.days_per_year()
            + self.calendar.day_of_year(month, day)
            + day_fraction(&self.reference)
    }
}

fn day_fraction(when: &NaiveDateTime) -> f64 {
    f64::from(when.num_seconds_from_midnight()) / 86400.0
        + f64::from(when.nanosecond()) / 86_400e9
}

/// Days since 1850-01-01 on the noleap calendar for a Gregorian datetime.
/// February 29th folds onto March 1st.
fn noleap_days(when: &NaiveDateTime) -> f64 {
    f64::from(when.year() - REFERENCE_YEAR) * DAYS_PER_YEAR
        + Calendar::NoLeap.day_of_year(when.month(), when.day())
        + day_fraction(when)
}

/// Time shift in days for a model-year remapping.
///
/// `(y0, yf)` maps model year `y0` onto `yf`; any slice that is not exactly
/// two years long means no shift.
pub fn model_year_shift(model_year: &[i32]) -> f64 {
    match model_year {
        [y0, yf] => f64::from(yf - y0) * DAYS_PER_YEAR,
        _ => 0.0,
    }
}

/// Builds bounds for a time axis that has none, splitting at midpoints and
/// mirroring the first and last half-steps.
pub fn bounds_from_midpoints(times: &[f64]) -> Vec<[f64; 2]> {
    match times.len() {
        0 => Vec::new(),
        1 => vec![[times[0] - 0.5, times[0] + 0.5]],
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(times[0] - 0.5 * (times[1] - times[0]));
            edges.extend(times.windows(2).map(|w| 0.5 * (w[0] + w[1])));
            edges.push(times[n - 1] + 0.5 * (times[n - 1] - times[n - 2]));
            edges.windows(2).map(|w| [w[0], w[1]]).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_noleap_reference_1850() {
        let units = TimeUnits::parse("days since 1850-01-01", Some("noleap")).unwrap();
        assert_eq!(units.to_model_days(15.5).unwrap(), 15.5);
    }

    #[test]
    fn test_noleap_later_reference() {
        let units = TimeUnits::parse("days since 2000-03-01 00:00:00", Some("365_day")).unwrap();
        let expected = 150.0 * 365.0 + 59.0;
        assert_relative_eq!(units.to_model_days(0.0).unwrap(), expected);
    }

    #[test]
    fn test_hours_since() {
        let units = TimeUnits::parse("hours since 1850-01-02 12:00", Some("noleap")).unwrap();
        assert_relative_eq!(units.to_model_days(12.0).unwrap(), 2.0);
    }

    #[test]
    fn test_gregorian_skips_leap_days() {
        // 1852 is a leap year; 366 Gregorian days after 1852-01-01 is
        // 1853-01-01, which is exactly 3 noleap years after 1850.
        let units = TimeUnits::parse("days since 1852-01-01", Some("gregorian")).unwrap();
        assert_relative_eq!(units.to_model_days(366.0).unwrap(), 3.0 * 365.0);
    }

    #[test]
    fn test_360_day_calendar() {
        let units = TimeUnits::parse("days since 1850-01-01", Some("360_day")).unwrap();
        // Mid-year in a 360-day calendar is mid-year in the model calendar.
        assert_relative_eq!(units.to_model_days(180.0).unwrap(), 182.5);
        assert_relative_eq!(units.to_model_days(360.0).unwrap(), 365.0);
    }

    #[test]
    fn test_360_day_reference_on_february_30th() {
        let units = TimeUnits::parse("days since 1850-02-30", Some("360_day")).unwrap();
        assert_relative_eq!(units.to_model_days(0.0).unwrap(), 59.0 * 365.0 / 360.0);
    }

    #[test]
    fn test_fill_value_times_are_an_error() {
        let units = TimeUnits::parse("days since 1850-01-01", Some("standard")).unwrap();
        assert!(matches!(
            units.to_model_days(9.969209968386869e36),
            Err(IlambError::TimeUnits(_))
        ));
        assert!(units.to_model_days(f64::NAN).is_err());

        let noleap = TimeUnits::parse("days since 1850-01-01", Some("noleap")).unwrap();
        assert!(noleap.to_model_days(f64::INFINITY).is_err());
    }

    #[test]
    fn test_unsupported_units() {
        assert!(matches!(
            TimeUnits::parse("months since 1850-01-01", None),
            Err(IlambError::TimeUnits(_))
        ));
        assert!(TimeUnits::parse("kelvin", None).is_err());
    }

    #[test]
    fn test_model_year_shift() {
        assert_eq!(model_year_shift(&[1850, 1900]), 50.0 * 365.0);
        assert_eq!(model_year_shift(&[]), 0.0);
        assert_eq!(model_year_shift(&[1850]), 0.0);
        assert_eq!(model_year_shift(&[1850, 1900, 1950]), 0.0);
    }

    #[test]
    fn test_bounds_from_midpoints() {
        let bounds = bounds_from_midpoints(&[15.0, 45.0, 75.0]);
        assert_eq!(bounds, vec![[0.0, 30.0], [30.0, 60.0], [60.0, 90.0]]);
    }
}
