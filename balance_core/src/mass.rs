//! Exact fixed-point mass in canonical milligrams.
//!
//! Values are held as integer micrograms (`i64`, 1 mg = 1000 µg). Wire text is parsed
//! straight into that integer; no floating-point intermediate ever touches a reading.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const UG_PER_MG: i64 = 1_000;

/// Units a balance may report. Everything is normalized to milligrams on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Kilogram,
    Gram,
    Milligram,
    Microgram,
}

impl Unit {
    /// Micrograms per one whole unit.
    #[inline]
    pub const fn ug_per_unit(self) -> i64 {
        match self {
            Unit::Kilogram => 1_000_000_000,
            Unit::Gram => 1_000_000,
            Unit::Milligram => 1_000,
            Unit::Microgram => 1,
        }
    }

    /// Fractional digits representable exactly at microgram resolution.
    #[inline]
    pub const fn max_fraction_digits(self) -> usize {
        match self {
            Unit::Kilogram => 9,
            Unit::Gram => 6,
            Unit::Milligram => 3,
            Unit::Microgram => 0,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Unit::Kilogram => "kg",
            Unit::Gram => "g",
            Unit::Milligram => "mg",
            Unit::Microgram => "ug",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = MassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kg" => Ok(Unit::Kilogram),
            "g" => Ok(Unit::Gram),
            "mg" => Ok(Unit::Milligram),
            "ug" | "µg" => Ok(Unit::Microgram),
            other => Err(MassError::UnknownUnit(other.to_string())),
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MassError {
    #[error("empty numeric field")]
    Empty,
    #[error("invalid numeric text {0:?}")]
    InvalidNumber(String),
    #[error("{text:?} has more precision than 1 ug in {unit}")]
    TooPrecise { text: String, unit: Unit },
    #[error("{0:?} is out of range")]
    Overflow(String),
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
}

/// A mass in canonical milligrams, stored as exact integer micrograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Milligrams(i64);

impl Milligrams {
    pub const ZERO: Milligrams = Milligrams(0);

    #[inline]
    pub const fn from_ug(ug: i64) -> Self {
        Self(ug)
    }

    #[inline]
    pub const fn as_ug(self) -> i64 {
        self.0
    }

    /// Parse decimal text expressed in `unit` into canonical milligrams.
    ///
    /// Accepts `[+-]digits[.digits]`. Trailing fractional zeros beyond the unit's
    /// microgram resolution are allowed; any other excess precision is rejected.
    pub fn parse_decimal(text: &str, unit: Unit) -> Result<Self, MassError> {
        let t = text.trim();
        if t.is_empty() {
            return Err(MassError::Empty);
        }
        let (negative, digits) = match t.as_bytes()[0] {
            b'-' => (true, &t[1..]),
            b'+' => (false, &t[1..]),
            _ => (false, t),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => {
                if f.is_empty() {
                    return Err(MassError::InvalidNumber(t.to_string()));
                }
                (i, f)
            }
            None => (digits, ""),
        };
        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(MassError::InvalidNumber(t.to_string()));
        }

        let frac = frac_part.trim_end_matches('0');
        if frac.len() > unit.max_fraction_digits() {
            return Err(MassError::TooPrecise {
                text: t.to_string(),
                unit,
            });
        }

        let overflow = || MassError::Overflow(t.to_string());
        let scale = unit.ug_per_unit();
        let int_val: i64 = int_part.parse().map_err(|_| overflow())?;
        let mut ug = int_val.checked_mul(scale).ok_or_else(overflow)?;
        if !frac.is_empty() {
            let frac_val: i64 = frac.parse().map_err(|_| overflow())?;
            let frac_scale = scale / 10_i64.pow(frac.len() as u32);
            ug = ug
                .checked_add(frac_val.checked_mul(frac_scale).ok_or_else(overflow)?)
                .ok_or_else(overflow)?;
        }
        Ok(Self(if negative { -ug } else { ug }))
    }

    /// Absolute difference in micrograms, without overflow.
    #[inline]
    pub fn abs_diff_ug(self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Milligrams {
    /// Canonical milligrams, at least two decimals, trailing zeros trimmed beyond that.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let int = abs / UG_PER_MG as u64;
        let frac = format!("{:03}", abs % UG_PER_MG as u64);
        let frac = match frac.trim_end_matches('0') {
            t if t.len() < 2 => &frac[..2],
            t => t,
        };
        write!(f, "{sign}{int}.{frac}")
    }
}

impl FromStr for Milligrams {
    type Err = MassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_decimal(s, Unit::Milligram)
    }
}

impl Serialize for Milligrams {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Milligrams {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Quantize a floating-point milligram setting (from config) to micrograms, rounding to
/// nearest and clamping to the `i64` range. Non-finite values map to 0.
///
/// Only configuration tolerances take this path; readings never do.
#[inline]
pub fn quantize_mg_to_ug(x_mg: f64) -> i64 {
    if !x_mg.is_finite() {
        return 0;
    }
    let scaled = (x_mg * UG_PER_MG as f64).round();
    if scaled >= i64::MAX as f64 {
        i64::MAX
    } else if scaled <= i64::MIN as f64 {
        i64::MIN
    } else {
        scaled as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit_exactly() {
        let mg = |s, u| Milligrams::parse_decimal(s, u).unwrap().as_ug();
        assert_eq!(mg("100.05", Unit::Milligram), 100_050);
        assert_eq!(mg("0.10005", Unit::Gram), 100_050);
        assert_eq!(mg("1.5", Unit::Kilogram), 1_500_000_000);
        assert_eq!(mg("250", Unit::Microgram), 250);
        assert_eq!(mg("-0.002", Unit::Gram), -2_000);
        assert_eq!(mg("+7", Unit::Milligram), 7_000);
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        assert_eq!(
            Milligrams::parse_decimal("100.05000", Unit::Milligram)
                .unwrap()
                .as_ug(),
            100_050
        );
    }

    #[test]
    fn rejects_precision_below_one_microgram() {
        let err = Milligrams::parse_decimal("100.0501", Unit::Milligram).unwrap_err();
        assert!(matches!(err, MassError::TooPrecise { .. }));
    }

    #[test]
    fn rejects_non_decimal_text() {
        for bad in ["", " ", "1e3", "12.", ".5", "1.2.3", "--1", "0x10", "1,5", "NaN"] {
            assert!(
                Milligrams::parse_decimal(bad, Unit::Gram).is_err(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn rejects_overflow() {
        let err = Milligrams::parse_decimal("99999999999999", Unit::Kilogram).unwrap_err();
        assert!(matches!(err, MassError::Overflow(_)));
    }

    #[test]
    fn display_is_canonical_milligrams() {
        assert_eq!(Milligrams::from_ug(100_050).to_string(), "100.05");
        assert_eq!(Milligrams::from_ug(500).to_string(), "0.50");
        assert_eq!(Milligrams::from_ug(1).to_string(), "0.001");
        assert_eq!(Milligrams::from_ug(100_000).to_string(), "100.00");
        assert_eq!(Milligrams::from_ug(-1_250).to_string(), "-1.25");
        assert_eq!(Milligrams::ZERO.to_string(), "0.00");
    }

    #[test]
    fn abs_diff_handles_extremes() {
        let a = Milligrams::from_ug(i64::MIN);
        let b = Milligrams::from_ug(i64::MAX);
        assert_eq!(a.abs_diff_ug(b), u64::MAX);
    }

    #[test]
    fn quantize_config_tolerance() {
        assert_eq!(quantize_mg_to_ug(0.5), 500);
        assert_eq!(quantize_mg_to_ug(0.0004), 0);
        assert_eq!(quantize_mg_to_ug(f64::NAN), 0);
        assert_eq!(quantize_mg_to_ug(f64::INFINITY), 0);
    }

    #[test]
    fn unit_tokens_round_trip() {
        for u in [Unit::Kilogram, Unit::Gram, Unit::Milligram, Unit::Microgram] {
            assert_eq!(u.as_str().parse::<Unit>().unwrap(), u);
        }
        assert_eq!("µg".parse::<Unit>().unwrap(), Unit::Microgram);
        assert!("lb".parse::<Unit>().is_err());
    }
}
