//! Resource quantities (`2`, `500m`, `128Ki`, `1.5Gi`).
//!
//! A `Quantity` is stored as an exact count of milli-units so that CPU
//! fractions and byte counts share one representation. Binary suffixes
//! (`Ki`..`Ei`) are powers of 1024, decimal suffixes (`k`..`E`) powers of
//! 1000, and `m` is one thousandth.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Well-known resource names.
pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const RESOURCE_NVIDIA_GPU: &str = "nvidia.com/gpu";

/// Resource name → quantity. Ordered so serialized output is stable.
pub type ResourceList = BTreeMap<String, Quantity>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct QuantityError {
    pub input: String,
    pub reason: &'static str,
}

/// An exact resource amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    milli: i128,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { milli: 0 };

    pub fn from_value(value: i64) -> Self {
        Self {
            milli: i128::from(value) * 1000,
        }
    }

    pub fn from_milli(milli: i64) -> Self {
        Self {
            milli: i128::from(milli),
        }
    }

    /// Whole units, rounded up (so `500m` is 1).
    pub fn value(&self) -> i64 {
        let whole = self.milli.div_euclid(1000) + i128::from(self.milli.rem_euclid(1000) != 0);
        clamp_i64(whole)
    }

    pub fn milli_value(&self) -> i64 {
        clamp_i64(self.milli)
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    /// `self - other`, never overflowing.
    pub fn saturating_sub(&self, other: &Quantity) -> Quantity {
        Quantity {
            milli: self.milli.saturating_sub(other.milli),
        }
    }

    /// Absolute difference between two quantities.
    pub fn abs_diff(&self, other: &Quantity) -> Quantity {
        Quantity {
            milli: (self.milli - other.milli).abs(),
        }
    }
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Multiplier (in whole units) for a suffix.
fn suffix_multiplier(suffix: &str) -> Option<(i128, i128)> {
    // (numerator, denominator) applied to the whole-unit value
    let m = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    };
    Some(m)
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| QuantityError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(err("empty"));
        }

        let (negative, body) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(split);
        if number.is_empty() {
            return Err(err("missing number"));
        }

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if frac_part.contains('.') || (int_part.is_empty() && frac_part.is_empty()) {
            return Err(err("malformed number"));
        }
        if int_part.len() + frac_part.len() > 30 {
            return Err(err("too many digits"));
        }

        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits.parse().map_err(|_| err("malformed number"))?;
        let scale = 10i128.pow(frac_part.len() as u32);

        let (num, den) = suffix_multiplier(suffix).ok_or_else(|| err("unknown suffix"))?;

        // milli = mantissa / scale * num / den * 1000, rounded up
        let numerator = mantissa
            .checked_mul(num)
            .and_then(|v| v.checked_mul(1000))
            .ok_or_else(|| err("out of range"))?;
        let denominator = scale * den;
        let mut milli = numerator / denominator;
        if numerator % denominator != 0 {
            milli += 1;
        }

        Ok(Quantity {
            milli: if negative { -milli } else { milli },
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % 1000 == 0 {
            write!(f, "{}", self.milli / 1000)
        } else {
            write!(f, "{}m", self.milli)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn parses_plain_and_milli() {
        assert_eq!(q("2").value(), 2);
        assert_eq!(q("2").milli_value(), 2000);
        assert_eq!(q("500m").milli_value(), 500);
        assert_eq!(q("500m").value(), 1);
        assert_eq!(q("1.5").milli_value(), 1500);
    }

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(q("128Ki").value(), 128 * 1024);
        assert_eq!(q("1Mi").value(), 1024 * 1024);
        assert_eq!(q("2048Mi").value(), 2048 * 1024 * 1024);
        assert_eq!(q("1.5Gi").value(), 3 * 512 * 1024 * 1024);
        assert_eq!(q("4k").value(), 4000);
        assert_eq!(q("1G").value(), 1_000_000_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Quantity>().is_err());
        assert!("Ki".parse::<Quantity>().is_err());
        assert!("12Xi".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
    }

    #[test]
    fn abs_diff_is_symmetric() {
        let a = q("8Gi");
        let b = a.saturating_sub(&q("64Ki"));
        assert_eq!(a.abs_diff(&b), q("64Ki"));
        assert_eq!(b.abs_diff(&a), q("64Ki"));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&q("1Ki")).unwrap();
        assert_eq!(json, "\"1024\"");
        let back: Quantity = serde_json::from_str("\"250m\"").unwrap();
        assert_eq!(back.milli_value(), 250);
    }
}
