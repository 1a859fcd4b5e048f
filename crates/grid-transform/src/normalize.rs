//! Unit-aware normalization of raw samples into storage-ready values.

use crate::error::{Result, TransformError};
use climate_common::{NormalizedValue, RawValue, Unit};

/// Normalize a raw sample according to its declared unit.
///
/// | unit | rule |
/// |---|---|
/// | days | whole days, truncated |
/// | °C, likelihood | one fractional digit, half-even on the shortest repr |
/// | cm, percent | pass through |
/// | z-score | one fractional digit, half-even on the shortest repr |
/// | raw | truncated integer |
pub fn normalize(raw: RawValue, unit: Unit) -> Result<NormalizedValue> {
    let v = match raw {
        RawValue::Duration(delta) if unit == Unit::Days => {
            return Ok(NormalizedValue::Integer(delta.num_days()));
        }
        RawValue::Duration(_) => return Err(malformed(raw, unit)),
        RawValue::Number(v) if !v.is_finite() => return Err(malformed(raw, unit)),
        RawValue::Number(v) => v,
    };

    Ok(match unit {
        Unit::Days | Unit::Raw => {
            NormalizedValue::Integer(truncate(v).ok_or_else(|| malformed(raw, unit))?)
        }
        Unit::DegreesCelsius | Unit::Likelihood => NormalizedValue::Decimal(round_decimal(v, 1)),
        Unit::Centimeters | Unit::Percent => NormalizedValue::Float(v),
        Unit::ZScore => NormalizedValue::Decimal(round_decimal(v, 1)),
    })
}

/// Normalize against a unit given as text. Unknown tags fail with
/// [`CommonError::NoMatchingUnit`].
pub fn normalize_tagged(raw: RawValue, unit: &str) -> Result<NormalizedValue> {
    let unit = unit.parse::<Unit>()?;
    normalize(raw, unit)
}

/// Round `v` to `places` fractional digits, half-to-even on the shortest
/// decimal representation, keeping trailing zeros.
pub fn round_decimal(v: f64, places: usize) -> String {
    let shortest = format!("{}", v);
    let (negative, digits) = match shortest.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, shortest.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));

    if frac_part.len() <= places {
        let mut out = String::with_capacity(digits.len() + places + 2);
        if negative {
            out.push('-');
        }
        out.push_str(int_part);
        if places > 0 {
            out.push('.');
            out.push_str(frac_part);
            out.extend(std::iter::repeat('0').take(places - frac_part.len()));
        }
        return out;
    }

    let (kept, rest) = frac_part.split_at(places);
    let mut number: Vec<u8> = int_part.bytes().chain(kept.bytes()).collect();
    let first = rest.as_bytes()[0];
    let tail_nonzero = rest.bytes().skip(1).any(|b| b != b'0');
    let last_odd = number.last().map(|d| (d - b'0') % 2 == 1).unwrap_or(false);
    let round_up = first > b'5' || (first == b'5' && (tail_nonzero || last_odd));

    if round_up {
        let mut i = number.len();
        loop {
            if i == 0 {
                number.insert(0, b'1');
                break;
            }
            i -= 1;
            if number[i] == b'9' {
                number[i] = b'0';
            } else {
                number[i] += 1;
                break;
            }
        }
    }

    let split = number.len() - places;
    let mut out = String::with_capacity(number.len() + 2);
    if negative {
        out.push('-');
    }
    out.push_str(std::str::from_utf8(&number[..split]).unwrap_or("0"));
    if places > 0 {
        out.push('.');
        out.push_str(std::str::from_utf8(&number[split..]).unwrap_or("0"));
    }
    out
}

/// Round to one fractional digit on the exact binary value.
pub fn round_tenths(v: f64) -> f64 {
    format!("{:.1}", v).parse().unwrap_or(v)
}

fn truncate(v: f64) -> Option<i64> {
    let t = v.trunc();
    if t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

fn malformed(raw: RawValue, unit: Unit) -> TransformError {
    let value = match raw {
        RawValue::Number(v) => v.to_string(),
        RawValue::Duration(d) => format!("{}s", d.num_seconds()),
    };
    TransformError::MalformedSample {
        value,
        unit: unit.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use climate_common::CommonError;

    #[test]
    fn test_celsius_float32_noise() {
        let v = normalize(RawValue::Number(28.000000119209289550781250), Unit::DegreesCelsius).unwrap();
        assert_eq!(v, NormalizedValue::Decimal("28.0".to_string()));
    }

    #[test]
    fn test_days_from_duration() {
        let v = normalize(RawValue::Duration(TimeDelta::seconds(172_800)), Unit::Days).unwrap();
        assert_eq!(v, NormalizedValue::Integer(2));
        let v = normalize(RawValue::Duration(TimeDelta::seconds(172_799)), Unit::Days).unwrap();
        assert_eq!(v, NormalizedValue::Integer(1));
    }

    #[test]
    fn test_days_from_number_truncates() {
        assert_eq!(normalize(RawValue::Number(12.9), Unit::Days).unwrap(), NormalizedValue::Integer(12));
        assert_eq!(normalize(RawValue::Number(-3.7), Unit::Raw).unwrap(), NormalizedValue::Integer(-3));
    }

    #[test]
    fn test_pass_through_units() {
        assert_eq!(normalize(RawValue::Number(12.345), Unit::Centimeters).unwrap(), NormalizedValue::Float(12.345));
        assert_eq!(normalize(RawValue::Number(55.5), Unit::Percent).unwrap(), NormalizedValue::Float(55.5));
    }

    #[test]
    fn test_z_score() {
        assert_eq!(normalize(RawValue::Number(1.26), Unit::ZScore).unwrap(), NormalizedValue::Decimal("1.3".to_string()));
        assert_eq!(normalize(RawValue::Number(-2.0), Unit::ZScore).unwrap(), NormalizedValue::Decimal("-2.0".to_string()));

        // Same tie rule as degrees Celsius.
        for v in [0.15, 0.25, -0.35] {
            assert_eq!(
                normalize(RawValue::Number(v), Unit::ZScore).unwrap(),
                normalize(RawValue::Number(v), Unit::DegreesCelsius).unwrap()
            );
        }
        assert_eq!(normalize(RawValue::Number(0.15), Unit::ZScore).unwrap(), NormalizedValue::Decimal("0.2".to_string()));
    }

    #[test]
    fn test_unknown_unit_fails() {
        for raw in [RawValue::Number(1.0), RawValue::Number(0.0), RawValue::Duration(TimeDelta::days(1))] {
            assert_eq!(
                normalize_tagged(raw, "kelvin"),
                Err(TransformError::Common(CommonError::NoMatchingUnit("kelvin".to_string())))
            );
        }
    }

    #[test]
    fn test_non_finite_is_malformed() {
        assert!(matches!(
            normalize(RawValue::Number(f64::INFINITY), Unit::Days),
            Err(TransformError::MalformedSample { .. })
        ));
        assert!(matches!(
            normalize(RawValue::Duration(TimeDelta::days(1)), Unit::Percent),
            Err(TransformError::MalformedSample { .. })
        ));
    }

    #[test]
    fn test_round_decimal() {
        assert_eq!(round_decimal(28.0, 1), "28.0");
        assert_eq!(round_decimal(0.25, 1), "0.2");
        assert_eq!(round_decimal(0.35, 1), "0.4");
        assert_eq!(round_decimal(0.251, 1), "0.3");
        assert_eq!(round_decimal(9.96, 1), "10.0");
        assert_eq!(round_decimal(-0.05, 1), "-0.0");
        assert_eq!(round_decimal(-1.15, 1), "-1.2");
        assert_eq!(round_decimal(3.0, 0), "3");
        assert_eq!(round_decimal(2.5, 0), "2");
    }

    #[test]
    fn test_round_tenths() {
        assert_eq!(round_tenths(0.34), 0.3);
        assert_eq!(round_tenths(99.96), 100.0);
        assert_eq!(round_tenths(4.0), 4.0);
    }
}
