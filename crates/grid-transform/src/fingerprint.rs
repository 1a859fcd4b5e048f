//! Coordinate fingerprints: the join key between a grid cell and its statistics.

use climate_common::{Coordinate, GridKind};

/// Canonical key of a coordinate and its MD5 digest (lower-case hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub key: String,
    pub hash: String,
}

/// Fingerprint a (grid kind, longitude, latitude) triple.
///
/// GCM coordinates are written with two fixed decimals, RCM coordinates
/// with four significant digits in general format.
pub fn fingerprint(kind: GridKind, lon: f64, lat: f64) -> Fingerprint {
    let key = canonical_key(kind, &Coordinate::new(lon, lat));
    let hash = format!("{:x}", md5::compute(key.as_bytes()));
    Fingerprint { key, hash }
}

pub fn canonical_key(kind: GridKind, coord: &Coordinate) -> String {
    let (lon, lat) = match kind {
        GridKind::Gcm => (format!("{:.2}", coord.lon), format!("{:.2}", coord.lat)),
        GridKind::Rcm => (format_general(coord.lon, 4), format_general(coord.lat, 4)),
    };
    format!("{}SRID=4326;POINT({} {})", kind.as_str(), lon, lat)
}

/// `%.<precision>g` formatting: `precision` significant digits, trailing
/// zeros stripped, exponent form when the decimal exponent falls outside
/// `-4 <= exp < precision`.
pub fn format_general(v: f64, precision: usize) -> String {
    if !v.is_finite() {
        return format!("{}", v);
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    // The exponent after rounding decides the notation.
    let sci = format!("{:.*e}", precision - 1, v);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= precision as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", strip_zeros(mantissa), sign, exp.unsigned_abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        strip_zeros(&format!("{:.*}", decimals, v)).to_string()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
