//! ROI normalization.
//!
//! Upstream writers record ROI as `"8.5%"`, `8.5` or `0.085` depending on
//! which job produced the row. Everything is brought to a signed fraction:
//!
//!   |x| > 1  => x / 100   (whole-number percent)
//!   |x| <= 1 => x         (already a fraction)
//!
//! Exactly 100% (`1.0` / `-1.0`) is ambiguous and is kept as a fraction.

use crate::metrics::Scalar;

/// Normalize a raw ROI value. Never fails: anything unparseable is `None`.
pub fn normalize(raw: &Scalar) -> Option<f64> {
    let value = match raw {
        Scalar::Absent => return None,
        Scalar::Number(v) => *v,
        Scalar::Text(s) => parse_roi_text(s)?,
    };

    if !value.is_finite() {
        return None;
    }

    Some(if value.abs() > 1.0 { value / 100.0 } else { value })
}

fn parse_roi_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed);
    let cleaned: String = trimmed
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}
