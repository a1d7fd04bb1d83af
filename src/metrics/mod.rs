pub mod buckets;
pub mod daily;
pub mod deploy;
pub mod history;
pub mod kpi;
pub mod roi;
pub mod rows;

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// One valuation observation. Timestamps are always normalized to UTC
/// before a sample reaches any calculator.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub portfolio_value: f64,
    pub invested_value: Option<f64>,
    pub total_returns: Option<f64>,
}

/// Heterogeneous raw field value as it comes out of storage or a JSON body.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Absent,
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Strict numeric conversion. `Ok(None)` for a missing value, `Err` for
    /// something present that is not a finite number.
    pub fn to_f64(&self) -> Result<Option<f64>, String> {
        match self {
            Scalar::Absent => Ok(None),
            Scalar::Number(v) if v.is_finite() => Ok(Some(*v)),
            Scalar::Number(v) => Err(format!("non-finite number {v}")),
            Scalar::Text(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
                if cleaned.is_empty() {
                    return Ok(None);
                }
                match cleaned.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(Some(v)),
                    _ => Err(format!("not a number: {s:?}")),
                }
            }
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(v)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

/// Percentage change from `base` to `value`; `0.0` when `base` is zero.
#[inline]
pub fn pct_change(base: f64, value: f64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    (value - base) / base * 100.0
}

/// Last close per UTC calendar day, oldest first.
pub(crate) fn utc_daily_closes(series: &[Sample]) -> Vec<(NaiveDate, f64)> {
    let mut closes = std::collections::BTreeMap::new();
    for s in series {
        closes.insert(s.timestamp.date_naive(), s.portfolio_value);
    }
    closes.into_iter().collect()
}

/// Equity of the last sample (in sequence order) at or before `t`.
pub fn equity_at_or_before(series: &[Sample], t: DateTime<Utc>) -> Option<f64> {
    series
        .iter()
        .rev()
        .find(|s| s.timestamp <= t)
        .map(|s| s.portfolio_value)
}

/// Start of a trailing window of `days` whole days ending at `now`.
/// `None` when the span or the result falls outside chrono's range.
pub fn window_start(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|span| now.checked_sub_signed(span))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Sample;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap()
    }

    pub fn at(ts: DateTime<Utc>, value: f64) -> Sample {
        Sample {
            timestamp: ts,
            portfolio_value: value,
            invested_value: None,
            total_returns: None,
        }
    }

    /// One sample per day at noon UTC starting from `t0()`.
    pub fn daily(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| at(t0() + Duration::days(i as i64), *v))
            .collect()
    }

    pub fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }
}
