//! Conversion of raw storage records into typed samples.
//!
//! A record that fails conversion is skipped and reported, never fatal for
//! the rest of the sequence.

use crate::metrics::{Sample, Scalar};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Raw portfolio valuation row.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SampleRecord {
    pub timestamp: String,
    #[serde(default)]
    pub portfolio_value: Scalar,
    #[serde(default)]
    pub invested_value: Scalar,
    #[serde(default)]
    pub total_returns: Scalar,
}

/// Raw deployment row. `fields` carries the `<asset>_roi` columns.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DeployRecord {
    pub timestamp: String,
    #[serde(default)]
    pub balance: Scalar,
    #[serde(default)]
    pub roi: Scalar,
    #[serde(default)]
    pub benchmark_close: Scalar,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Scalar>,
}

/// One deployment observation after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRow {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    /// Portfolio ROI as a fraction.
    pub roi: Option<f64>,
    pub benchmark_close: Option<f64>,
    /// Raw `<asset>_roi` values, normalized lazily.
    pub asset_rois: BTreeMap<String, Scalar>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SkippedRow {
    pub index: usize,
    pub reason: String,
}

/// Parsed rows plus the diagnostics for records that were dropped.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub rows: Vec<T>,
    pub skipped: Vec<SkippedRow>,
}

impl<T> Parsed<T> {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Parse a timestamp. Offsets are honored; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Storage form of a timestamp: RFC 3339 in UTC with millisecond precision,
/// so text order matches time order.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse every record. Rows come back in ascending time order whatever the
/// storage order was; equal instants keep their input order.
pub fn parse_samples<I>(records: I) -> Parsed<Sample>
where
    I: IntoIterator<Item = SampleRecord>,
{
    let mut out = Parsed::default();
    for (index, record) in records.into_iter().enumerate() {
        match parse_sample(&record) {
            Ok(sample) => out.rows.push(sample),
            Err(reason) => out.skipped.push(SkippedRow { index, reason }),
        }
    }
    out.rows.sort_by_key(|s| s.timestamp);
    out
}

pub fn parse_sample(record: &SampleRecord) -> Result<Sample, String> {
    let timestamp = parse_timestamp(&record.timestamp)
        .ok_or_else(|| format!("timestamp: unrecognized {:?}", record.timestamp))?;
    let portfolio_value = record
        .portfolio_value
        .to_f64()
        .map_err(|e| format!("portfolio_value: {e}"))?
        .ok_or_else(|| "portfolio_value: missing".to_string())?;
    let invested_value = record
        .invested_value
        .to_f64()
        .map_err(|e| format!("invested_value: {e}"))?;
    let total_returns = record
        .total_returns
        .to_f64()
        .map_err(|e| format!("total_returns: {e}"))?;

    Ok(Sample {
        timestamp,
        portfolio_value,
        invested_value,
        total_returns,
    })
}

pub fn parse_deploy_rows<I>(records: I) -> Parsed<DeployRow>
where
    I: IntoIterator<Item = DeployRecord>,
{
    let mut out = Parsed::default();
    for (index, record) in records.into_iter().enumerate() {
        match parse_deploy_row(record) {
            Ok(row) => out.rows.push(row),
            Err(reason) => out.skipped.push(SkippedRow { index, reason }),
        }
    }
    out.rows.sort_by_key(|r| r.timestamp);
    out
}

pub fn parse_deploy_row(record: DeployRecord) -> Result<DeployRow, String> {
    let timestamp = parse_timestamp(&record.timestamp)
        .ok_or_else(|| format!("timestamp: unrecognized {:?}", record.timestamp))?;
    let balance = record
        .balance
        .to_f64()
        .map_err(|e| format!("balance: {e}"))?
        .ok_or_else(|| "balance: missing".to_string())?;
    let benchmark_close = record
        .benchmark_close
        .to_f64()
        .map_err(|e| format!("benchmark_close: {e}"))?;
    let roi = crate::metrics::roi::normalize(&record.roi);

    let asset_rois = record
        .fields
        .into_iter()
        .filter(|(key, _)| key.ends_with("_roi"))
        .collect();

    Ok(DeployRow {
        timestamp,
        balance,
        roi,
        benchmark_close,
        asset_rois,
    })
}
