use crate::metrics::{pct_change, window_start, Sample};
use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;

/// Parallel columns for the invested-vs-value chart.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct TimeseriesView {
    pub timestamps: Vec<DateTime<Utc>>,
    pub invested_value: Vec<Option<f64>>,
    pub portfolio_value: Vec<f64>,
    pub total_returns: Vec<Option<f64>>,
    /// Portfolio value minus invested capital.
    pub returns_diff: Vec<Option<f64>>,
}

pub fn timeseries_view(series: &[Sample]) -> TimeseriesView {
    let mut view = TimeseriesView::default();
    for s in series {
        view.timestamps.push(s.timestamp);
        view.invested_value.push(s.invested_value);
        view.portfolio_value.push(s.portfolio_value);
        view.total_returns.push(s.total_returns);
        view.returns_diff.push(s.invested_value.map(|inv| s.portfolio_value - inv));
    }
    view
}

/// Samples no older than `days` before `now`. A window reaching past
/// chrono's range keeps the whole series.
pub fn trailing_window(series: &[Sample], days: i64, now: DateTime<Utc>) -> &[Sample] {
    let Some(cutoff) = window_start(now, days) else {
        return series;
    };
    let start = series.partition_point(|s| s.timestamp < cutoff);
    &series[start..]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    All,
}

impl HistoryRange {
    pub fn span(&self) -> Option<Duration> {
        match self {
            Self::OneDay => Some(Duration::days(1)),
            Self::ThreeDays => Some(Duration::days(3)),
            Self::OneWeek => Some(Duration::days(7)),
            Self::OneMonth => Some(Duration::days(30)),
            Self::ThreeMonths => Some(Duration::days(90)),
            Self::SixMonths => Some(Duration::days(180)),
            Self::OneYear => Some(Duration::days(365)),
            Self::All => None,
        }
    }
}

impl FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1D" => Ok(Self::OneDay),
            "3D" => Ok(Self::ThreeDays),
            "1W" => Ok(Self::OneWeek),
            "1M" => Ok(Self::OneMonth),
            "3M" => Ok(Self::ThreeMonths),
            "6M" => Ok(Self::SixMonths),
            "1Y" => Ok(Self::OneYear),
            "ALL" => Ok(Self::All),
            other => Err(format!("unknown range {other:?}")),
        }
    }
}

/// Cumulative ROI history with a straight reference line from zero to the
/// final value.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HistoryView {
    pub labels: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
    pub linear_avg: Vec<f64>,
}

pub fn history_view(series: &[Sample], range: HistoryRange) -> HistoryView {
    let (first, last) = match (series.first(), series.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return HistoryView::default(),
    };

    // Cutoff is relative to the newest sample, not wall-clock time.
    let start = range
        .span()
        .and_then(|span| last.timestamp.checked_sub_signed(span))
        .and_then(|cutoff| series.iter().position(|s| s.timestamp >= cutoff))
        .unwrap_or(0);

    let window = &series[start..];
    let values: Vec<f64> = window
        .iter()
        .map(|s| pct_change(first.portfolio_value, s.portfolio_value))
        .collect();

    HistoryView {
        labels: window.iter().map(|s| s.timestamp).collect(),
        linear_avg: linear_line(&values),
        values,
    }
}

fn linear_line(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let Some(&final_value) = values.last() else {
        return Vec::new();
    };
    if n == 1 {
        return vec![final_value];
    }
    (0..n)
        .map(|i| i as f64 / (n - 1) as f64 * final_value)
        .collect()
}
