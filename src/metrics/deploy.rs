use crate::errors::{MetricsError, MetricsResult};
use crate::metrics::kpi::max_drawdown_pct;
use crate::metrics::pct_change;
use crate::metrics::roi::normalize;
use crate::metrics::rows::DeployRow;
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, BTreeSet};

const ROI_SUFFIX: &str = "_roi";

#[derive(Debug, Clone, Copy)]
pub struct StopLossParams {
    /// Loss level as a fraction, e.g. -0.085.
    pub threshold: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeployKpis {
    pub total_return_pct: f64,
    /// Drawdown of the `1 + roi` curve, not of the raw balance.
    pub max_drawdown_pct: f64,
    pub benchmark_return_pct: Option<f64>,
    /// Population standard deviation of ROI, in percent.
    pub volatility_pct: f64,
    pub stop_loss_count: usize,
    pub avg_roi_pct: Option<f64>,
    pub lowest_roi_pct: Option<f64>,
    pub latest_balance: f64,
    pub samples: usize,
}

/// Everything the deployment detail view needs, index-aligned on `timestamps`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeployReport {
    pub kpis: DeployKpis,
    pub timestamps: Vec<DateTime<Utc>>,
    pub balance: Vec<f64>,
    pub roi: Vec<Option<f64>>,
    pub asset_series: BTreeMap<String, Vec<Option<f64>>>,
}

pub fn compute_deploy(
    rows: &[DeployRow],
    stop_loss: &StopLossParams,
    aggregate_columns: &[String],
) -> MetricsResult<DeployReport> {
    let (first, last) = match (rows.first(), rows.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => {
            return Err(MetricsError::InsufficientData {
                required: 1,
                actual: 0,
            })
        }
    };

    let rois: Vec<f64> = rows.iter().filter_map(|r| r.roi).collect();

    let benchmark: Vec<f64> = rows.iter().filter_map(|r| r.benchmark_close).collect();
    let benchmark_return_pct = match (benchmark.first(), benchmark.last()) {
        (Some(b0), Some(b1)) => Some(pct_change(*b0, *b1)),
        _ => None,
    };

    let (avg_roi_pct, lowest_roi_pct, volatility_pct) = if rois.is_empty() {
        (None, None, 0.0)
    } else {
        let mean = rois.iter().sum::<f64>() / rois.len() as f64;
        let lowest = rois.iter().copied().fold(f64::INFINITY, f64::min);
        let std = rois.iter().population_std_dev();
        (Some(mean * 100.0), Some(lowest * 100.0), std * 100.0)
    };

    let kpis = DeployKpis {
        total_return_pct: pct_change(first.balance, last.balance),
        max_drawdown_pct: max_drawdown_pct(rois.iter().map(|r| 1.0 + r)),
        benchmark_return_pct,
        volatility_pct,
        stop_loss_count: stop_loss_count(last, stop_loss, aggregate_columns),
        avg_roi_pct,
        lowest_roi_pct,
        latest_balance: last.balance,
        samples: rows.len(),
    };

    Ok(DeployReport {
        kpis,
        timestamps: rows.iter().map(|r| r.timestamp).collect(),
        balance: rows.iter().map(|r| r.balance).collect(),
        roi: rows.iter().map(|r| r.roi).collect(),
        asset_series: asset_series(rows, aggregate_columns),
    })
}

fn is_asset_column(key: &str, aggregate_columns: &[String]) -> bool {
    key.ends_with(ROI_SUFFIX)
        && key.len() > ROI_SUFFIX.len()
        && !aggregate_columns.iter().any(|c| c.eq_ignore_ascii_case(key))
}

/// Number of asset ROI fields on `row` sitting at the stop-loss level.
pub fn stop_loss_count(row: &DeployRow, params: &StopLossParams, aggregate_columns: &[String]) -> usize {
    row.asset_rois
        .iter()
        .filter(|(key, _)| is_asset_column(key, aggregate_columns))
        .filter_map(|(_, raw)| normalize(raw))
        .filter(|roi| (roi - params.threshold).abs() <= params.tolerance)
        .count()
}

/// Per-asset normalized ROI series keyed by upper-case symbol. Gaps stay as
/// `None` so every series lines up with the row index; columns with no value
/// at all are dropped.
pub fn asset_series(rows: &[DeployRow], aggregate_columns: &[String]) -> BTreeMap<String, Vec<Option<f64>>> {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.asset_rois.keys())
        .map(String::as_str)
        .filter(|key| is_asset_column(key, aggregate_columns))
        .collect();

    columns
        .into_iter()
        .filter_map(|key| {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|r| r.asset_rois.get(key).and_then(normalize))
                .collect();
            if values.iter().all(Option::is_none) {
                return None;
            }
            let symbol = key[..key.len() - ROI_SUFFIX.len()].to_uppercase();
            Some((symbol, values))
        })
        .collect()
}
