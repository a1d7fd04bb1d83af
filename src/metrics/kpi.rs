use crate::errors::{MetricsError, MetricsResult};
use crate::metrics::{equity_at_or_before, pct_change, utc_daily_closes, window_start, Sample};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

const SECS_PER_DAY: f64 = 86_400.0;

/// Fixed anchors for the KPI calculation.
#[derive(Debug, Clone, Copy)]
pub struct KpiParams {
    /// Start of the runtime clock used for `runtime_days`.
    pub epoch_start: DateTime<Utc>,
    /// Principal used for the effective return measure.
    pub reference_principal: f64,
}

/// Point-in-time KPIs for an equity curve. Flat so it serializes directly
/// into the dashboard payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct KpiSnapshot {
    pub runtime_days: i64,
    pub total_return_pct: f64,
    pub daily_return_pct: Option<f64>,
    /// Lifetime daily rate extrapolated to 7 days.
    pub weekly_return_pct: Option<f64>,
    /// Measured change over the last 7 days of data.
    pub trailing_7d_return_pct: Option<f64>,
    pub annualized_return_pct: Option<f64>,
    pub max_drawdown_pct: f64,
    pub return_this_week_usd: Option<f64>,
    pub return_this_month_usd: Option<f64>,
    pub lowest_daily_return_pct: Option<f64>,
    pub equity: f64,
    pub effective_total_return_pct: f64,
    pub effective_total_return_usd: f64,
}

/// Compute the KPI snapshot. Needs at least two samples.
pub fn compute(series: &[Sample], now: DateTime<Utc>, params: &KpiParams) -> MetricsResult<KpiSnapshot> {
    let (first, last) = match series {
        [first, .., last] => (first, last),
        _ => {
            return Err(MetricsError::InsufficientData {
                required: 2,
                actual: series.len(),
            })
        }
    };

    let first_value = first.portfolio_value;
    let equity = last.portfolio_value;

    let runtime_days = ((last.timestamp - params.epoch_start).num_seconds() as f64 / SECS_PER_DAY)
        .floor()
        .max(0.0) as i64;

    let total_return_pct = pct_change(first_value, equity);
    let daily_return_pct = (runtime_days > 0).then(|| total_return_pct / runtime_days as f64);
    let weekly_return_pct = daily_return_pct.map(|dpr| dpr * 7.0);

    let span_days = (last.timestamp - first.timestamp).num_milliseconds() as f64 / (SECS_PER_DAY * 1000.0);
    let annualized_return_pct = annualized(first_value, equity, span_days);

    let trailing_7d_return_pct = window_start(last.timestamp, 7)
        .and_then(|anchor_ts| equity_at_or_before(series, anchor_ts))
        .map(|anchor| pct_change(anchor, equity));

    let return_this_week_usd = equity_at_or_before(series, week_start(now)).map(|v| equity - v);
    let return_this_month_usd = equity_at_or_before(series, month_start(now)).map(|v| equity - v);

    Ok(KpiSnapshot {
        runtime_days,
        total_return_pct,
        daily_return_pct,
        weekly_return_pct,
        trailing_7d_return_pct,
        annualized_return_pct,
        max_drawdown_pct: max_drawdown_pct(series.iter().map(|s| s.portfolio_value)),
        return_this_week_usd,
        return_this_month_usd,
        lowest_daily_return_pct: lowest_daily_return_pct(series),
        equity,
        effective_total_return_pct: pct_change(params.reference_principal, equity),
        effective_total_return_usd: equity - params.reference_principal,
    })
}

/// Compound annual growth extrapolated from the observed span.
fn annualized(first: f64, last: f64, span_days: f64) -> Option<f64> {
    if span_days <= 0.0 {
        return None;
    }
    if first == 0.0 {
        return Some(0.0);
    }
    let apr = ((last / first).powf(365.0 / span_days) - 1.0) * 100.0;
    apr.is_finite().then_some(apr)
}

/// Deepest decline from the running peak, in percent (always <= 0).
/// Points where the peak is not positive contribute nothing.
pub fn max_drawdown_pct<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.min((v - peak) / peak * 100.0);
        }
    }
    worst
}

/// Worst close-to-close change across UTC days.
fn lowest_daily_return_pct(series: &[Sample]) -> Option<f64> {
    utc_daily_closes(series)
        .windows(2)
        .map(|w| pct_change(w[0].1, w[1].1))
        .reduce(f64::min)
}

/// Most recent Sunday 00:00 UTC at or before `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let sunday = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    midnight(sunday)
}

/// First day of `now`'s UTC month, 00:00.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    midnight(today.with_day(1).unwrap_or(today))
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testutil::*;
    use chrono::TimeZone;

    fn params(epoch: DateTime<Utc>, principal: f64) -> KpiParams {
        KpiParams {
            epoch_start: epoch,
            reference_principal: principal,
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let base = t0();
        let series = vec![
            at(base, 20_000.0),
            at(base + Duration::days(1), 20_500.0),
            at(base + Duration::days(2), 19_800.0),
            at(base + Duration::days(7), 21_000.0),
        ];
        let kpi = compute(&series, base + Duration::days(7), &params(base, 20_000.0)).unwrap();

        assert_eq!(kpi.runtime_days, 7);
        assert!(approx(kpi.total_return_pct, 5.0), "total={}", kpi.total_return_pct);
        assert!(approx(kpi.effective_total_return_pct, 5.0));
        assert!(approx(kpi.effective_total_return_usd, 1_000.0));
        assert!((kpi.max_drawdown_pct - (-3.4146)).abs() < 1e-3, "dd={}", kpi.max_drawdown_pct);
        assert!(approx(kpi.daily_return_pct.unwrap(), 5.0 / 7.0));
        assert!(approx(kpi.weekly_return_pct.unwrap(), 5.0));
        let apr = kpi.annualized_return_pct.unwrap();
        assert!(approx(apr, (1.05_f64.powf(365.0 / 7.0) - 1.0) * 100.0), "apr={apr}");
        assert_eq!(kpi.equity, 21_000.0);
        assert!(approx(kpi.trailing_7d_return_pct.unwrap(), 5.0));
    }

    #[test]
    fn test_insufficient_data() {
        let err = compute(&daily(&[100.0]), t0(), &params(t0(), 100.0)).unwrap_err();
        assert_eq!(err, MetricsError::InsufficientData { required: 2, actual: 1 });
        assert!(compute(&[], t0(), &params(t0(), 100.0)).is_err());
    }

    #[test]
    fn test_runtime_before_epoch_is_zero() {
        let series = daily(&[100.0, 110.0]);
        let kpi = compute(&series, t0(), &params(t0() + Duration::days(30), 100.0)).unwrap();
        assert_eq!(kpi.runtime_days, 0);
        assert_eq!(kpi.daily_return_pct, None);
        assert_eq!(kpi.weekly_return_pct, None);
    }

    #[test]
    fn test_zero_span_has_no_apr() {
        let series = vec![at(t0(), 100.0), at(t0(), 120.0)];
        let kpi = compute(&series, t0(), &params(t0(), 100.0)).unwrap();
        assert_eq!(kpi.annualized_return_pct, None);
        assert_eq!(kpi.lowest_daily_return_pct, None);
    }

    #[test]
    fn test_zero_first_value_is_guarded() {
        let series = daily(&[0.0, 50.0, 40.0, 0.0, 60.0]);
        let kpi = compute(&series, t0() + Duration::days(4), &params(t0() - Duration::days(3), 0.0)).unwrap();
        assert_eq!(kpi.total_return_pct, 0.0);
        assert_eq!(kpi.daily_return_pct, Some(0.0));
        assert_eq!(kpi.annualized_return_pct, Some(0.0));
        assert_eq!(kpi.effective_total_return_pct, 0.0);
        for v in [
            kpi.max_drawdown_pct,
            kpi.lowest_daily_return_pct.unwrap(),
            kpi.trailing_7d_return_pct.unwrap_or(0.0),
        ] {
            assert!(v.is_finite(), "non-finite metric {v}");
        }
    }

    #[test]
    fn test_drawdown_non_positive() {
        assert_eq!(max_drawdown_pct([1.0, 2.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown_pct([5.0]), 0.0);
        assert!(approx(max_drawdown_pct([100.0, 50.0, 200.0, 150.0]), -50.0));
        let dd = max_drawdown_pct([3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]);
        assert!(dd < 0.0 && dd >= -100.0, "dd={dd}");
    }

    #[test]
    fn test_week_and_month_boundaries() {
        // Wednesday 2025-03-05.
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 15, 0, 0).unwrap();
        assert_eq!(week_start(now), Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        // A Sunday is its own week start.
        let sunday = Utc.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap();
        assert_eq!(week_start(sunday), sunday);
    }

    #[test]
    fn test_period_returns() {
        let series = vec![
            at(Utc.with_ymd_and_hms(2025, 2, 27, 12, 0, 0).unwrap(), 1_000.0),
            at(Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap(), 1_050.0),
            at(Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(), 1_100.0),
            at(Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap(), 1_130.0),
        ];
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 15, 0, 0).unwrap();
        let kpi = compute(&series, now, &params(series[0].timestamp, 1_000.0)).unwrap();
        // Sunday 03-02 00:00 -> last sample at or before is 03-01 (1050).
        assert_eq!(kpi.return_this_week_usd, Some(80.0));
        // 03-01 00:00 -> 02-27 sample (1000).
        assert_eq!(kpi.return_this_month_usd, Some(130.0));
    }

    #[test]
    fn test_period_return_absent_without_anchor() {
        let series = vec![
            at(Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(), 1_000.0),
            at(Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap(), 1_010.0),
        ];
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 15, 0, 0).unwrap();
        let kpi = compute(&series, now, &params(series[0].timestamp, 1_000.0)).unwrap();
        assert_eq!(kpi.return_this_week_usd, None);
        assert_eq!(kpi.return_this_month_usd, None);
        assert_eq!(kpi.trailing_7d_return_pct, None);
    }

    #[test]
    fn test_lowest_daily_return() {
        let series = daily(&[100.0, 110.0, 99.0, 120.0]);
        let kpi = compute(&series, t0(), &params(t0(), 100.0)).unwrap();
        assert!(approx(kpi.lowest_daily_return_pct.unwrap(), -10.0));
    }
}
