use crate::metrics::{pct_change, window_start, Sample};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;

/// Most recent entries kept by the earnings view.
pub const EARNINGS_MAX_ENTRIES: usize = 7;

/// Close of one calendar day in a display zone.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DayBucket {
    pub day: NaiveDate,
    pub close: Sample,
    /// `None` for the oldest bucket, which has no prior close.
    pub pct_change_vs_prior_day: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EarningsDelta {
    pub day: NaiveDate,
    pub delta: f64,
}

/// Last sample per local calendar day in `zone`, oldest day first.
/// Ties within a day are settled by input order.
fn closes_by_day<'a, I>(samples: I, zone: Tz) -> BTreeMap<NaiveDate, &'a Sample>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut days = BTreeMap::new();
    for s in samples {
        days.insert(s.timestamp.with_timezone(&zone).date_naive(), s);
    }
    days
}

/// Group a series into per-day closes under `zone`.
pub fn bucket(series: &[Sample], zone: Tz) -> Vec<DayBucket> {
    let mut prev_close: Option<f64> = None;
    closes_by_day(series, zone)
        .into_iter()
        .map(|(day, close)| {
            let pct = prev_close.map(|prev| pct_change(prev, close.portfolio_value));
            prev_close = Some(close.portfolio_value);
            DayBucket {
                day,
                close: close.clone(),
                pct_change_vs_prior_day: pct,
            }
        })
        .collect()
}

/// `bucket`, truncated to the most recent `n` days after full computation.
pub fn bucket_recent(series: &[Sample], zone: Tz, n: usize) -> Vec<DayBucket> {
    let mut buckets = bucket(series, zone);
    let excess = buckets.len().saturating_sub(n);
    buckets.drain(..excess);
    buckets
}

/// Day-over-day dollar change of the close, over samples no older than
/// `window_days` before `now`. The oldest day in the window only seeds the
/// first delta. A window reaching past chrono's range covers the whole series.
pub fn earnings(series: &[Sample], window_days: i64, now: DateTime<Utc>, zone: Tz) -> Vec<EarningsDelta> {
    let cutoff = window_start(now, window_days).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let closes: Vec<(NaiveDate, f64)> = closes_by_day(series.iter().filter(|s| s.timestamp >= cutoff), zone)
        .into_iter()
        .map(|(day, s)| (day, s.portfolio_value))
        .collect();

    let mut deltas: Vec<EarningsDelta> = closes
        .windows(2)
        .map(|w| EarningsDelta {
            day: w[1].0,
            delta: w[1].1 - w[0].1,
        })
        .collect();

    let excess = deltas.len().saturating_sub(EARNINGS_MAX_ENTRIES);
    deltas.drain(..excess);
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testutil::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_last_sample_of_day_is_close() {
        let base = t0();
        let series = vec![
            at(base, 100.0),
            at(base + Duration::hours(3), 104.0),
            at(base + Duration::hours(3), 103.0),
            at(base + Duration::days(1), 110.0),
        ];
        let buckets = bucket(&series, chrono_tz::UTC);
        assert_eq!(buckets.len(), 2);
        // Same instant: later input wins.
        assert_eq!(buckets[0].close.portfolio_value, 103.0);
        assert_eq!(buckets[0].pct_change_vs_prior_day, None);
        let pct = buckets[1].pct_change_vs_prior_day.unwrap();
        assert!((pct - (7.0 / 103.0 * 100.0)).abs() < 1e-9, "pct={pct}");
    }

    #[test]
    fn test_zone_changes_day_boundary() {
        // 03:00 UTC is still the previous evening in New York.
        let late = Utc.with_ymd_and_hms(2025, 3, 4, 3, 0, 0).unwrap();
        let series = vec![
            at(Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap(), 100.0),
            at(late, 120.0),
        ];
        assert_eq!(bucket(&series, chrono_tz::UTC).len(), 2);
        let ny = bucket(&series, chrono_tz::America::New_York);
        assert_eq!(ny.len(), 1);
        assert_eq!(ny[0].day, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(ny[0].close.portfolio_value, 120.0);
    }

    #[test]
    fn test_zero_prior_close_gives_zero_pct() {
        let buckets = bucket(&daily(&[0.0, 50.0]), chrono_tz::UTC);
        assert_eq!(buckets[1].pct_change_vs_prior_day, Some(0.0));
    }

    #[test]
    fn test_bucketing_is_deterministic() {
        let series = daily(&[10.0, 12.0, 9.0, 15.0]);
        let a = bucket(&series, chrono_tz::Europe::London);
        let b = bucket(&series, chrono_tz::Europe::London);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bucket_recent_keeps_latest_with_full_pct() {
        let series = daily(&[100.0, 110.0, 121.0, 133.1, 146.41]);
        let recent = bucket_recent(&series, chrono_tz::UTC, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].close.portfolio_value, 133.1);
        // Truncation happens after computing, so the first kept bucket has a change.
        assert!((recent[0].pct_change_vs_prior_day.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(bucket_recent(&series, chrono_tz::UTC, 10).len(), 5);
    }

    #[test]
    fn test_empty_series() {
        assert!(bucket(&[], chrono_tz::UTC).is_empty());
        assert!(earnings(&[], 8, t0(), chrono_tz::UTC).is_empty());
    }

    #[test]
    fn test_earnings_deltas() {
        let series = daily(&[100.0, 105.0, 102.0]);
        let now = t0() + Duration::days(2);
        let deltas = earnings(&series, 8, now, chrono_tz::UTC);
        let values: Vec<f64> = deltas.iter().map(|d| d.delta).collect();
        assert_eq!(values, vec![5.0, -3.0]);
        assert_eq!(deltas[0].day, (t0() + Duration::days(1)).date_naive());
    }

    #[test]
    fn test_earnings_window_and_cap() {
        let values: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let series = daily(&values);
        let now = t0() + Duration::days(19);

        let capped = earnings(&series, 30, now, chrono_tz::UTC);
        assert_eq!(capped.len(), EARNINGS_MAX_ENTRIES);
        assert_eq!(capped.last().unwrap().day, now.date_naive());

        // 3-day window: samples on days 16..=19 -> 3 deltas.
        let short = earnings(&series, 3, now, chrono_tz::UTC);
        assert_eq!(short.len(), 3);
        assert!(short.iter().all(|d| d.delta == 1.0));
    }

    #[test]
    fn test_earnings_oversized_window_covers_everything() {
        let series = daily(&[100.0, 105.0, 102.0]);
        let now = t0() + Duration::days(2);
        let deltas = earnings(&series, i64::MAX / 1000, now, chrono_tz::UTC);
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn test_earnings_uses_zone_local_days() {
        // 02:00 UTC on the 5th is the evening of the 4th in New York, so it
        // replaces that day's close instead of opening a new day.
        let series = vec![
            at(Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap(), 100.0),
            at(Utc.with_ymd_and_hms(2025, 3, 4, 15, 0, 0).unwrap(), 110.0),
            at(Utc.with_ymd_and_hms(2025, 3, 5, 2, 0, 0).unwrap(), 125.0),
        ];
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap();

        let utc = earnings(&series, 8, now, chrono_tz::UTC);
        let utc_values: Vec<f64> = utc.iter().map(|d| d.delta).collect();
        assert_eq!(utc_values, vec![10.0, 15.0]);

        let ny = earnings(&series, 8, now, chrono_tz::America::New_York);
        assert_eq!(ny.len(), 1);
        assert_eq!(ny[0].day, NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
        assert_eq!(ny[0].delta, 25.0);
    }
}
