use crate::metrics::Sample;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// OHLC-style summary of one UTC day.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub start_balance: f64,
    pub high: f64,
    pub low: f64,
    pub close_balance: f64,
    pub spread_usd: f64,
    pub volatility_pct: f64,
    pub return_usd: f64,
    pub roi_pct: f64,
    pub cumulative_pnl_usd: f64,
    /// Relative to the first day's start balance, not a per-day reset.
    pub cumulative_pnl_pct: f64,
}

#[derive(Debug, Clone, Copy)]
struct DayRange {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl DayRange {
    fn new(v: f64) -> Self {
        Self { open: v, high: v, low: v, close: v }
    }

    fn push(&mut self, v: f64) {
        self.high = self.high.max(v);
        self.low = self.low.min(v);
        self.close = v;
    }
}

#[inline]
fn ratio_pct(num: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        num / base * 100.0
    }
}

/// Per-UTC-day aggregates, oldest first.
pub fn aggregate(series: &[Sample]) -> Vec<DailyAggregate> {
    let mut days: BTreeMap<NaiveDate, DayRange> = BTreeMap::new();
    for s in series {
        let v = s.portfolio_value;
        days.entry(s.timestamp.date_naive())
            .and_modify(|r| r.push(v))
            .or_insert_with(|| DayRange::new(v));
    }

    let first_start = match days.values().next() {
        Some(r) => r.open,
        None => return Vec::new(),
    };

    let mut cumulative_pnl_usd = 0.0;
    days.into_iter()
        .map(|(date, r)| {
            let return_usd = r.close - r.open;
            cumulative_pnl_usd += return_usd;
            DailyAggregate {
                date,
                start_balance: r.open,
                high: r.high,
                low: r.low,
                close_balance: r.close,
                spread_usd: r.high - r.low,
                volatility_pct: ratio_pct(r.high - r.low, r.open),
                return_usd,
                roi_pct: ratio_pct(return_usd, r.open),
                cumulative_pnl_usd,
                cumulative_pnl_pct: ratio_pct(r.close - first_start, first_start),
            }
        })
        .collect()
}

/// Aggregate only the most recent `n` UTC days present in the series. The
/// cumulative columns restart from the first day of that window.
pub fn aggregate_recent(series: &[Sample], n: usize) -> Vec<DailyAggregate> {
    if n == 0 {
        return Vec::new();
    }
    let mut dates: Vec<NaiveDate> = series.iter().map(|s| s.timestamp.date_naive()).collect();
    dates.sort_unstable();
    dates.dedup();
    let Some(&first_kept) = dates.len().checked_sub(n).and_then(|i| dates.get(i)) else {
        return aggregate(series);
    };
    let window: Vec<Sample> = series
        .iter()
        .filter(|s| s.timestamp.date_naive() >= first_kept)
        .cloned()
        .collect();
    aggregate(&window)
}
