use crate::config::AppConfig;
use crate::db::{DbCommand, DbPool};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub requests_served: AtomicU64,
    pub rows_skipped: AtomicU64,
    pub records_queued: AtomicU64,
    pub insufficient_data: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            requests_served: AtomicU64::new(0),
            rows_skipped: AtomicU64::new(0),
            records_queued: AtomicU64::new(0),
            insufficient_data: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests_served: self.requests_served.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            records_queued: self.records_queued.load(Ordering::Relaxed),
            insufficient_data: self.insufficient_data.load(Ordering::Relaxed),
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CounterSnapshot {
    pub requests_served: u64,
    pub rows_skipped: u64,
    pub records_queued: u64,
    pub insufficient_data: u64,
}

// ── Application shared state ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,

    // Handlers -> DB writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, db_tx: mpsc::Sender<DbCommand>) -> Arc<Self> {
        Arc::new(Self {
            config,
            db,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn record_request(&self, skipped: usize) {
        self.counters.requests_served.fetch_add(1, Ordering::Relaxed);
        if skipped > 0 {
            self.counters.rows_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        }
    }
}
