use crate::db::{self, DbCommand};
use crate::errors::{AppError, AppResult, MetricsError};
use crate::metrics::buckets::{self, DayBucket, EarningsDelta};
use crate::metrics::daily::{self, DailyAggregate};
use crate::metrics::deploy::{self, DeployReport, StopLossParams};
use crate::metrics::history::{self, HistoryRange, HistoryView, TimeseriesView};
use crate::metrics::kpi::{self, KpiParams, KpiSnapshot};
use crate::metrics::rows::{self, DeployRecord, SampleRecord};
use crate::metrics::{self, Sample};
use crate::state::{AppState, CounterSnapshot};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use portable_atomic::Ordering::Relaxed;
use std::sync::Arc;

#[derive(Debug, Default, serde::Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct ZoneQuery {
    pub tz: Option<String>,
    pub limit: Option<usize>,
    pub days: Option<i64>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct HistoryQuery {
    pub range: Option<String>,
}

/// Response body plus the number of storage rows that could not be parsed.
#[derive(Debug, serde::Serialize)]
pub struct WithDiagnostics<T> {
    #[serde(flatten)]
    pub data: T,
    pub skipped_rows: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct DailySeries {
    pub days: Vec<DailyAggregate>,
}

#[derive(Debug, serde::Serialize)]
pub struct ZonedBuckets<T> {
    pub timezone: &'static str,
    pub days: Vec<T>,
}

/// Fetch and parse the valuation series. Malformed rows are logged and
/// counted, the rest are returned in time order.
fn load_series(state: &AppState) -> AppResult<(Vec<Sample>, usize)> {
    let records = db::load_sample_records(&state.db)?;
    let parsed = rows::parse_samples(records);
    let skipped = parsed.skipped_count();
    if skipped > 0 {
        tracing::warn!(
            skipped,
            first_reason = %parsed.skipped[0].reason,
            "skipped malformed sample rows"
        );
    }
    state.record_request(skipped);
    Ok((parsed.rows, skipped))
}

fn positive_days(days: Option<i64>, default: i64) -> AppResult<i64> {
    match days.unwrap_or(default) {
        d if d > 0 => Ok(d),
        d => Err(AppError::BadRequest(format!("days must be positive, got {d}"))),
    }
}

/// `positive_days` for a trailing window ending at `now`; the window start
/// must be a representable instant.
fn window_days(days: Option<i64>, default: i64, now: DateTime<Utc>) -> AppResult<i64> {
    let d = positive_days(days, default)?;
    match metrics::window_start(now, d) {
        Some(_) => Ok(d),
        None => Err(AppError::BadRequest(format!("days out of range, got {d}"))),
    }
}

#[derive(Debug, serde::Serialize)]
pub struct Health {
    pub status: &'static str,
    pub samples: i64,
    pub counters: CounterSnapshot,
}

/// GET /api/health
pub async fn get_health(State(state): State<Arc<AppState>>) -> AppResult<Json<Health>> {
    Ok(Json(Health {
        status: "ok",
        samples: db::count_samples(&state.db)?,
        counters: state.counters.snapshot(),
    }))
}

/// GET /api/investments/timeseries -- invested vs value over a trailing window
pub async fn get_timeseries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DaysQuery>,
) -> AppResult<Json<WithDiagnostics<TimeseriesView>>> {
    let now = Utc::now();
    let days = window_days(params.days, state.config.timeseries_days, now)?;
    let (series, skipped_rows) = load_series(&state)?;
    let window = history::trailing_window(&series, days, now);
    Ok(Json(WithDiagnostics {
        data: history::timeseries_view(window),
        skipped_rows,
    }))
}

/// GET /api/kpis -- flat KPI snapshot
pub async fn get_kpis(State(state): State<Arc<AppState>>) -> AppResult<Json<WithDiagnostics<KpiSnapshot>>> {
    let (series, skipped_rows) = load_series(&state)?;
    let params = KpiParams {
        epoch_start: state.config.runtime_epoch_start,
        reference_principal: state.config.effective_principal,
    };
    let snapshot = kpi::compute(&series, Utc::now(), &params).inspect_err(|e| {
        if matches!(e, MetricsError::InsufficientData { .. }) {
            state.counters.insufficient_data.fetch_add(1, Relaxed);
        }
    })?;
    Ok(Json(WithDiagnostics {
        data: snapshot,
        skipped_rows,
    }))
}

/// GET /api/daily -- UTC day OHLC aggregates
pub async fn get_daily(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DaysQuery>,
) -> AppResult<Json<WithDiagnostics<DailySeries>>> {
    let days = positive_days(params.days, state.config.daily_aggregate_days as i64)?;
    let (series, skipped_rows) = load_series(&state)?;
    Ok(Json(WithDiagnostics {
        data: DailySeries {
            days: daily::aggregate_recent(&series, days as usize),
        },
        skipped_rows,
    }))
}

/// GET /api/daily-changes -- last N day closes in a display zone
pub async fn get_daily_changes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ZoneQuery>,
) -> AppResult<Json<WithDiagnostics<ZonedBuckets<DayBucket>>>> {
    let zone = state.config.resolve_timezone(params.tz.as_deref());
    let limit = params.limit.unwrap_or(state.config.daily_change_days);
    let (series, skipped_rows) = load_series(&state)?;
    Ok(Json(WithDiagnostics {
        data: ZonedBuckets {
            timezone: zone.name(),
            days: buckets::bucket_recent(&series, zone, limit),
        },
        skipped_rows,
    }))
}

/// GET /api/earnings -- day-over-day dollar deltas
pub async fn get_earnings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ZoneQuery>,
) -> AppResult<Json<WithDiagnostics<ZonedBuckets<EarningsDelta>>>> {
    let zone = state.config.resolve_timezone(params.tz.as_deref());
    let now = Utc::now();
    let days = window_days(params.days, state.config.earnings_window_days, now)?;
    let (series, skipped_rows) = load_series(&state)?;
    Ok(Json(WithDiagnostics {
        data: ZonedBuckets {
            timezone: zone.name(),
            days: buckets::earnings(&series, days, now, zone),
        },
        skipped_rows,
    }))
}

/// GET /api/history -- cumulative ROI with linear reference line
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> AppResult<Json<WithDiagnostics<HistoryView>>> {
    let range: HistoryRange = params
        .range
        .as_deref()
        .unwrap_or("1Y")
        .parse()
        .map_err(AppError::BadRequest)?;
    let (series, skipped_rows) = load_series(&state)?;
    Ok(Json(WithDiagnostics {
        data: history::history_view(&series, range),
        skipped_rows,
    }))
}

/// GET /api/deploys/{deploy_id} -- deployment KPIs and per-asset ROI series
pub async fn get_deploy(
    State(state): State<Arc<AppState>>,
    Path(deploy_id): Path<String>,
) -> AppResult<Json<WithDiagnostics<DeployReport>>> {
    if !db::deploy_exists(&state.db, &deploy_id)? {
        return Err(AppError::NotFound(format!("deploy {deploy_id}")));
    }

    let loaded = db::load_deploy_records(&state.db, &deploy_id)?;
    let parsed = rows::parse_deploy_rows(loaded.rows);
    let skipped = loaded.skipped.len() + parsed.skipped_count();
    if skipped > 0 {
        tracing::warn!(deploy_id = %deploy_id, skipped, "skipped malformed deploy rows");
    }
    state.record_request(skipped);

    let stop_loss = StopLossParams {
        threshold: state.config.stop_loss_threshold,
        tolerance: state.config.stop_loss_tolerance,
    };
    let report = deploy::compute_deploy(&parsed.rows, &stop_loss, &state.config.aggregate_roi_columns)?;
    Ok(Json(WithDiagnostics {
        data: report,
        skipped_rows: skipped,
    }))
}

/// GET /api/timezones
pub async fn get_timezones(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let available: Vec<&str> = state.config.display_timezones.iter().map(|tz| tz.name()).collect();
    Json(serde_json::json!({
        "default": state.config.default_timezone.name(),
        "available": available,
    }))
}

async fn enqueue(state: &AppState, cmd: DbCommand) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .db_tx
        .send(cmd)
        .await
        .map_err(|_| AppError::ChannelClosed("db writer".into()))?;
    state.counters.records_queued.fetch_add(1, Relaxed);
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "queued": true }))))
}

/// POST /api/samples -- validate and queue one valuation sample
pub async fn post_sample(
    State(state): State<Arc<AppState>>,
    Json(mut record): Json<SampleRecord>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let sample = rows::parse_sample(&record).map_err(AppError::BadRequest)?;
    record.timestamp = rows::canonical_timestamp(sample.timestamp);
    enqueue(&state, DbCommand::InsertSample(record)).await
}

/// POST /api/deploys/{deploy_id}/rows -- validate and queue one deploy row
pub async fn post_deploy_row(
    State(state): State<Arc<AppState>>,
    Path(deploy_id): Path<String>,
    Json(mut record): Json<DeployRecord>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let row = rows::parse_deploy_row(record.clone()).map_err(AppError::BadRequest)?;
    record.timestamp = rows::canonical_timestamp(row.timestamp);
    enqueue(&state, DbCommand::InsertDeployRow { deploy_id, record }).await
}
