use crate::errors::{AppError, AppResult};
use crate::metrics::rows::{DeployRecord, Parsed, SampleRecord, SkippedRow};
use crate::metrics::Scalar;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> AppResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| AppError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("portfolio_pulse.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-64000;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
pub fn init_in_memory() -> AppResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Scoped connection acquisition. The lock is released when the guard drops,
/// so callers should finish reading before running any computation.
fn acquire(db: &DbPool) -> AppResult<MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| AppError::Database(format!("lock poisoned: {e}")))
}

// ── Raw value mapping ──

impl FromSql for Scalar {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Scalar::Absent,
            ValueRef::Integer(i) => Scalar::Number(i as f64),
            ValueRef::Real(f) => Scalar::Number(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => Scalar::Text(String::from_utf8_lossy(t).into_owned()),
        })
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Absent => ToSqlOutput::from(rusqlite::types::Null),
            Scalar::Number(v) => ToSqlOutput::from(*v),
            Scalar::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// Timestamps are read through `Scalar` so a mistyped cell reaches the row
/// parser (and its diagnostics) instead of failing the query.
fn timestamp_text(raw: Scalar) -> String {
    match raw {
        Scalar::Text(s) => s,
        Scalar::Number(v) => v.to_string(),
        Scalar::Absent => String::new(),
    }
}

// ── Writes (single writer task fed by a bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    InsertSample(SampleRecord),
    InsertDeployRow { deploy_id: String, record: DeployRecord },
}

pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn execute_command(db: &DbPool, cmd: DbCommand) -> AppResult<()> {
    let conn = acquire(db)?;

    match cmd {
        DbCommand::InsertSample(rec) => {
            conn.execute(
                "INSERT INTO portfolio_samples (timestamp, portfolio_value, invested_value, total_returns)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![rec.timestamp, rec.portfolio_value, rec.invested_value, rec.total_returns],
            )?;
        }
        DbCommand::InsertDeployRow { deploy_id, record } => {
            let asset_rois = serde_json::to_string(&record.fields)?;
            conn.execute(
                "INSERT INTO deploy_snapshots (deploy_id, timestamp, balance, roi, benchmark_close, asset_rois)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    deploy_id,
                    record.timestamp,
                    record.balance,
                    record.roi,
                    record.benchmark_close,
                    asset_rois
                ],
            )?;
        }
    }
    Ok(())
}

// ── Reads (request path; lock held only while rows are materialized) ──

pub fn load_sample_records(db: &DbPool) -> AppResult<Vec<SampleRecord>> {
    let conn = acquire(db)?;
    let mut stmt = conn.prepare(
        "SELECT timestamp, portfolio_value, invested_value, total_returns
         FROM portfolio_samples ORDER BY timestamp ASC, id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SampleRecord {
            timestamp: timestamp_text(row.get(0)?),
            portfolio_value: row.get(1)?,
            invested_value: row.get(2)?,
            total_returns: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Deploy rows in stored timestamp order. A row whose `asset_rois` payload is not a JSON
/// object is reported as skipped.
pub fn load_deploy_records(db: &DbPool, deploy_id: &str) -> AppResult<Parsed<DeployRecord>> {
    let conn = acquire(db)?;
    let mut stmt = conn.prepare(
        "SELECT timestamp, balance, roi, benchmark_close, asset_rois
         FROM deploy_snapshots WHERE deploy_id = ?1 ORDER BY timestamp ASC, id ASC",
    )?;
    let rows = stmt.query_map(rusqlite::params![deploy_id], |row| {
        let asset_rois: Scalar = row.get(4)?;
        Ok((
            DeployRecord {
                timestamp: timestamp_text(row.get(0)?),
                balance: row.get(1)?,
                roi: row.get(2)?,
                benchmark_close: row.get(3)?,
                fields: BTreeMap::new(),
            },
            asset_rois,
        ))
    })?;

    let mut out = Parsed::default();
    for (index, row) in rows.enumerate() {
        let (mut record, asset_rois) = row?;
        match parse_asset_rois(&asset_rois) {
            Ok(fields) => {
                record.fields = fields;
                out.rows.push(record);
            }
            Err(reason) => out.skipped.push(SkippedRow { index, reason }),
        }
    }
    Ok(out)
}

fn parse_asset_rois(raw: &Scalar) -> Result<BTreeMap<String, Scalar>, String> {
    match raw {
        Scalar::Absent => Ok(BTreeMap::new()),
        Scalar::Text(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
        Scalar::Text(s) => serde_json::from_str(s).map_err(|e| format!("asset_rois: {e}")),
        Scalar::Number(_) => Err("asset_rois: expected a JSON object".to_string()),
    }
}

pub fn count_samples(db: &DbPool) -> AppResult<i64> {
    let conn = acquire(db)?;
    Ok(conn.query_row("SELECT COUNT(*) FROM portfolio_samples", [], |row| row.get(0))?)
}

pub fn deploy_exists(db: &DbPool, deploy_id: &str) -> AppResult<bool> {
    let conn = acquire(db)?;
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM deploy_snapshots WHERE deploy_id = ?1",
        rusqlite::params![deploy_id],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}
