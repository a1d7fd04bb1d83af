use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub server_port: u16,
    /// Instant the portfolio started running; anchors `runtime_days`.
    pub runtime_epoch_start: DateTime<Utc>,
    /// Fixed principal for the "effective" return measure.
    pub effective_principal: f64,
    pub stop_loss_threshold: f64,
    pub stop_loss_tolerance: f64,
    pub default_timezone: Tz,
    pub display_timezones: Vec<Tz>,
    pub daily_change_days: usize,
    pub earnings_window_days: i64,
    pub daily_aggregate_days: usize,
    pub timeseries_days: i64,
    /// Portfolio-level `_roi` columns that are not per-asset series.
    pub aggregate_roi_columns: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("SERVER_PORT: {e}")))?;

        let runtime_epoch_start =
            DateTime::parse_from_rfc3339(&env_var_or("RUNTIME_EPOCH_START", "2025-01-01T00:00:00Z"))
                .map_err(|e| AppError::Config(format!("RUNTIME_EPOCH_START: {e}")))?
                .with_timezone(&Utc);

        let effective_principal = env_var_or("EFFECTIVE_PRINCIPAL", "20000")
            .parse::<f64>()
            .map_err(|e| AppError::Config(format!("EFFECTIVE_PRINCIPAL: {e}")))?;

        let stop_loss_threshold = env_var_or("STOP_LOSS_THRESHOLD", "-0.085")
            .parse::<f64>()
            .map_err(|e| AppError::Config(format!("STOP_LOSS_THRESHOLD: {e}")))?;

        let stop_loss_tolerance = env_var_or("STOP_LOSS_TOLERANCE", "0.000001")
            .parse::<f64>()
            .map_err(|e| AppError::Config(format!("STOP_LOSS_TOLERANCE: {e}")))?;

        let default_timezone = env_var_or("DEFAULT_TIMEZONE", "America/New_York")
            .parse::<Tz>()
            .map_err(|e| AppError::Config(format!("DEFAULT_TIMEZONE: {e}")))?;

        let display_timezones = parse_zone_list(&env_var_or(
            "DISPLAY_TIMEZONES",
            "UTC,America/New_York,America/Chicago,America/Los_Angeles,Europe/London",
        ))?;

        let daily_change_days = env_var_or("DAILY_CHANGE_DAYS", "7")
            .parse::<usize>()
            .map_err(|e| AppError::Config(format!("DAILY_CHANGE_DAYS: {e}")))?;

        let earnings_window_days = env_var_or("EARNINGS_WINDOW_DAYS", "8")
            .parse::<i64>()
            .map_err(|e| AppError::Config(format!("EARNINGS_WINDOW_DAYS: {e}")))?;

        let daily_aggregate_days = env_var_or("DAILY_AGGREGATE_DAYS", "30")
            .parse::<usize>()
            .map_err(|e| AppError::Config(format!("DAILY_AGGREGATE_DAYS: {e}")))?;

        let timeseries_days = env_var_or("TIMESERIES_DAYS", "90")
            .parse::<i64>()
            .map_err(|e| AppError::Config(format!("TIMESERIES_DAYS: {e}")))?;

        let aggregate_roi_columns = parse_list(&env_var_or(
            "AGGREGATE_ROI_COLUMNS",
            "portfolio_roi,total_roi,benchmark_roi",
        ));

        Ok(Self {
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port,
            runtime_epoch_start,
            effective_principal,
            stop_loss_threshold,
            stop_loss_tolerance,
            default_timezone,
            display_timezones,
            daily_change_days,
            earnings_window_days,
            daily_aggregate_days,
            timeseries_days,
            aggregate_roi_columns,
        })
    }

    /// Resolve a requested display zone. Unknown or non-selectable names fall
    /// back to the default zone.
    pub fn resolve_timezone(&self, requested: Option<&str>) -> Tz {
        requested
            .and_then(|name| name.parse::<Tz>().ok())
            .filter(|tz| *tz == self.default_timezone || self.display_timezones.contains(tz))
            .unwrap_or(self.default_timezone)
    }
}

fn parse_zone_list(raw: &str) -> AppResult<Vec<Tz>> {
    parse_list(raw)
        .iter()
        .map(|name| {
            name.parse::<Tz>()
                .map_err(|e| AppError::Config(format!("DISPLAY_TIMEZONES: {e}")))
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    use chrono::TimeZone;
    AppConfig {
        data_dir: PathBuf::from("data"),
        server_port: 3001,
        runtime_epoch_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        effective_principal: 20_000.0,
        stop_loss_threshold: -0.085,
        stop_loss_tolerance: 1e-6,
        default_timezone: chrono_tz::America::New_York,
        display_timezones: vec![chrono_tz::UTC, chrono_tz::Europe::London],
        daily_change_days: 7,
        earnings_window_days: 8,
        daily_aggregate_days: 30,
        timeseries_days: 90,
        aggregate_roi_columns: vec!["portfolio_roi".into(), "total_roi".into()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zone_list() {
        let zones = parse_zone_list(" UTC, Europe/London ,,America/Chicago").unwrap();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[1], chrono_tz::Europe::London);
    }

    #[test]
    fn test_parse_zone_list_rejects_unknown() {
        assert!(parse_zone_list("UTC,Mars/Olympus").is_err());
    }

    #[test]
    fn test_resolve_timezone_falls_back() {
        let cfg = test_config();
        assert_eq!(cfg.resolve_timezone(Some("Europe/London")), chrono_tz::Europe::London);
        assert_eq!(cfg.resolve_timezone(Some("Asia/Tokyo")), chrono_tz::America::New_York);
        assert_eq!(cfg.resolve_timezone(Some("garbage")), chrono_tz::America::New_York);
        assert_eq!(cfg.resolve_timezone(None), chrono_tz::America::New_York);
    }
}
