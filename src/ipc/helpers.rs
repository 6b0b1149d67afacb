use crate::config::Config;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{LedgerError, Money, MonthKey};
use crate::rules::RuleError;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, warn};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        HandlerErr::new("not_found", format!("{} not found", what)).with_details(json!({ "id": id }))
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<LedgerError> for HandlerErr {
    fn from(e: LedgerError) -> Self {
        debug!(code = e.code(), reason = %e, "fee ledger rejected change");
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<RuleError> for HandlerErr {
    fn from(e: RuleError) -> Self {
        debug!(code = e.code(), reason = %e, "business rule rejected request");
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

/// Maps a rusqlite failure to `code`, logging it.
pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| {
        warn!(code, error = %e, "database operation failed");
        HandlerErr::new(code, e.to_string())
    }
}

/// Runs `f` against the open workspace database and wraps the outcome.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Config, &Value) -> HandlerResult,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &state.config, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    get_optional_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string value; blank counts as absent.
pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key) {
        None => Ok(None),
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
    }
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    get_optional_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

fn year_from(raw: i64, key: &str) -> Result<i32, HandlerErr> {
    i32::try_from(raw)
        .ok()
        .filter(|y| (MonthKey::MIN_YEAR..=MonthKey::MAX_YEAR).contains(y))
        .ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "{} must be between {} and {}",
                key,
                MonthKey::MIN_YEAR,
                MonthKey::MAX_YEAR
            ))
        })
}

fn month_from(raw: i64, key: &str) -> Result<u32, HandlerErr> {
    u32::try_from(raw)
        .ok()
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be between 1 and 12", key)))
}

pub fn get_optional_year(params: &Value, key: &str) -> Result<Option<i32>, HandlerErr> {
    get_optional_i64(params, key)?.map(|y| year_from(y, key)).transpose()
}

pub fn get_required_year(params: &Value, key: &str) -> Result<i32, HandlerErr> {
    get_optional_year(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_month(params: &Value, key: &str) -> Result<Option<u32>, HandlerErr> {
    get_optional_i64(params, key)?.map(|m| month_from(m, key)).transpose()
}

pub fn get_month_key(params: &Value) -> Result<MonthKey, HandlerErr> {
    get_optional_period(params, "year", "month")?
        .ok_or_else(|| HandlerErr::bad_params("missing year and month"))
}

/// A year/month pair that must be given together or not at all.
pub fn get_optional_period(
    params: &Value,
    year_key: &str,
    month_key: &str,
) -> Result<Option<MonthKey>, HandlerErr> {
    match (get_optional_year(params, year_key)?, get_optional_month(params, month_key)?) {
        (Some(y), Some(m)) => MonthKey::new(y, m)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} out of range", month_key))),
        (None, None) => Ok(None),
        _ => Err(HandlerErr::bad_params(format!(
            "{} and {} must be given together",
            year_key, month_key
        ))),
    }
}

pub fn get_optional_money(params: &Value, key: &str) -> Result<Option<Money>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => money_param(key, v).map(Some),
    }
}

/// Parses a rupee amount no larger than `Money::MAX_INPUT`.
pub fn money_param(key: &str, v: &Value) -> Result<Money, HandlerErr> {
    Money::from_json(v).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "{} must be a number no larger than {}",
            key,
            Money::MAX_INPUT
        ))
        .with_details(json!({ "field": key }))
    })
}

pub fn get_required_money(params: &Value, key: &str) -> Result<Money, HandlerErr> {
    get_optional_money(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_patch(params: &Value) -> Result<&serde_json::Map<String, Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch"))
}

pub fn iso_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn dmy(d: NaiveDate) -> String {
    d.format("%d/%m/%Y").to_string()
}

pub fn now_stamp(config: &Config) -> String {
    config.now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 10000.0).round() / 100.0
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_quote(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

pub fn write_text_file(out_path: &str, text: &str) -> Result<(), HandlerErr> {
    let path = Path::new(out_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HandlerErr::new("export_failed", e.to_string())
                    .with_details(json!({ "path": out_path }))
            })?;
        }
    }
    std::fs::write(path, text).map_err(|e| {
        HandlerErr::new("export_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })
}
