use chrono::{Local, NaiveDate, NaiveDateTime};
use std::env;
use std::path::PathBuf;

/// Runtime settings read once from the environment at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_json: bool,
    pub fixed_now: Option<NaiveDateTime>,
    pub attendance_edit_days: i64,
    pub belt_test_cutoff_hour: u32,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_json: false,
            fixed_now: None,
            attendance_edit_days: 7,
            belt_test_cutoff_hour: 19,
            default_page_size: 20,
            max_page_size: 1000,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_datetime(name: &str) -> Option<NaiveDateTime> {
    let raw = env::var(name).ok()?;
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(t, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(12, 0, 0))
        })
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let max_page_size = env_usize("DOJOD_MAX_PAGE_SIZE", defaults.max_page_size).max(1);
        Self {
            workspace: env_path("DOJOD_WORKSPACE"),
            log_json: env_bool("DOJOD_LOG_JSON", defaults.log_json),
            fixed_now: env_datetime("DOJOD_NOW"),
            attendance_edit_days: env_i64("DOJOD_ATTENDANCE_EDIT_DAYS", defaults.attendance_edit_days)
                .max(0),
            belt_test_cutoff_hour: env_i64(
                "DOJOD_BELT_TEST_CUTOFF_HOUR",
                defaults.belt_test_cutoff_hour as i64,
            )
            .clamp(0, 24) as u32,
            default_page_size: env_usize("DOJOD_DEFAULT_PAGE_SIZE", defaults.default_page_size)
                .clamp(1, max_page_size),
            max_page_size,
        }
    }

    /// Local wall-clock time, or the pinned value from `DOJOD_NOW`.
    pub fn now(&self) -> NaiveDateTime {
        self.fixed_now
            .unwrap_or_else(|| Local::now().naive_local())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }
}
