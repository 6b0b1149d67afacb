use crate::config::Config;
use crate::ipc::helpers::{db_err, iso_date, with_db, HandlerErr, HandlerResult};
use crate::ledger::MonthKey;
use crate::ipc::types::{AppState, Request};
use chrono::Datelike;
use rusqlite::Connection;
use serde_json::{json, Value};

fn count(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<i64, HandlerErr> {
    conn.query_row(sql, args, |r| r.get(0))
        .map_err(db_err("db_query_failed"))
}

fn dashboard_stats(conn: &Connection, config: &Config, _params: &Value) -> HandlerResult {
    let today = config.today();
    let today_s = iso_date(today);
    let month_end = iso_date(MonthKey::of(today).last_day().unwrap_or(today));

    let active = count(conn, "SELECT COUNT(*) FROM students WHERE is_active = 1", [])?;
    // Months before admission are not billable and stay out of the count.
    let pending_fees = count(
        conn,
        "SELECT COUNT(*) FROM monthly_fees f
         JOIN students s ON s.id = f.student_id
         WHERE s.is_active = 1 AND f.status = 'unpaid' AND f.year = ? AND f.month = ?
           AND s.admission_date <= ?",
        (today.year(), today.month(), &month_end),
    )?;
    let today_attendance = count(
        conn,
        "SELECT COUNT(*) FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.is_active = 1 AND a.date = ? AND a.status IN ('present', 'late')",
        [&today_s],
    )?;
    let upcoming_tests = count(
        conn,
        "SELECT COUNT(*) FROM belt_tests t
         JOIN students s ON s.id = t.student_id
         WHERE s.is_active = 1 AND t.result = 'pending' AND t.test_date >= ?",
        [&today_s],
    )?;

    Ok(json!({
        "date": today_s,
        "totalStudents": active,
        "activeStudents": active,
        "pendingFees": pending_fees,
        "todayAttendance": today_attendance,
        "upcomingTests": upcoming_tests,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(with_db(state, req, dashboard_stats)),
        _ => None,
    }
}
