use crate::config::Config;
use crate::ipc::helpers::{
    db_err, get_optional_date, get_optional_period, get_optional_str, get_required_date,
    get_required_str, iso_date, now_stamp, percentage, with_db, HandlerErr, HandlerResult,
};
use crate::ipc::records::{
    list_active_students, list_attendance, name_matches, require_student, AttendanceFilter,
    StudentRow,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::MonthKey;
use crate::rules::{self, AttendanceStatus, RuleError};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be present, absent or late"))
}

fn eligible_on(students: Vec<StudentRow>, date: NaiveDate) -> Vec<StudentRow> {
    students
        .into_iter()
        .filter(|s| s.admission_date <= date)
        .collect()
}

/// Attendance counts for one student, all time or within one month.
pub fn attendance_stats(
    conn: &Connection,
    student_id: &str,
    month: Option<MonthKey>,
) -> Result<Value, HandlerErr> {
    let mut filter = AttendanceFilter {
        student_id: Some(student_id.to_string()),
        ..AttendanceFilter::default()
    };
    if let Some(m) = month {
        filter.from = m.first_day();
        filter.to = m.last_day();
    }
    let rows = list_attendance(conn, &filter)?;

    let total = rows.len() as i64;
    let late = rows
        .iter()
        .filter(|r| r.status == AttendanceStatus::Late)
        .count() as i64;
    let present = rows.iter().filter(|r| r.status.counts_as_present()).count() as i64;
    let absent = total - present;
    Ok(json!({
        "total": total,
        "present": present,
        "late": late,
        "absent": absent,
        "percentage": percentage(present, total),
        "period": month.map(|m| m.to_string()),
    }))
}

fn attendance_day_open(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let date = get_required_date(params, "date")?;
    let search = get_optional_str(params, "search");
    let today = config.today();

    let students = eligible_on(list_active_students(conn)?, date);
    let marked: HashMap<String, (AttendanceStatus, Option<String>)> = list_attendance(
        conn,
        &AttendanceFilter {
            from: Some(date),
            to: Some(date),
            ..AttendanceFilter::default()
        },
    )?
    .into_iter()
    .map(|r| (r.student_id, (r.status, r.remarks)))
    .collect();

    let mut counts: HashMap<&'static str, i64> = HashMap::new();
    let mut rows = Vec::new();
    for s in &students {
        let entry = marked.get(&s.id);
        let key = entry.map(|(st, _)| st.as_str()).unwrap_or("unmarked");
        *counts.entry(key).or_default() += 1;
        if !name_matches(&s.name, search.as_deref()) {
            continue;
        }
        rows.push(json!({
            "studentId": s.id,
            "name": s.name,
            "currentBelt": s.current_belt.code(),
            "status": entry.map(|(st, _)| st.as_str()),
            "remarks": entry.and_then(|(_, r)| r.clone()),
        }));
    }

    let editable = rules::check_attendance_window(date, today, config.attendance_edit_days).is_ok();
    Ok(json!({
        "date": iso_date(date),
        "editable": editable,
        "canMarkAllPresent": date == today,
        "students": rows,
        "counts": {
            "present": counts.get("present").copied().unwrap_or(0),
            "absent": counts.get("absent").copied().unwrap_or(0),
            "late": counts.get("late").copied().unwrap_or(0),
            "unmarked": counts.get("unmarked").copied().unwrap_or(0),
        },
    }))
}

fn attendance_mark(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let status = parse_status(&get_required_str(params, "status")?)?;
    let remarks = get_optional_str(params, "remarks");

    rules::check_attendance_window(date, config.today(), config.attendance_edit_days)?;
    let student = require_student(conn, &student_id)?;
    rules::check_admitted(student.admission_date, student.is_active, date)?;

    let stamp = now_stamp(config);
    conn.execute(
        "INSERT INTO attendance(id, student_id, date, status, remarks, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           remarks = excluded.remarks,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            date,
            status.as_str(),
            &remarks,
            &stamp,
            &stamp,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;

    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance WHERE student_id = ? AND date = ?",
            (&student_id, date),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    info!(student_id = %student_id, date = %date, status = status.as_str(), "attendance marked");
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "date": iso_date(date),
        "status": status.as_str(),
        "remarks": remarks,
    }))
}

fn attendance_mark_all_present(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let date = get_required_date(params, "date")?;
    if date != config.today() {
        return Err(RuleError::NotToday.into());
    }
    let students = eligible_on(list_active_students(conn)?, date);
    let stamp = now_stamp(config);

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let mut created = 0usize;
    for s in &students {
        let n = tx
            .execute(
                "INSERT INTO attendance(id, student_id, date, status, remarks, created_at, updated_at)
                 VALUES(?, ?, ?, 'present', NULL, ?, ?)
                 ON CONFLICT(student_id, date) DO NOTHING",
                (Uuid::new_v4().to_string(), &s.id, date, &stamp, &stamp),
            )
            .map_err(db_err("db_insert_failed"))?;
        created += n;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    info!(date = %date, created, eligible = students.len(), "marked all present");
    Ok(json!({ "date": iso_date(date), "created": created }))
}

fn attendance_list(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let filter = AttendanceFilter {
        from: get_optional_date(params, "from")?,
        to: get_optional_date(params, "to")?,
        student_id: get_optional_str(params, "studentId"),
        status: get_optional_str(params, "status")
            .map(|s| parse_status(&s))
            .transpose()?,
    };
    let rows = list_attendance(conn, &filter)?;
    Ok(json!({
        "count": rows.len(),
        "records": rows.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
    }))
}

fn attendance_student_stats(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    let month = get_optional_period(params, "year", "month")?;
    let mut stats = attendance_stats(conn, &student_id, month)?;
    stats["studentId"] = json!(student_id);
    Ok(stats)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_db(state, req, attendance_day_open)),
        "attendance.mark" => Some(with_db(state, req, attendance_mark)),
        "attendance.markAllPresent" => Some(with_db(state, req, attendance_mark_all_present)),
        "attendance.list" => Some(with_db(state, req, attendance_list)),
        "attendance.studentStats" => Some(with_db(state, req, attendance_student_stats)),
        _ => None,
    }
}
