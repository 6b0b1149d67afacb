use crate::config::Config;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_patch, get_required_date, get_required_str, parse_date,
    now_stamp, with_db, HandlerErr, HandlerResult,
};
use crate::ipc::records::{list_events, require_student, EventRow};
use crate::ipc::types::{AppState, Request};
use crate::rules;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

fn parse_participation(raw: &str) -> Result<&'static str, HandlerErr> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "participated" => Ok("participated"),
        "winner" => Ok("winner"),
        _ => Err(HandlerErr::bad_params(
            "participationType must be participated or winner",
        )),
    }
}

fn require_event(conn: &Connection, event_id: &str) -> Result<EventRow, HandlerErr> {
    list_events(conn, None, Some(event_id))?
        .into_iter()
        .next()
        .ok_or_else(|| HandlerErr::not_found("event", event_id))
}

fn events_list(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_optional_str(params, "studentId");
    let rows = list_events(conn, student_id.as_deref(), None)?;
    Ok(json!({ "events": rows.iter().map(|e| e.to_json()).collect::<Vec<_>>() }))
}

fn events_create(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let name = rules::validate_text("eventName", &get_required_str(params, "eventName")?, 200, true)?
        .unwrap_or_default();
    let date = get_required_date(params, "date")?;
    let location = rules::validate_text(
        "location",
        &get_optional_str(params, "location").unwrap_or_default(),
        200,
        false,
    )?;
    let participation = parse_participation(
        &get_optional_str(params, "participationType").unwrap_or_else(|| "participated".to_string()),
    )?;
    let result = rules::validate_text(
        "result",
        &get_optional_str(params, "result").unwrap_or_default(),
        200,
        false,
    )?;
    let student = require_student(conn, &student_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO student_events(id, student_id, event_name, date, location, participation_type,
            result, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            student.id,
            name,
            date,
            location,
            participation,
            result,
            now_stamp(config),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;

    info!(event_id = %id, student_id = %student.id, "event recorded");
    Ok(json!({ "event": require_event(conn, &id)?.to_json() }))
}

fn events_update(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let event_id = get_required_str(params, "eventId")?;
    let patch = get_patch(params)?;
    let mut e = require_event(conn, &event_id)?;
    for (key, v) in patch {
        let text = match v {
            Value::Null => "",
            Value::String(s) => s.as_str(),
            _ => return Err(HandlerErr::bad_params(format!("{} must be a string", key))),
        };
        match key.as_str() {
            "eventName" => {
                e.event_name = rules::validate_text("eventName", text, 200, true)?.unwrap_or_default()
            }
            "date" => {
                e.date = parse_date(text).ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))?
            }
            "location" => e.location = rules::validate_text("location", text, 200, false)?,
            "participationType" => e.participation_type = parse_participation(text)?.to_string(),
            "result" => e.result = rules::validate_text("result", text, 200, false)?,
            other => return Err(HandlerErr::bad_params(format!("unknown event field: {}", other))),
        }
    }
    conn.execute(
        "UPDATE student_events SET event_name = ?, date = ?, location = ?, participation_type = ?,
            result = ?
         WHERE id = ?",
        rusqlite::params![e.event_name, e.date, e.location, e.participation_type, e.result, e.id],
    )
    .map_err(db_err("db_update_failed"))?;
    info!(event_id = %e.id, "event updated");
    Ok(json!({ "event": e.to_json() }))
}

fn events_delete(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let event_id = get_required_str(params, "eventId")?;
    require_event(conn, &event_id)?;
    conn.execute("DELETE FROM student_events WHERE id = ?", [&event_id])
        .map_err(db_err("db_delete_failed"))?;
    info!(event_id = %event_id, "event deleted");
    Ok(json!({ "ok": true, "eventId": event_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "events.list" => Some(with_db(state, req, events_list)),
        "events.create" => Some(with_db(state, req, events_create)),
        "events.update" => Some(with_db(state, req, events_update)),
        "events.delete" => Some(with_db(state, req, events_delete)),
        _ => None,
    }
}
