use crate::belts::{self, BeltLevel, TestResult};
use crate::config::Config;
use crate::ipc::helpers::{
    db_err, get_optional_money, get_optional_str, get_patch, get_required_date, get_required_str,
    money_param, now_stamp, parse_date, with_db, HandlerErr, HandlerResult,
};
use crate::ipc::records::{
    effective_belt_of, list_belt_tests, require_belt_test, require_student, tests_for_student,
    BeltTestFilter, BeltTestRow,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::Money;
use crate::rules::{self, RuleError};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

fn default_test_fee() -> Money {
    Money::from_rupees(50)
}

fn parse_belt(raw: &str) -> Result<BeltLevel, HandlerErr> {
    BeltLevel::parse(raw).ok_or_else(|| RuleError::invalid("testedForBelt", "unknown belt level").into())
}

fn parse_result(raw: &str) -> Result<TestResult, HandlerErr> {
    TestResult::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params("result must be pending, passed or failed"))
}

fn optional_text(v: &Value, field: &'static str) -> Result<Option<String>, HandlerErr> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(rules::validate_text(field, s, 200, false)?),
        _ => Err(HandlerErr::bad_params(format!("{} must be a string", field))),
    }
}

fn certification(raw: Option<String>) -> Option<String> {
    raw.map(|s| belts::sanitize_certification_no(&s))
        .filter(|s| !s.is_empty())
}

fn belt_tests_list(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let filter = BeltTestFilter {
        student_id: get_optional_str(params, "studentId"),
        ..BeltTestFilter::default()
    };
    let tests = list_belt_tests(conn, &filter)?;
    let now = config.now();

    let (mut upcoming, past): (Vec<&BeltTestRow>, Vec<&BeltTestRow>) = tests
        .iter()
        .partition(|t| belts::is_upcoming(t.test_date, t.result, now, config.belt_test_cutoff_hour));
    upcoming.sort_by_key(|t| t.test_date);
    let passed_count = tests
        .iter()
        .filter(|t| t.result == TestResult::Passed)
        .count();

    Ok(json!({
        "upcoming": upcoming.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        "past": past.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        "passedCount": passed_count,
    }))
}

fn belt_tests_create(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let test_date = get_required_date(params, "testDate")?;
    let belt = parse_belt(&get_required_str(params, "testedForBelt")?)?;
    let fee = get_optional_money(params, "testFee")?.unwrap_or_else(default_test_fee);
    if fee.paise() < 0 {
        return Err(HandlerErr::bad_params("testFee must not be negative"));
    }
    let result = get_optional_str(params, "result")
        .map(|s| parse_result(&s))
        .transpose()?
        .unwrap_or(TestResult::Pending);
    let certification_no = certification(get_optional_str(params, "certificationNo"));
    let examiner = optional_text(params.get("examinerName").unwrap_or(&Value::Null), "examinerName")?;
    let notes = optional_text(params.get("notes").unwrap_or(&Value::Null), "notes")?;

    let student = require_student(conn, &student_id)?;
    let current = effective_belt_of(&student, &tests_for_student(conn, &student.id)?);
    rules::check_belt_target(current, belt)?;

    let id = Uuid::new_v4().to_string();
    let stamp = now_stamp(config);
    conn.execute(
        "INSERT INTO belt_tests(id, student_id, test_date, tested_for_belt, test_fee, result,
            certification_no, examiner_name, notes, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            student.id,
            test_date,
            belt.code(),
            fee.paise(),
            result.as_str(),
            certification_no,
            examiner,
            notes,
            stamp,
            stamp,
        ],
    )
    .map_err(db_err("db_insert_failed"))?;

    info!(test_id = %id, student_id = %student.id, belt = belt.code(), date = %test_date, "belt test scheduled");
    Ok(json!({ "test": require_belt_test(conn, &id)?.to_json() }))
}

fn belt_tests_update(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let test_id = get_required_str(params, "testId")?;
    let patch = get_patch(params)?;
    let mut t = require_belt_test(conn, &test_id)?;

    for (key, v) in patch {
        match key.as_str() {
            "testDate" => {
                t.test_date = v
                    .as_str()
                    .and_then(parse_date)
                    .ok_or_else(|| HandlerErr::bad_params("testDate must be YYYY-MM-DD"))?
            }
            "testedForBelt" => {
                let raw = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("testedForBelt must be a string"))?;
                let belt = parse_belt(raw)?;
                if belt != t.tested_for_belt {
                    let student = require_student(conn, &t.student_id)?;
                    let others: Vec<BeltTestRow> = tests_for_student(conn, &student.id)?
                        .into_iter()
                        .filter(|o| o.id != t.id)
                        .collect();
                    rules::check_belt_target(effective_belt_of(&student, &others), belt)?;
                }
                t.tested_for_belt = belt;
            }
            "testFee" => {
                let fee = money_param("testFee", v)?;
                if fee.paise() < 0 {
                    return Err(HandlerErr::bad_params("testFee must not be negative"));
                }
                t.test_fee = fee;
            }
            "result" => {
                let raw = v
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params("result must be a string"))?;
                t.result = parse_result(raw)?;
            }
            "certificationNo" => {
                t.certification_no = certification(v.as_str().map(|s| s.to_string()))
            }
            "examinerName" => t.examiner_name = optional_text(v, "examinerName")?,
            "notes" => t.notes = optional_text(v, "notes")?,
            other => return Err(HandlerErr::bad_params(format!("unknown belt test field: {}", other))),
        }
    }

    conn.execute(
        "UPDATE belt_tests SET test_date = ?, tested_for_belt = ?, test_fee = ?, result = ?,
            certification_no = ?, examiner_name = ?, notes = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            t.test_date,
            t.tested_for_belt.code(),
            t.test_fee.paise(),
            t.result.as_str(),
            t.certification_no,
            t.examiner_name,
            t.notes,
            now_stamp(config),
            t.id,
        ],
    )
    .map_err(db_err("db_update_failed"))?;

    info!(test_id = %t.id, result = t.result.as_str(), "belt test updated");
    Ok(json!({ "test": require_belt_test(conn, &t.id)?.to_json() }))
}

fn belt_tests_delete(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let test_id = get_required_str(params, "testId")?;
    require_belt_test(conn, &test_id)?;
    conn.execute("DELETE FROM belt_tests WHERE id = ?", [&test_id])
        .map_err(db_err("db_delete_failed"))?;
    info!(test_id = %test_id, "belt test deleted");
    Ok(json!({ "ok": true, "testId": test_id }))
}

fn belt_tests_set_certification(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let test_id = get_required_str(params, "testId")?;
    let raw = params
        .get("certificationNo")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    require_belt_test(conn, &test_id)?;
    let cert = certification(raw);
    conn.execute(
        "UPDATE belt_tests SET certification_no = ?, updated_at = ? WHERE id = ?",
        (&cert, now_stamp(config), &test_id),
    )
    .map_err(db_err("db_update_failed"))?;
    info!(test_id = %test_id, certification = ?cert, "certification number set");
    Ok(json!({ "test": require_belt_test(conn, &test_id)?.to_json() }))
}

fn belt_tests_eligible_belts(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let current = effective_belt_of(&student, &tests_for_student(conn, &student.id)?);
    Ok(json!({
        "studentId": student.id,
        "currentBelt": current.code(),
        "currentBeltLabel": current.label(),
        "eligible": current
            .higher()
            .map(|b| json!({ "code": b.code(), "label": b.label() }))
            .collect::<Vec<_>>(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "beltTests.list" => Some(with_db(state, req, belt_tests_list)),
        "beltTests.create" => Some(with_db(state, req, belt_tests_create)),
        "beltTests.update" => Some(with_db(state, req, belt_tests_update)),
        "beltTests.delete" => Some(with_db(state, req, belt_tests_delete)),
        "beltTests.setCertification" => Some(with_db(state, req, belt_tests_set_certification)),
        "beltTests.eligibleBelts" => Some(with_db(state, req, belt_tests_eligible_belts)),
        _ => None,
    }
}
