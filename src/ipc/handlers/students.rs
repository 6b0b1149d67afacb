use crate::belts::BeltLevel;
use crate::config::Config;
use crate::ipc::handlers::attendance::attendance_stats;
use crate::ipc::helpers::{
    db_err, get_optional_i64, get_optional_period, get_patch, get_required_str, iso_date,
    now_stamp, parse_date, with_db, HandlerErr, HandlerResult,
};
use crate::ipc::records::{
    effective_belt_of, latest_tai_certification, list_events, list_fees, name_matches,
    require_student, student_from_row, tests_for_student, FeeFilter, StudentRow, STUDENT_COLUMNS,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{FeePlan, Money, MonthKey};
use crate::rules::{self, RuleError};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

fn blank_student(today: NaiveDate) -> StudentRow {
    StudentRow {
        id: Uuid::new_v4().to_string(),
        name: String::new(),
        age: 0,
        date_of_birth: today,
        gender: String::new(),
        guardian_name: String::new(),
        phone_number: String::new(),
        address: None,
        state: None,
        district: None,
        national_id: None,
        admission_fee: Money::ZERO,
        admission_date: today,
        current_belt: BeltLevel::White,
        instructor_name: None,
        tai_certification_number: None,
        fee_plan: FeePlan::TwoClasses,
        is_active: true,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

fn text_of<'a>(field: &'static str, v: &'a Value) -> Result<&'a str, HandlerErr> {
    match v {
        Value::Null => Ok(""),
        Value::String(s) => Ok(s.as_str()),
        _ => Err(RuleError::invalid(field, format!("{} must be a string", field)).into()),
    }
}

fn date_of(field: &'static str, v: &Value) -> Result<NaiveDate, HandlerErr> {
    let raw = text_of(field, v)?;
    parse_date(raw).ok_or_else(|| RuleError::invalid(field, format!("{} must be YYYY-MM-DD", field)).into())
}

/// Applies camelCase student fields onto `s`. Unknown keys are rejected.
fn apply_fields(s: &mut StudentRow, fields: &Map<String, Value>, today: NaiveDate) -> Result<(), HandlerErr> {
    let mut explicit_age: Option<i64> = None;
    let mut dob_changed = false;
    for (key, v) in fields {
        match key.as_str() {
            "name" => {
                s.name = rules::validate_text("name", text_of("name", v)?, 100, true)?.unwrap_or_default()
            }
            "age" => {
                let age = v
                    .as_i64()
                    .or_else(|| v.as_str().and_then(|t| t.trim().parse::<i64>().ok()))
                    .ok_or_else(|| HandlerErr::from(RuleError::invalid("age", "age must be a number")))?;
                explicit_age = Some(age);
            }
            "dateOfBirth" => {
                s.date_of_birth = date_of("dateOfBirth", v)?;
                dob_changed = true;
            }
            "gender" => s.gender = rules::validate_gender(text_of("gender", v)?)?.to_string(),
            "guardianName" => {
                s.guardian_name = rules::validate_text("guardianName", text_of("guardianName", v)?, 100, true)?
                    .unwrap_or_default()
            }
            "phoneNumber" => s.phone_number = rules::validate_phone(text_of("phoneNumber", v)?)?,
            "address" => s.address = rules::validate_text("address", text_of("address", v)?, 500, false)?,
            "state" => s.state = rules::validate_text("state", text_of("state", v)?, 50, false)?,
            "district" => s.district = rules::validate_text("district", text_of("district", v)?, 50, false)?,
            "nationalId" => {
                s.national_id = rules::validate_text("nationalId", text_of("nationalId", v)?, 20, false)?
            }
            "admissionFee" => {
                let fee = Money::from_json(v)
                    .filter(|m| m.paise() >= 0)
                    .ok_or_else(|| HandlerErr::from(RuleError::invalid(
                        "admissionFee",
                        format!("admissionFee must be a non-negative number up to {}", Money::MAX_INPUT),
                    )))?;
                s.admission_fee = fee;
            }
            "admissionDate" => s.admission_date = date_of("admissionDate", v)?,
            "currentBelt" => {
                s.current_belt = BeltLevel::parse(text_of("currentBelt", v)?)
                    .ok_or_else(|| HandlerErr::from(RuleError::invalid("currentBelt", "unknown belt level")))?
            }
            "instructorName" => {
                s.instructor_name = rules::validate_text("instructorName", text_of("instructorName", v)?, 100, false)?
            }
            "taiCertificationNumber" => {
                s.tai_certification_number = rules::validate_text(
                    "taiCertificationNumber",
                    text_of("taiCertificationNumber", v)?,
                    50,
                    false,
                )?
            }
            "feeStructure" => {
                s.fee_plan = FeePlan::parse(text_of("feeStructure", v)?).ok_or_else(|| {
                    HandlerErr::from(RuleError::invalid(
                        "feeStructure",
                        "feeStructure must be 2_classes_700 or 4_classes_1000",
                    ))
                })?
            }
            other => return Err(HandlerErr::bad_params(format!("unknown student field: {}", other))),
        }
    }

    if dob_changed {
        if s.date_of_birth > today {
            return Err(RuleError::invalid("dateOfBirth", "dateOfBirth cannot be in the future").into());
        }
        s.age = rules::validate_age(rules::age_on(s.date_of_birth, today))?;
    } else if let Some(age) = explicit_age {
        s.age = rules::validate_age(age)?;
    }
    Ok(())
}

fn student_detail(conn: &Connection, s: &StudentRow) -> Result<Value, HandlerErr> {
    let tests = tests_for_student(conn, &s.id)?;
    let belt = effective_belt_of(s, &tests);
    let mut out = s.to_json();
    out["effectiveBelt"] = json!(belt.code());
    out["effectiveBeltLabel"] = json!(belt.label());
    out["latestTaiCertification"] = json!(latest_tai_certification(s, &tests));
    Ok(out)
}

/// Case-insensitive substring match on name, phone or instructor. Both sides fold with Unicode rules.
fn student_matches(s: &StudentRow, query: &str) -> bool {
    name_matches(&s.name, Some(query))
        || s.phone_number.contains(query)
        || s.instructor_name
            .as_deref()
            .map(|i| name_matches(i, Some(query)))
            .unwrap_or(false)
}

fn students_list(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let page = usize::try_from(get_optional_i64(params, "page")?.unwrap_or(1).max(1))
        .unwrap_or(usize::MAX);
    let page_size = get_optional_i64(params, "pageSize")?
        .map(|n| usize::try_from(n.max(1)).unwrap_or(config.max_page_size))
        .unwrap_or(config.default_page_size)
        .min(config.max_page_size);
    let search = params
        .get("search")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let sql = format!(
        "SELECT {} FROM students WHERE is_active = 1 ORDER BY name COLLATE NOCASE, id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let matched: Vec<StudentRow> = stmt
        .query_map([], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .filter(|s| search.as_deref().map(|q| student_matches(s, q)).unwrap_or(true))
        .collect();

    let offset = (page - 1).saturating_mul(page_size);
    let students: Vec<Value> = matched
        .iter()
        .skip(offset)
        .take(page_size)
        .map(|s| s.to_json())
        .collect();

    Ok(json!({
        "count": matched.len(),
        "page": page,
        "pageSize": page_size,
        "students": students,
    }))
}

fn students_get(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let s = require_student(conn, &student_id)?;
    Ok(json!({ "student": student_detail(conn, &s)? }))
}

fn students_create(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let Some(fields) = params.as_object() else {
        return Err(HandlerErr::bad_params("params must be an object"));
    };
    let today = config.today();
    for required in ["name", "dateOfBirth", "gender", "guardianName", "phoneNumber"] {
        if fields.get(required).map(|v| v.is_null()).unwrap_or(true) {
            return Err(RuleError::invalid(required, format!("{} is required", required)).into());
        }
    }

    let mut s = blank_student(today);
    apply_fields(&mut s, fields, today)?;
    let stamp = now_stamp(config);
    s.created_at = stamp.clone();
    s.updated_at = stamp;

    conn.execute(
        &format!(
            "INSERT INTO students({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            STUDENT_COLUMNS
        ),
        rusqlite::params![
            s.id,
            s.name,
            s.age,
            s.date_of_birth,
            s.gender,
            s.guardian_name,
            s.phone_number,
            s.address,
            s.state,
            s.district,
            s.national_id,
            s.admission_fee.paise(),
            s.admission_date,
            s.current_belt.code(),
            s.instructor_name,
            s.tai_certification_number,
            s.fee_plan.code(),
            1,
            s.created_at,
            s.updated_at,
        ],
    )
    .map_err(db_err("db_insert_failed"))?;

    info!(student_id = %s.id, admission = %s.admission_date, plan = s.fee_plan.code(), "student created");
    Ok(json!({ "student": student_detail(conn, &s)? }))
}

fn students_update(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let patch = get_patch(params)?;
    let mut s = require_student(conn, &student_id)?;
    apply_fields(&mut s, patch, config.today())?;
    s.updated_at = now_stamp(config);

    conn.execute(
        "UPDATE students SET
            name = ?, age = ?, date_of_birth = ?, gender = ?, guardian_name = ?, phone_number = ?,
            address = ?, state = ?, district = ?, national_id = ?, admission_fee = ?,
            admission_date = ?, current_belt = ?, instructor_name = ?,
            tai_certification_number = ?, fee_structure = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            s.name,
            s.age,
            s.date_of_birth,
            s.gender,
            s.guardian_name,
            s.phone_number,
            s.address,
            s.state,
            s.district,
            s.national_id,
            s.admission_fee.paise(),
            s.admission_date,
            s.current_belt.code(),
            s.instructor_name,
            s.tai_certification_number,
            s.fee_plan.code(),
            s.updated_at,
            s.id,
        ],
    )
    .map_err(db_err("db_update_failed"))?;

    info!(student_id = %s.id, fields = patch.len(), "student updated");
    Ok(json!({ "student": student_detail(conn, &s)? }))
}

fn students_delete(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    conn.execute(
        "UPDATE students SET is_active = 0, updated_at = ? WHERE id = ?",
        (now_stamp(config), &student_id),
    )
    .map_err(db_err("db_update_failed"))?;
    info!(student_id = %student_id, "student deactivated");
    Ok(json!({ "ok": true, "studentId": student_id }))
}

/// Everything the profile page shows for one student.
pub fn profile_model(
    conn: &Connection,
    s: &StudentRow,
    attendance_month: Option<MonthKey>,
    today: NaiveDate,
) -> Result<Value, HandlerErr> {
    let tests = tests_for_student(conn, &s.id)?;
    let belt = effective_belt_of(s, &tests);
    let stats = attendance_stats(conn, &s.id, attendance_month)?;

    let fees = list_fees(
        conn,
        &FeeFilter {
            student_id: Some(s.id.clone()),
            ..FeeFilter::default()
        },
    )?;
    let paid: Money = fees.iter().map(|f| f.state().collected()).sum();
    let pending: Money = fees.iter().map(|f| f.state().remaining()).sum();

    let events = list_events(conn, Some(&s.id), None)?;

    Ok(json!({
        "student": s.to_json(),
        "currentBelt": belt.code(),
        "currentBeltLabel": belt.label(),
        "latestTaiCertification": latest_tai_certification(s, &tests),
        "attendance": stats,
        "fees": {
            "paid": paid,
            "pending": pending,
            "records": fees.iter().map(|f| f.to_json()).collect::<Vec<_>>(),
        },
        "beltTests": tests.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        "events": events.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
        "generatedOn": iso_date(today),
    }))
}

fn students_profile(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let s = require_student(conn, &student_id)?;
    let period = get_optional_period(params, "attendanceYear", "attendanceMonth")?;
    profile_model(conn, &s, period, config.today())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.get" => Some(with_db(state, req, students_get)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.profile" => Some(with_db(state, req, students_profile)),
        _ => None,
    }
}
