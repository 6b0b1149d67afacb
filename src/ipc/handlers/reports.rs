use crate::belts::TestResult;
use crate::config::Config;
use crate::ipc::handlers::core::{load_academy, AcademyProfile};
use crate::ipc::handlers::fees::fee_history;
use crate::ipc::handlers::students::profile_model;
use crate::ipc::helpers::{
    csv_line, dmy, get_month_key, get_optional_date, get_optional_str, get_required_date,
    get_required_str, iso_date, with_db, write_text_file, HandlerErr, HandlerResult,
};
use crate::ipc::records::{
    list_active_students, list_attendance, list_belt_tests, list_fees, require_student,
    AttendanceFilter, AttendanceRow, BeltTestFilter, FeeFilter, FeeRow, StudentRow,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, FeeState, FeeStatus, Money};
use crate::rules::{self, AttendanceStatus};
use crate::xlsx::{self, CellStyle, CellValue, Sheet};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const CERTIFICATE_TITLE: &str = "TAI CERTIFICATE APPLICATION LIST";
const CERTIFICATE_HEADER_ROW: u32 = 10;

const CERTIFICATE_HEADERS: [&str; 19] = [
    "Sort",
    "TAI Cert No.",
    "Name of the student",
    "Date of birth",
    "State",
    "Father's Name",
    "Kup Applied for",
    "Date of test",
    "Gender",
    "Age",
    "Instructor Name ( Inst Cert No )",
    "Instructor Affl. No",
    "Last Affl. renewal date",
    "Name of Examiner",
    "Applicant Promoted TAI No.",
    "Last grade Date",
    "TAI Membership Number",
    "FEE",
    "Remarks",
];

const CERTIFICATE_WIDTHS: [f64; 19] = [
    6.0, 15.0, 28.0, 16.0, 14.0, 22.0, 14.0, 16.0, 10.0, 8.0, 30.0, 15.0, 22.0, 22.0, 22.0, 18.0,
    24.0, 12.0, 18.0,
];

fn no_data() -> HandlerErr {
    HandlerErr::new("no_data", "No data found.")
}

fn fee_status_filter(params: &Value) -> Result<Option<FeeStatus>, HandlerErr> {
    get_optional_str(params, "status")
        .filter(|s| s != "all")
        .map(|s| {
            FeeStatus::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params("status must be paid, partial, unpaid or all"))
        })
        .transpose()
}

fn attendance_status_filter(params: &Value) -> Result<Option<AttendanceStatus>, HandlerErr> {
    get_optional_str(params, "status")
        .filter(|s| s != "all")
        .map(|s| {
            AttendanceStatus::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params("status must be present, absent, late or all"))
        })
        .transpose()
}

fn monthly_fee_rows(conn: &Connection, params: &Value) -> Result<Vec<FeeRow>, HandlerErr> {
    let key = get_month_key(params)?;
    let mut rows = list_fees(
        conn,
        &FeeFilter {
            fee_id: None,
            student_id: get_optional_str(params, "studentId"),
            year: Some(key.year),
            month: Some(key.month),
            status: fee_status_filter(params)?,
        },
    )?;
    rows.sort_by(|a, b| a.student_name.to_lowercase().cmp(&b.student_name.to_lowercase()));
    Ok(rows)
}

fn reports_fees_monthly_model(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let key = get_month_key(params)?;
    let rows = monthly_fee_rows(conn, params)?;
    if rows.is_empty() {
        return Err(no_data());
    }
    let states: Vec<FeeState> = rows.iter().map(|f| f.state()).collect();
    let totals = ledger::totals(states.iter());

    let table: Vec<Value> = rows
        .iter()
        .zip(states.iter())
        .enumerate()
        .map(|(i, (f, s))| {
            json!({
                "sort": i + 1,
                "student": f.student_name,
                "month": s.month.label(),
                "amount": s.total,
                "status": s.status.label(),
                "remaining": s.remaining(),
                "method": f.payment_method.as_deref().map(|m| m.to_uppercase()).unwrap_or_else(|| "-".to_string()),
                "paidDate": f.paid_date.map(dmy).unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect();

    Ok(json!({
        "title": format!("Monthly Fee Report - {}", key.label()),
        "academy": load_academy(conn)?,
        "generatedOn": dmy(config.today()),
        "rows": table,
        "totals": totals,
    }))
}

fn reports_fee_history_model(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let history = fee_history(conn, &student, config.today())?;
    let total_paid: Money = history.iter().map(|r| r.state.collected()).sum();
    let total_remaining: Money = history.iter().map(|r| r.state.remaining()).sum();

    let rows: Vec<Value> = history
        .iter()
        .enumerate()
        .map(|(i, r)| {
            json!({
                "sort": i + 1,
                "month": r.state.month.label(),
                "amount": r.state.total,
                "paid": r.state.collected(),
                "remaining": r.state.remaining(),
                "status": r.state.status.label(),
                "paidDate": r.state.paid_date.map(dmy).unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect();

    Ok(json!({
        "title": format!("Fee History - {}", student.name),
        "academy": load_academy(conn)?,
        "generatedOn": dmy(config.today()),
        "student": {
            "name": student.name,
            "guardianName": student.guardian_name,
            "phoneNumber": student.phone_number,
            "feeStructure": student.fee_plan.label(),
            "admissionDate": dmy(student.admission_date),
        },
        "rows": rows,
        "totalPaid": total_paid,
        "totalRemaining": total_remaining,
    }))
}

fn attendance_rows(conn: &Connection, params: &Value) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    list_attendance(
        conn,
        &AttendanceFilter {
            from: Some(from),
            to: Some(to),
            student_id: get_optional_str(params, "studentId"),
            status: attendance_status_filter(params)?,
        },
    )
}

fn reports_attendance_model(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let rows = attendance_rows(conn, params)?;
    if rows.is_empty() {
        return Err(no_data());
    }
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let table: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            *counts.entry(r.status.as_str()).or_default() += 1;
            json!({
                "sort": i + 1,
                "student": r.student_name,
                "date": dmy(r.date),
                "status": r.status.label(),
                "instructor": r.instructor_name.clone().unwrap_or_else(|| "-".to_string()),
                "remarks": r.remarks.clone().unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect();

    Ok(json!({
        "title": "Attendance Report",
        "academy": load_academy(conn)?,
        "generatedOn": dmy(config.today()),
        "rows": table,
        "summary": {
            "total": rows.len(),
            "present": counts.get("present").copied().unwrap_or(0),
            "absent": counts.get("absent").copied().unwrap_or(0),
            "late": counts.get("late").copied().unwrap_or(0),
        },
    }))
}

fn reports_student_profile_model(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let profile = profile_model(conn, &student, None, config.today())?;

    let fees = list_fees(
        conn,
        &FeeFilter {
            student_id: Some(student.id.clone()),
            ..FeeFilter::default()
        },
    )?;
    let fee_rows: Vec<Value> = fees
        .iter()
        .map(|f| {
            let s = f.state();
            json!({
                "month": s.month.label(),
                "amount": s.total,
                "paid": s.collected(),
                "status": s.status.label(),
                "paidDate": s.paid_date.map(dmy).unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect();

    let belt_history = profile["beltTests"].clone();
    let latest_test = belt_history
        .as_array()
        .and_then(|tests| tests.first().cloned())
        .unwrap_or(Value::Null);

    Ok(json!({
        "title": format!("Student Profile - {}", student.name),
        "academy": load_academy(conn)?,
        "generatedOn": dmy(config.today()),
        "basicInfo": {
            "name": student.name,
            "age": student.age,
            "dateOfBirth": dmy(student.date_of_birth),
            "gender": student.gender,
            "guardianName": student.guardian_name,
            "phoneNumber": student.phone_number,
            "address": student.address,
            "state": student.state,
            "district": student.district,
            "admissionDate": dmy(student.admission_date),
            "feeStructure": student.fee_plan.label(),
            "instructorName": student.instructor_name,
            "currentBelt": profile["currentBeltLabel"],
            "taiCertificationNumber": profile["latestTaiCertification"],
        },
        "attendance": profile["attendance"],
        "fees": {
            "paid": profile["fees"]["paid"],
            "pending": profile["fees"]["pending"],
            "rows": fee_rows,
        },
        "latestBeltTest": latest_test,
        "beltHistory": belt_history,
        "events": profile["events"],
    }))
}

/// One certificate-list line per test, in sheet column order.
fn certificate_rows(conn: &Connection, params: &Value) -> Result<Vec<Vec<CellValue>>, HandlerErr> {
    let result = match get_optional_str(params, "status") {
        None => None,
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(
            TestResult::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params("status must be pending, passed, failed or all"))?,
        ),
    };
    let mut tests = list_belt_tests(
        conn,
        &BeltTestFilter {
            test_id: None,
            student_id: None,
            from: get_optional_date(params, "from")?,
            to: get_optional_date(params, "to")?,
            result,
        },
    )?;
    // Newest test first.
    tests.sort_by(|a, b| {
        b.test_date
            .cmp(&a.test_date)
            .then_with(|| a.student_name.to_lowercase().cmp(&b.student_name.to_lowercase()))
    });

    let students: HashMap<String, StudentRow> = list_active_students(conn)?
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();

    let mut rows = Vec::new();
    for t in &tests {
        let Some(s) = students.get(&t.student_id) else {
            continue;
        };
        let sort = rows.len() as i64 + 1;
        rows.push(vec![
            CellValue::from(sort),
            CellValue::from(
                s.tai_certification_number
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
            CellValue::from(s.name.clone()),
            CellValue::from(s.date_of_birth.format("%-d %b %y").to_string()),
            CellValue::from(s.state.clone().unwrap_or_default()),
            CellValue::from(s.guardian_name.clone()),
            CellValue::from(t.tested_for_belt.kup_column()),
            CellValue::from(dmy(t.test_date)),
            CellValue::from(rules::gender_initial(&s.gender)),
            CellValue::from(s.age),
            CellValue::from(s.instructor_name.clone().unwrap_or_default()),
            CellValue::from(""),
            CellValue::from(""),
            CellValue::from(t.examiner_name.clone().unwrap_or_default()),
            CellValue::from(""),
            CellValue::from(""),
            CellValue::from(""),
            CellValue::from(""),
            CellValue::from(""),
        ]);
    }
    Ok(rows)
}

fn cell_json(v: &CellValue) -> Value {
    match v {
        CellValue::Text(s) => json!(s),
        CellValue::Number(n) => json!(n),
    }
}

fn certificate_info_lines(academy: &AcademyProfile) -> [String; 3] {
    [
        format!("Applicant Name: {}", academy.applicant_name),
        format!("SGB : {}", academy.sgb),
        format!("CLUB:{}", academy.club),
    ]
}

fn reports_belt_certificate_list_model(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let rows = certificate_rows(conn, params)?;
    if rows.is_empty() {
        return Err(no_data());
    }
    let academy = load_academy(conn)?;
    Ok(json!({
        "title": CERTIFICATE_TITLE,
        "info": certificate_info_lines(&academy),
        "headers": CERTIFICATE_HEADERS,
        "rows": rows
            .iter()
            .map(|r| r.iter().map(cell_json).collect::<Vec<_>>())
            .collect::<Vec<_>>(),
    }))
}

fn certificate_sheet(academy: &AcademyProfile, rows: &[Vec<CellValue>]) -> Sheet {
    let mut sheet = Sheet::new("SHEET1");
    for (row, height) in [(1, 5.0), (2, 5.0), (3, 22.0), (4, 22.0), (5, 22.0)] {
        sheet.row_height(row, height);
    }

    for (i, line) in certificate_info_lines(academy).into_iter().enumerate() {
        let row = 7 + i as u32;
        sheet.merge(&format!("A{row}:C{row}"));
        sheet.set(row, 1, line, CellStyle::Info);
        sheet.style_only(row, 2, CellStyle::Info);
        sheet.style_only(row, 3, CellStyle::Info);
    }

    sheet.merge("G8:I8");
    sheet.set(8, 7, CERTIFICATE_TITLE, CellStyle::Title);
    sheet.style_only(8, 8, CellStyle::Title);
    sheet.style_only(8, 9, CellStyle::Title);

    for (i, head) in CERTIFICATE_HEADERS.iter().enumerate() {
        sheet.set(CERTIFICATE_HEADER_ROW, i as u32 + 1, *head, CellStyle::Header);
    }
    sheet.row_height(CERTIFICATE_HEADER_ROW, 30.0);
    for (i, w) in CERTIFICATE_WIDTHS.iter().enumerate() {
        sheet.col_width(i as u32 + 1, *w);
    }

    for (i, cells) in rows.iter().enumerate() {
        let row = CERTIFICATE_HEADER_ROW + 1 + i as u32;
        for (c, v) in cells.iter().enumerate() {
            sheet.set(row, c as u32 + 1, v.clone(), CellStyle::Body);
        }
        sheet.row_height(row, 22.0);
    }
    sheet
}

fn exports_belt_certificate_list_xlsx(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let out_path = get_required_str(params, "outPath")?;
    let rows = certificate_rows(conn, params)?;
    if rows.is_empty() {
        return Err(no_data());
    }
    let academy = load_academy(conn)?;
    let sheet = certificate_sheet(&academy, &rows);
    xlsx::write_workbook(Path::new(&out_path), &sheet).map_err(|e| {
        HandlerErr::new("export_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    info!(path = %out_path, rows = rows.len(), "certificate list exported");
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": rows.len(), "lastRow": sheet.row_count() }))
}

fn exports_fees_csv(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let out_path = get_required_str(params, "outPath")?;
    let rows = monthly_fee_rows(conn, params)?;
    let mut text = csv_line(
        &[
            "Student", "Month", "Amount", "Collected", "Remaining", "Status", "Method", "Paid Date",
        ]
        .map(String::from),
    );
    for f in &rows {
        let s = f.state();
        text.push_str(&csv_line(&[
            f.student_name.clone(),
            s.month.label(),
            s.total.to_string(),
            s.collected().to_string(),
            s.remaining().to_string(),
            s.status.label().to_string(),
            f.payment_method.clone().unwrap_or_default(),
            f.paid_date.map(iso_date).unwrap_or_default(),
        ]));
    }
    write_text_file(&out_path, &text)?;
    info!(path = %out_path, rows = rows.len(), "fees csv exported");
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": rows.len() }))
}

fn exports_attendance_csv(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let out_path = get_required_str(params, "outPath")?;
    let rows = attendance_rows(conn, params)?;
    let mut text = csv_line(&["Student", "Date", "Status", "Instructor", "Remarks"].map(String::from));
    for r in &rows {
        text.push_str(&csv_line(&[
            r.student_name.clone(),
            iso_date(r.date),
            r.status.label().to_string(),
            r.instructor_name.clone().unwrap_or_default(),
            r.remarks.clone().unwrap_or_default(),
        ]));
    }
    write_text_file(&out_path, &text)?;
    info!(path = %out_path, rows = rows.len(), "attendance csv exported");
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "reports.feesMonthlyModel" => Some(with_db(state, req, reports_fees_monthly_model)),
        "reports.feeHistoryModel" => Some(with_db(state, req, reports_fee_history_model)),
        "reports.attendanceModel" => Some(with_db(state, req, reports_attendance_model)),
        "reports.studentProfileModel" => Some(with_db(state, req, reports_student_profile_model)),
        "reports.beltCertificateListModel" => {
            Some(with_db(state, req, reports_belt_certificate_list_model))
        }
        "exports.beltCertificateListXlsx" => {
            Some(with_db(state, req, exports_belt_certificate_list_xlsx))
        }
        "exports.feesCsv" => Some(with_db(state, req, exports_fees_csv)),
        "exports.attendanceCsv" => Some(with_db(state, req, exports_attendance_csv)),
        _ => None,
    }
}
