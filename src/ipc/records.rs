use crate::belts::{self, BeltLevel, TestResult};
use crate::ipc::helpers::{db_err, iso_date, HandlerErr};
use crate::ledger::{self, FeePlan, FeeState, FeeStatus, Money, MonthKey, PaymentEntry};
use crate::rules::AttendanceStatus;
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub age: i64,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub guardian_name: String,
    pub phone_number: String,
    pub address: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub national_id: Option<String>,
    pub admission_fee: Money,
    pub admission_date: NaiveDate,
    pub current_belt: BeltLevel,
    pub instructor_name: Option<String>,
    pub tai_certification_number: Option<String>,
    pub fee_plan: FeePlan,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub const STUDENT_COLUMNS: &str = "id, name, age, date_of_birth, gender, guardian_name, phone_number,
    address, state, district, national_id, admission_fee, admission_date, current_belt,
    instructor_name, tai_certification_number, fee_structure, is_active, created_at, updated_at";

pub fn student_from_row(r: &Row) -> rusqlite::Result<StudentRow> {
    let belt: String = r.get(13)?;
    let plan: String = r.get(16)?;
    Ok(StudentRow {
        id: r.get(0)?,
        name: r.get(1)?,
        age: r.get(2)?,
        date_of_birth: r.get(3)?,
        gender: r.get(4)?,
        guardian_name: r.get(5)?,
        phone_number: r.get(6)?,
        address: r.get(7)?,
        state: r.get(8)?,
        district: r.get(9)?,
        national_id: r.get(10)?,
        admission_fee: Money::from_paise(r.get(11)?),
        admission_date: r.get(12)?,
        current_belt: BeltLevel::parse(&belt).unwrap_or(BeltLevel::White),
        instructor_name: r.get(14)?,
        tai_certification_number: r.get(15)?,
        fee_plan: FeePlan::from_code_lossy(&plan),
        is_active: r.get::<_, i64>(17)? != 0,
        created_at: r.get(18)?,
        updated_at: r.get(19)?,
    })
}

impl StudentRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "age": self.age,
            "dateOfBirth": iso_date(self.date_of_birth),
            "gender": self.gender,
            "guardianName": self.guardian_name,
            "phoneNumber": self.phone_number,
            "address": self.address,
            "state": self.state,
            "district": self.district,
            "nationalId": self.national_id,
            "admissionFee": self.admission_fee,
            "admissionDate": iso_date(self.admission_date),
            "currentBelt": self.current_belt.code(),
            "currentBeltLabel": self.current_belt.label(),
            "instructorName": self.instructor_name,
            "taiCertificationNumber": self.tai_certification_number,
            "feeStructure": self.fee_plan.code(),
            "feeStructureLabel": self.fee_plan.label(),
            "monthlyFee": self.fee_plan.monthly_amount(),
            "isActive": self.is_active,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    conn.query_row(&sql, [student_id], student_from_row)
        .optional()
        .map_err(db_err("db_query_failed"))
}

/// Active student or `not_found`.
pub fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    match load_student(conn, student_id)? {
        Some(s) if s.is_active => Ok(s),
        _ => Err(HandlerErr::not_found("student", student_id)),
    }
}

pub fn list_active_students(conn: &Connection) -> Result<Vec<StudentRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM students WHERE is_active = 1 ORDER BY name COLLATE NOCASE, id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    stmt.query_map([], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))
}

pub fn name_matches(name: &str, search: Option<&str>) -> bool {
    match search {
        Some(q) => name.to_lowercase().contains(&q.to_lowercase()),
        None => true,
    }
}

#[derive(Debug, Clone)]
pub struct FeeRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub plan: FeePlan,
    pub admission_date: NaiveDate,
    pub instructor_name: Option<String>,
    pub month: MonthKey,
    pub amount: Option<Money>,
    pub partial_amount_paid: Money,
    pub status: FeeStatus,
    pub paid_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub history: Vec<PaymentEntry>,
}

impl FeeRow {
    pub fn effective_amount(&self) -> Money {
        self.amount.unwrap_or_else(|| self.plan.monthly_amount())
    }

    pub fn state(&self) -> FeeState {
        FeeState {
            month: self.month,
            total: self.effective_amount(),
            status: self.status,
            partial_paid: self.partial_amount_paid,
            paid_date: self.paid_date,
            history: self.history.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        let state = self.state();
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "year": self.month.year,
            "month": self.month.month,
            "monthLabel": self.month.label(),
            "amount": self.amount,
            "effectiveAmount": state.total,
            "partialAmountPaid": self.partial_amount_paid,
            "collected": state.collected(),
            "remaining": state.remaining(),
            "status": self.status.as_str(),
            "paidDate": self.paid_date.map(iso_date),
            "paymentMethod": self.payment_method,
            "notes": self.notes,
            "paymentHistory": self.history.iter().map(|p| json!({
                "date": iso_date(p.date),
                "amount": p.amount,
            })).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct FeeFilter {
    pub fee_id: Option<String>,
    pub student_id: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub status: Option<FeeStatus>,
}

/// Fee records of active students, newest month first. Months before admission are dropped.
pub fn list_fees(conn: &Connection, filter: &FeeFilter) -> Result<Vec<FeeRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT f.id, f.student_id, s.name, s.fee_structure, s.admission_date, s.instructor_name,
                f.year, f.month, f.amount, f.partial_amount_paid, f.status, f.paid_date,
                f.payment_method, f.notes
         FROM monthly_fees f
         JOIN students s ON s.id = f.student_id
         WHERE s.is_active = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(id) = &filter.fee_id {
        sql.push_str(" AND f.id = ?");
        args.push(SqlValue::Text(id.clone()));
    }
    if let Some(id) = &filter.student_id {
        sql.push_str(" AND f.student_id = ?");
        args.push(SqlValue::Text(id.clone()));
    }
    if let Some(y) = filter.year {
        sql.push_str(" AND f.year = ?");
        args.push(SqlValue::Integer(y as i64));
    }
    if let Some(m) = filter.month {
        sql.push_str(" AND f.month = ?");
        args.push(SqlValue::Integer(m as i64));
    }
    if let Some(st) = filter.status {
        sql.push_str(" AND f.status = ?");
        args.push(SqlValue::Text(st.as_str().to_string()));
    }
    sql.push_str(" ORDER BY f.year DESC, f.month DESC, s.name COLLATE NOCASE");

    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |r| {
            let plan: String = r.get(3)?;
            let year: i32 = r.get(6)?;
            let month: u32 = r.get(7)?;
            let status: String = r.get(10)?;
            Ok(FeeRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                plan: FeePlan::from_code_lossy(&plan),
                admission_date: r.get(4)?,
                instructor_name: r.get(5)?,
                month: MonthKey { year, month },
                amount: r.get::<_, Option<i64>>(8)?.map(Money::from_paise),
                partial_amount_paid: Money::from_paise(r.get(9)?),
                status: FeeStatus::parse(&status).unwrap_or(FeeStatus::Unpaid),
                paid_date: r.get(11)?,
                payment_method: r.get(12)?,
                notes: r.get(13)?,
                history: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let mut rows: Vec<FeeRow> = rows
        .into_iter()
        .filter(|f| ledger::is_eligible(f.month, Some(f.admission_date)))
        .collect();
    let ids: Vec<String> = rows.iter().map(|f| f.id.clone()).collect();
    let mut payments = load_payments(conn, &ids)?;
    for f in rows.iter_mut() {
        f.history = payments.remove(&f.id).unwrap_or_default();
    }
    Ok(rows)
}

pub fn require_fee(conn: &Connection, fee_id: &str) -> Result<FeeRow, HandlerErr> {
    let filter = FeeFilter {
        fee_id: Some(fee_id.to_string()),
        ..FeeFilter::default()
    };
    list_fees(conn, &filter)?
        .into_iter()
        .next()
        .ok_or_else(|| HandlerErr::not_found("fee", fee_id))
}

fn load_payments(
    conn: &Connection,
    fee_ids: &[String],
) -> Result<HashMap<String, Vec<PaymentEntry>>, HandlerErr> {
    let mut out: HashMap<String, Vec<PaymentEntry>> = HashMap::new();
    for chunk in fee_ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT fee_id, paid_on, amount FROM fee_payments
             WHERE fee_id IN ({}) ORDER BY fee_id, seq",
            placeholders
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    PaymentEntry {
                        date: r.get(1)?,
                        amount: Money::from_paise(r.get(2)?),
                    },
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed"))?;
        for (fee_id, entry) in rows {
            out.entry(fee_id).or_default().push(entry);
        }
    }
    Ok(out)
}

/// Writes the reconciled state and replaces the payment history.
pub fn save_fee_state(
    conn: &Connection,
    fee_id: &str,
    state: &FeeState,
    method: Option<&str>,
    stamp: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE monthly_fees
         SET status = ?, partial_amount_paid = ?, paid_date = ?,
             payment_method = COALESCE(?, payment_method), updated_at = ?
         WHERE id = ?",
        (
            state.status.as_str(),
            state.partial_paid.paise(),
            state.paid_date,
            method,
            stamp,
            fee_id,
        ),
    )
    .map_err(db_err("db_update_failed"))?;
    conn.execute("DELETE FROM fee_payments WHERE fee_id = ?", [fee_id])
        .map_err(db_err("db_delete_failed"))?;
    for (seq, entry) in state.history.iter().enumerate() {
        conn.execute(
            "INSERT INTO fee_payments(id, fee_id, seq, paid_on, amount) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                fee_id,
                seq as i64,
                entry.date,
                entry.amount.paise(),
            ),
        )
        .map_err(db_err("db_insert_failed"))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub instructor_name: Option<String>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub remarks: Option<String>,
}

impl AttendanceRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "date": iso_date(self.date),
            "status": self.status.as_str(),
            "remarks": self.remarks,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct AttendanceFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub student_id: Option<String>,
    pub status: Option<AttendanceStatus>,
}

pub fn list_attendance(conn: &Connection, filter: &AttendanceFilter) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT a.id, a.student_id, s.name, s.instructor_name, a.date, a.status, a.remarks
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.is_active = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(d) = filter.from {
        sql.push_str(" AND a.date >= ?");
        args.push(SqlValue::Text(iso_date(d)));
    }
    if let Some(d) = filter.to {
        sql.push_str(" AND a.date <= ?");
        args.push(SqlValue::Text(iso_date(d)));
    }
    if let Some(id) = &filter.student_id {
        sql.push_str(" AND a.student_id = ?");
        args.push(SqlValue::Text(id.clone()));
    }
    if let Some(st) = filter.status {
        sql.push_str(" AND a.status = ?");
        args.push(SqlValue::Text(st.as_str().to_string()));
    }
    sql.push_str(" ORDER BY a.date, s.name COLLATE NOCASE");

    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    stmt.query_map(params_from_iter(args.iter()), |r| {
        let status: String = r.get(5)?;
        Ok(AttendanceRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            instructor_name: r.get(3)?,
            date: r.get(4)?,
            status: AttendanceStatus::parse(&status).unwrap_or(AttendanceStatus::Absent),
            remarks: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

#[derive(Debug, Clone)]
pub struct BeltTestRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub test_date: NaiveDate,
    pub tested_for_belt: BeltLevel,
    pub test_fee: Money,
    pub result: TestResult,
    pub certification_no: Option<String>,
    pub examiner_name: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

impl BeltTestRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "testDate": iso_date(self.test_date),
            "testedForBelt": self.tested_for_belt.code(),
            "testedForBeltLabel": self.tested_for_belt.label(),
            "testFee": self.test_fee,
            "result": self.result.as_str(),
            "certificationNo": self.certification_no,
            "examinerName": self.examiner_name,
            "notes": self.notes,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct BeltTestFilter {
    pub test_id: Option<String>,
    pub student_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub result: Option<TestResult>,
}

/// Newest test first.
pub fn list_belt_tests(conn: &Connection, filter: &BeltTestFilter) -> Result<Vec<BeltTestRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT t.id, t.student_id, s.name, t.test_date, t.tested_for_belt, t.test_fee, t.result,
                t.certification_no, t.examiner_name, t.notes, t.created_at
         FROM belt_tests t
         JOIN students s ON s.id = t.student_id
         WHERE s.is_active = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(id) = &filter.test_id {
        sql.push_str(" AND t.id = ?");
        args.push(SqlValue::Text(id.clone()));
    }
    if let Some(id) = &filter.student_id {
        sql.push_str(" AND t.student_id = ?");
        args.push(SqlValue::Text(id.clone()));
    }
    if let Some(d) = filter.from {
        sql.push_str(" AND t.test_date >= ?");
        args.push(SqlValue::Text(iso_date(d)));
    }
    if let Some(d) = filter.to {
        sql.push_str(" AND t.test_date <= ?");
        args.push(SqlValue::Text(iso_date(d)));
    }
    if let Some(r) = filter.result {
        sql.push_str(" AND t.result = ?");
        args.push(SqlValue::Text(r.as_str().to_string()));
    }
    sql.push_str(" ORDER BY t.test_date DESC, t.created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    stmt.query_map(params_from_iter(args.iter()), |r| {
        let belt: String = r.get(4)?;
        let result: String = r.get(6)?;
        Ok(BeltTestRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            test_date: r.get(3)?,
            tested_for_belt: BeltLevel::parse(&belt).unwrap_or(BeltLevel::White),
            test_fee: Money::from_paise(r.get(5)?),
            result: TestResult::parse(&result).unwrap_or(TestResult::Pending),
            certification_no: r.get(7)?,
            examiner_name: r.get(8)?,
            notes: r.get(9)?,
            created_at: r.get(10)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

pub fn require_belt_test(conn: &Connection, test_id: &str) -> Result<BeltTestRow, HandlerErr> {
    let filter = BeltTestFilter {
        test_id: Some(test_id.to_string()),
        ..BeltTestFilter::default()
    };
    list_belt_tests(conn, &filter)?
        .into_iter()
        .next()
        .ok_or_else(|| HandlerErr::not_found("belt test", test_id))
}

pub fn tests_for_student(conn: &Connection, student_id: &str) -> Result<Vec<BeltTestRow>, HandlerErr> {
    let filter = BeltTestFilter {
        student_id: Some(student_id.to_string()),
        ..BeltTestFilter::default()
    };
    list_belt_tests(conn, &filter)
}

pub fn effective_belt_of(student: &StudentRow, tests: &[BeltTestRow]) -> BeltLevel {
    belts::effective_belt(
        student.current_belt,
        tests.iter().map(|t| (t.test_date, t.tested_for_belt, t.result)),
    )
}

/// Certification number of the newest test carrying one, else the manual field.
pub fn latest_tai_certification(student: &StudentRow, tests: &[BeltTestRow]) -> Option<String> {
    tests
        .iter()
        .filter_map(|t| t.certification_no.clone().filter(|c| !c.is_empty()))
        .next()
        .or_else(|| student.tai_certification_number.clone())
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub event_name: String,
    pub date: NaiveDate,
    pub location: Option<String>,
    pub participation_type: String,
    pub result: Option<String>,
}

impl EventRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "eventName": self.event_name,
            "date": iso_date(self.date),
            "location": self.location,
            "participationType": self.participation_type,
            "result": self.result,
        })
    }
}

pub fn list_events(
    conn: &Connection,
    student_id: Option<&str>,
    event_id: Option<&str>,
) -> Result<Vec<EventRow>, HandlerErr> {
    let mut sql = String::from(
        "SELECT e.id, e.student_id, s.name, e.event_name, e.date, e.location,
                e.participation_type, e.result
         FROM student_events e
         JOIN students s ON s.id = e.student_id
         WHERE s.is_active = 1",
    );
    let mut args: Vec<SqlValue> = Vec::new();
    if let Some(id) = student_id {
        sql.push_str(" AND e.student_id = ?");
        args.push(SqlValue::Text(id.to_string()));
    }
    if let Some(id) = event_id {
        sql.push_str(" AND e.id = ?");
        args.push(SqlValue::Text(id.to_string()));
    }
    sql.push_str(" ORDER BY e.date DESC, e.created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    stmt.query_map(params_from_iter(args.iter()), |r| {
        Ok(EventRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            student_name: r.get(2)?,
            event_name: r.get(3)?,
            date: r.get(4)?,
            location: r.get(5)?,
            participation_type: r.get(6)?,
            result: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}
