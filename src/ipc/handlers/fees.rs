use crate::config::Config;
use crate::ipc::handlers::core::load_academy;
use crate::ipc::helpers::{
    db_err, dmy, get_month_key, get_optional_date, get_optional_money, get_optional_month,
    get_optional_str, get_optional_year, get_required_money, get_required_str, get_required_year,
    iso_date, now_stamp, with_db, HandlerErr, HandlerResult,
};
use crate::ipc::records::{
    list_active_students, list_fees, name_matches, require_fee, require_student, save_fee_state,
    FeeFilter, FeeRow, StudentRow,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, FeeState, FeeStatus, LedgerError, Money, MonthKey};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::info;
use uuid::Uuid;

fn parse_status(raw: &str) -> Result<FeeStatus, HandlerErr> {
    FeeStatus::parse(raw).ok_or_else(|| HandlerErr::bad_params("status must be paid, partial or unpaid"))
}

fn parse_method(raw: Option<String>) -> Result<Option<String>, HandlerErr> {
    match raw.as_deref().map(|s| s.to_ascii_lowercase()) {
        None => Ok(None),
        Some(m) if m == "cash" || m == "upi" => Ok(Some(m)),
        Some(_) => Err(HandlerErr::bad_params("paymentMethod must be cash or upi")),
    }
}

fn guard_month(key: MonthKey, today: NaiveDate) -> Result<(), HandlerErr> {
    if key > MonthKey::of(today) {
        return Err(LedgerError::FuturePeriod(key).into());
    }
    Ok(())
}

/// Creates the missing unpaid records for `key`. Returns how many were created.
pub fn backfill_month(
    conn: &Connection,
    students: &[StudentRow],
    key: MonthKey,
    stamp: &str,
) -> Result<usize, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let mut created = 0usize;
    for s in students
        .iter()
        .filter(|s| ledger::is_eligible(key, Some(s.admission_date)))
    {
        created += tx
            .execute(
                "INSERT INTO monthly_fees(id, student_id, month, year, amount, partial_amount_paid,
                    status, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, 0, 'unpaid', ?, ?)
                 ON CONFLICT(student_id, year, month) DO NOTHING",
                (
                    Uuid::new_v4().to_string(),
                    &s.id,
                    key.month,
                    key.year,
                    s.fee_plan.monthly_amount().paise(),
                    stamp,
                    stamp,
                ),
            )
            .map_err(db_err("db_insert_failed"))?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(created)
}

fn fees_month_open(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let key = get_month_key(params)?;
    guard_month(key, config.today())?;
    let status = get_optional_str(params, "status")
        .filter(|s| s != "all")
        .map(|s| parse_status(&s))
        .transpose()?;
    let search = get_optional_str(params, "search");

    let students = list_active_students(conn)?;
    let created = backfill_month(conn, &students, key, &now_stamp(config))?;
    if created > 0 {
        info!(month = %key, created, "backfilled fee records");
    }

    let all = list_fees(
        conn,
        &FeeFilter {
            year: Some(key.year),
            month: Some(key.month),
            ..FeeFilter::default()
        },
    )?;
    let states: Vec<FeeState> = all.iter().map(|f| f.state()).collect();
    let totals = ledger::totals(states.iter());

    let mut rows: Vec<&FeeRow> = all
        .iter()
        .filter(|f| status.map(|st| f.status == st).unwrap_or(true))
        .filter(|f| name_matches(&f.student_name, search.as_deref()))
        .collect();
    rows.sort_by(|a, b| a.student_name.to_lowercase().cmp(&b.student_name.to_lowercase()));

    Ok(json!({
        "year": key.year,
        "month": key.month,
        "monthLabel": key.label(),
        "created": created,
        "fees": rows.iter().map(|f| f.to_json()).collect::<Vec<_>>(),
        "totals": totals,
    }))
}

fn fees_list(conn: &Connection, _config: &Config, params: &Value) -> HandlerResult {
    let filter = FeeFilter {
        fee_id: None,
        student_id: get_optional_str(params, "studentId"),
        year: get_optional_year(params, "year")?,
        month: get_optional_month(params, "month")?,
        status: get_optional_str(params, "status")
            .filter(|s| s != "all")
            .map(|s| parse_status(&s))
            .transpose()?,
    };
    let rows = list_fees(conn, &filter)?;
    Ok(json!({
        "count": rows.len(),
        "fees": rows.iter().map(|f| f.to_json()).collect::<Vec<_>>(),
    }))
}

fn persist_state(
    conn: &Connection,
    config: &Config,
    fee: &FeeRow,
    next: &FeeState,
    method: Option<&str>,
) -> Result<FeeRow, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    save_fee_state(&tx, &fee.id, next, method, &now_stamp(config))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    require_fee(conn, &fee.id)
}

fn fees_record_payment(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let fee_id = get_required_str(params, "feeId")?;
    let amount = get_required_money(params, "amount")?;
    let method = parse_method(get_optional_str(params, "method"))?;
    let today = config.today();
    let on = get_optional_date(params, "date")?.unwrap_or(today);
    if on > today {
        return Err(HandlerErr::bad_params("payment date cannot be in the future"));
    }

    let fee = require_fee(conn, &fee_id)?;
    let next = ledger::apply_payment(&fee.state(), amount, on, today)?;
    let saved = persist_state(conn, config, &fee, &next, method.as_deref())?;

    info!(
        fee_id = %fee.id,
        student_id = %fee.student_id,
        amount = %amount,
        status = next.status.as_str(),
        "fee payment recorded"
    );
    Ok(json!({ "fee": saved.to_json() }))
}

fn fees_set_status(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let fee_id = get_required_str(params, "feeId")?;
    let target = parse_status(&get_required_str(params, "status")?)?;
    let method = parse_method(get_optional_str(params, "method"))?;
    let today = config.today();

    let fee = require_fee(conn, &fee_id)?;
    let before = fee.state();
    let next = ledger::apply_status(&before, target, today, today)?;
    let method = if target == FeeStatus::Unpaid { None } else { method };
    let saved = persist_state(conn, config, &fee, &next, method.as_deref())?;

    info!(
        fee_id = %fee.id,
        student_id = %fee.student_id,
        from = before.status.as_str(),
        to = next.status.as_str(),
        "fee status changed"
    );
    Ok(json!({ "fee": saved.to_json() }))
}

fn fees_update(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let fee_id = get_required_str(params, "feeId")?;
    let fee = require_fee(conn, &fee_id)?;
    guard_month(fee.month, config.today())?;
    let amount = get_optional_money(params, "amount")?;
    let method = parse_method(get_optional_str(params, "paymentMethod"))?;
    let notes = match params.get("notes") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
        Some(_) => return Err(HandlerErr::bad_params("notes must be a string")),
    };

    let stamp = now_stamp(config);
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Some(amount) = amount {
        let next = ledger::apply_amount_edit(&fee.state(), amount)?;
        tx.execute(
            "UPDATE monthly_fees SET amount = ?, updated_at = ? WHERE id = ?",
            (amount.paise(), &stamp, &fee.id),
        )
        .map_err(db_err("db_update_failed"))?;
        save_fee_state(&tx, &fee.id, &next, None, &stamp)?;
    }
    if let Some(notes) = &notes {
        tx.execute(
            "UPDATE monthly_fees SET notes = ?, updated_at = ? WHERE id = ?",
            (notes, &stamp, &fee.id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    if let Some(m) = &method {
        tx.execute(
            "UPDATE monthly_fees SET payment_method = ?, updated_at = ? WHERE id = ?",
            (m, &stamp, &fee.id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    info!(fee_id = %fee.id, amount = ?amount.map(|a| a.to_string()), "fee record edited");
    Ok(json!({ "fee": require_fee(conn, &fee.id)?.to_json() }))
}

/// One month of a student's fee history; `fee_id` is `None` for months never billed.
pub struct HistoryRow {
    pub fee_id: Option<String>,
    pub state: FeeState,
    pub payment_method: Option<String>,
}

impl HistoryRow {
    pub fn to_json(&self) -> Value {
        json!({
            "feeId": self.fee_id,
            "year": self.state.month.year,
            "month": self.state.month.month,
            "monthLabel": self.state.month.label(),
            "amount": self.state.total,
            "collected": self.state.collected(),
            "remaining": self.state.remaining(),
            "status": self.state.status.as_str(),
            "paidDate": self.state.paid_date.map(iso_date),
            "paymentMethod": self.payment_method,
            "virtual": self.fee_id.is_none(),
        })
    }
}

/// Admission month through the current month, newest first.
pub fn fee_history(
    conn: &Connection,
    student: &StudentRow,
    today: NaiveDate,
) -> Result<Vec<HistoryRow>, HandlerErr> {
    let existing: HashMap<MonthKey, FeeRow> = list_fees(
        conn,
        &FeeFilter {
            student_id: Some(student.id.clone()),
            ..FeeFilter::default()
        },
    )?
    .into_iter()
    .map(|f| (f.month, f))
    .collect();

    let mut rows: Vec<HistoryRow> = ledger::months_between(
        MonthKey::of(student.admission_date),
        MonthKey::of(today),
    )
    .into_iter()
    .map(|m| match existing.get(&m) {
        Some(f) => HistoryRow {
            fee_id: Some(f.id.clone()),
            state: f.state(),
            payment_method: f.payment_method.clone(),
        },
        None => HistoryRow {
            fee_id: None,
            state: FeeState::unpaid(m, student.fee_plan.monthly_amount()),
            payment_method: None,
        },
    })
    .collect();
    rows.reverse();
    Ok(rows)
}

fn fees_history(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    let rows = fee_history(conn, &student, config.today())?;
    let total_paid: Money = rows.iter().map(|r| r.state.collected()).sum();
    let total_remaining: Money = rows.iter().map(|r| r.state.remaining()).sum();
    Ok(json!({
        "studentId": student.id,
        "studentName": student.name,
        "feeStructure": student.fee_plan.code(),
        "rows": rows.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
        "totalPaid": total_paid,
        "totalRemaining": total_remaining,
    }))
}

fn short_ref(id: &str) -> String {
    id.chars().filter(|c| *c != '-').take(8).collect()
}

fn fees_invoice(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let year = get_required_year(params, "year")?;
    let Some(raw_months) = params.get("months").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing months"));
    };
    let mut months = BTreeSet::new();
    for v in raw_months {
        let m = v
            .as_u64()
            .and_then(|m| u32::try_from(m).ok())
            .filter(|m| (1..=12).contains(m))
            .ok_or_else(|| HandlerErr::bad_params("months must be numbers between 1 and 12"))?;
        months.insert(m);
    }
    let (Some(&first), Some(&last)) = (months.iter().next(), months.iter().next_back()) else {
        return Err(HandlerErr::bad_params("months must not be empty"));
    };

    let student = require_student(conn, &student_id)?;
    let by_month: HashMap<u32, FeeRow> = list_fees(
        conn,
        &FeeFilter {
            student_id: Some(student.id.clone()),
            year: Some(year),
            ..FeeFilter::default()
        },
    )?
    .into_iter()
    .map(|f| (f.month.month, f))
    .collect();

    let offending: Vec<u32> = months
        .iter()
        .copied()
        .filter(|m| {
            by_month
                .get(m)
                .map(|f| f.status == FeeStatus::Unpaid)
                .unwrap_or(true)
        })
        .collect();
    if !offending.is_empty() {
        return Err(HandlerErr::new(
            "not_invoiceable",
            "only paid or partially paid months can be invoiced",
        )
        .with_details(json!({ "months": offending })));
    }

    let fees: Vec<&FeeRow> = months.iter().filter_map(|m| by_month.get(m)).collect();
    let reference = fees.first().map(|f| short_ref(&f.id)).unwrap_or_default();
    let states: Vec<FeeState> = fees.iter().map(|f| f.state()).collect();
    let totals = ledger::totals(states.iter());
    let overall = ledger::overall_status(states.iter().map(|s| s.status));
    let academy = load_academy(conn)?;

    let rows: Vec<Value> = states
        .iter()
        .map(|s| {
            json!({
                "month": s.month.label(),
                "feeType": format!("Monthly Fee ({})", student.fee_plan.label()),
                "amount": s.total,
                "paid": s.collected(),
                "balance": s.remaining(),
                "status": s.status.label(),
            })
        })
        .collect();

    info!(student_id = %student.id, year, months = months.len(), "invoice generated");
    Ok(json!({
        "invoiceNumber": ledger::invoice_number(year, first, last, &reference),
        "date": dmy(config.today()),
        "period": ledger::invoice_period(year, first, last),
        "status": overall.label(),
        "academy": academy,
        "billTo": {
            "studentId": student.id,
            "name": student.name,
            "guardianName": student.guardian_name,
            "phoneNumber": student.phone_number,
            "address": student.address,
        },
        "rows": rows,
        "totals": {
            "amount": totals.total_amount,
            "paid": totals.collected,
            "balance": totals.pending,
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "fees.monthOpen" => Some(with_db(state, req, fees_month_open)),
        "fees.list" => Some(with_db(state, req, fees_list)),
        "fees.recordPayment" => Some(with_db(state, req, fees_record_payment)),
        "fees.setStatus" => Some(with_db(state, req, fees_set_status)),
        "fees.update" => Some(with_db(state, req, fees_update)),
        "fees.history" => Some(with_db(state, req, fees_history)),
        "fees.invoice" => Some(with_db(state, req, fees_invoice)),
        _ => None,
    }
}
