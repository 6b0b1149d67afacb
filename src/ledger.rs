use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Rupee amount held as integer paise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    /// Largest amount accepted from a request: one crore rupees.
    pub const MAX_INPUT: Money = Money(1_000_000_000);

    pub fn from_paise(paise: i64) -> Self {
        Money(paise)
    }

    pub fn from_rupees(rupees: i64) -> Self {
        Money(rupees * 100)
    }

    /// `None` for non-finite values and magnitudes above `MAX_INPUT`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let paise = (value * 100.0).round();
        if paise.abs() > Money::MAX_INPUT.0 as f64 {
            return None;
        }
        Some(Money(paise as i64))
    }

    /// Accepts JSON numbers and numeric strings ("700.00").
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().and_then(Money::from_f64),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok().and_then(Money::from_f64),
            _ => None,
        }
    }

    pub fn paise(self) -> i64 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Difference floored at zero.
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }
}

// Stored rows may predate input limits, so arithmetic saturates instead of overflowing.
impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |a, b| a + b)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub const MIN_YEAR: i32 = 1900;
    pub const MAX_YEAR: i32 = 9999;

    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (MonthKey::MIN_YEAR..=MonthKey::MAX_YEAR).contains(&year) {
            Some(MonthKey { year, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        MonthKey {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month >= 12 {
            MonthKey {
                year: self.year + 1,
                month: 1,
            }
        } else {
            MonthKey {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(self) -> Option<NaiveDate> {
        self.next().first_day().and_then(|d| d.pred_opt())
    }

    /// "March 2026"
    pub fn label(self) -> String {
        let idx = (self.month.clamp(1, 12) - 1) as usize;
        format!("{} {}", MONTH_NAMES[idx], self.year)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Every month from `start` through `end`, inclusive. Empty when `start > end`.
pub fn months_between(start: MonthKey, end: MonthKey) -> Vec<MonthKey> {
    let mut out = Vec::new();
    let mut cur = start;
    while cur <= end {
        out.push(cur);
        cur = cur.next();
    }
    out
}

/// A fee month counts for a student only from their admission month onward.
pub fn is_eligible(month: MonthKey, admission: Option<NaiveDate>) -> bool {
    match admission {
        Some(d) => month >= MonthKey::of(d),
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePlan {
    TwoClasses,
    FourClasses,
}

impl FeePlan {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim() {
            "2_classes_700" => Some(FeePlan::TwoClasses),
            "4_classes_1000" => Some(FeePlan::FourClasses),
            _ => None,
        }
    }

    /// Unknown codes bill at the two-class rate.
    pub fn from_code_lossy(code: &str) -> Self {
        FeePlan::parse(code).unwrap_or(FeePlan::TwoClasses)
    }

    pub fn code(self) -> &'static str {
        match self {
            FeePlan::TwoClasses => "2_classes_700",
            FeePlan::FourClasses => "4_classes_1000",
        }
    }

    pub fn monthly_amount(self) -> Money {
        match self {
            FeePlan::TwoClasses => Money::from_rupees(700),
            FeePlan::FourClasses => Money::from_rupees(1000),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeePlan::TwoClasses => "2 classes/week",
            FeePlan::FourClasses => "4 classes/week",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Paid,
    Partial,
    Unpaid,
}

impl FeeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paid" => Some(FeeStatus::Paid),
            "partial" => Some(FeeStatus::Partial),
            "unpaid" => Some(FeeStatus::Unpaid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Paid => "paid",
            FeeStatus::Partial => "partial",
            FeeStatus::Unpaid => "unpaid",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeeStatus::Paid => "Paid",
            FeeStatus::Partial => "Partial",
            FeeStatus::Unpaid => "Unpaid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEntry {
    pub date: NaiveDate,
    pub amount: Money,
}

/// The reconcilable part of a monthly fee record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeState {
    pub month: MonthKey,
    pub total: Money,
    pub status: FeeStatus,
    pub partial_paid: Money,
    pub paid_date: Option<NaiveDate>,
    pub history: Vec<PaymentEntry>,
}

impl FeeState {
    pub fn unpaid(month: MonthKey, total: Money) -> Self {
        FeeState {
            month,
            total,
            status: FeeStatus::Unpaid,
            partial_paid: Money::ZERO,
            paid_date: None,
            history: Vec::new(),
        }
    }

    pub fn collected(&self) -> Money {
        collected(self.status, self.total, self.partial_paid)
    }

    pub fn remaining(&self) -> Money {
        self.total.saturating_sub(self.collected())
    }
}

pub fn collected(status: FeeStatus, total: Money, partial_paid: Money) -> Money {
    match status {
        FeeStatus::Paid => total,
        FeeStatus::Partial => partial_paid,
        FeeStatus::Unpaid => Money::ZERO,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("payment amount must be greater than zero")]
    NonPositiveAmount,
    #[error("cannot update fees for a future month ({0})")]
    FuturePeriod(MonthKey),
    #[error("fee is already fully paid")]
    AlreadyPaid,
    #[error("total fee is {total}; already paid {already_paid}; cannot add {attempted}")]
    ExceedsTotal {
        total: Money,
        already_paid: Money,
        attempted: Money,
    },
    #[error("cannot change a {from} fee to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("partial status is set by recording a payment")]
    PartialNeedsPayment,
    #[error("the amount of a paid fee cannot change")]
    PaidAmountLocked,
    #[error("amount {amount} is below the {collected} already collected")]
    AmountBelowCollected { amount: Money, collected: Money },
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NonPositiveAmount
            | LedgerError::PartialNeedsPayment
            | LedgerError::AmountBelowCollected { .. } => "bad_params",
            LedgerError::FuturePeriod(_) => "future_period",
            LedgerError::AlreadyPaid => "already_paid",
            LedgerError::ExceedsTotal { .. } => "amount_exceeds_total",
            LedgerError::InvalidTransition { .. } | LedgerError::PaidAmountLocked => {
                "invalid_transition"
            }
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            LedgerError::ExceedsTotal {
                total,
                already_paid,
                attempted,
            } => Some(serde_json::json!({
                "total": total,
                "alreadyPaid": already_paid,
                "attempted": attempted,
            })),
            LedgerError::FuturePeriod(m) => Some(serde_json::json!({ "month": m.to_string() })),
            _ => None,
        }
    }
}

fn guard_not_future(month: MonthKey, today: NaiveDate) -> Result<(), LedgerError> {
    if month > MonthKey::of(today) {
        return Err(LedgerError::FuturePeriod(month));
    }
    Ok(())
}

/// Adds a payment. Reaching the total converts the fee to paid.
pub fn apply_payment(
    state: &FeeState,
    amount: Money,
    on: NaiveDate,
    today: NaiveDate,
) -> Result<FeeState, LedgerError> {
    guard_not_future(state.month, today)?;
    if !amount.is_positive() {
        return Err(LedgerError::NonPositiveAmount);
    }
    if state.status == FeeStatus::Paid {
        return Err(LedgerError::AlreadyPaid);
    }
    let already_paid = state.collected();
    let new_total = already_paid + amount;
    if new_total > state.total {
        return Err(LedgerError::ExceedsTotal {
            total: state.total,
            already_paid,
            attempted: amount,
        });
    }

    let mut next = state.clone();
    next.history.push(PaymentEntry { date: on, amount });
    next.paid_date = Some(on);
    if new_total == state.total {
        next.status = FeeStatus::Paid;
        next.partial_paid = Money::ZERO;
    } else {
        next.status = FeeStatus::Partial;
        next.partial_paid = new_total;
    }
    Ok(next)
}

/// Direct status change. Paid settles whatever is still outstanding.
pub fn apply_status(
    state: &FeeState,
    target: FeeStatus,
    on: NaiveDate,
    today: NaiveDate,
) -> Result<FeeState, LedgerError> {
    match (state.status, target) {
        (FeeStatus::Paid, FeeStatus::Unpaid | FeeStatus::Partial)
        | (FeeStatus::Partial, FeeStatus::Unpaid) => {
            return Err(LedgerError::InvalidTransition {
                from: state.status.as_str(),
                to: target.as_str(),
            })
        }
        _ => {}
    }
    guard_not_future(state.month, today)?;

    let mut next = state.clone();
    match target {
        FeeStatus::Paid => {
            if state.status == FeeStatus::Paid {
                return Ok(next);
            }
            let outstanding = state.remaining();
            if outstanding.is_positive() {
                next.history.push(PaymentEntry {
                    date: on,
                    amount: outstanding,
                });
            }
            next.status = FeeStatus::Paid;
            next.partial_paid = Money::ZERO;
            next.paid_date = Some(on);
        }
        FeeStatus::Unpaid => {
            next.status = FeeStatus::Unpaid;
            next.partial_paid = Money::ZERO;
            next.paid_date = None;
            next.history.clear();
        }
        FeeStatus::Partial => return Err(LedgerError::PartialNeedsPayment),
    }
    Ok(next)
}

/// Administrative amount edit. Collected money is never stranded and a paid fee keeps its total.
pub fn apply_amount_edit(state: &FeeState, new_total: Money) -> Result<FeeState, LedgerError> {
    let collected = state.collected();
    if !new_total.is_positive() || new_total < collected {
        return Err(LedgerError::AmountBelowCollected {
            amount: new_total,
            collected,
        });
    }
    let mut next = state.clone();
    next.total = new_total;
    match state.status {
        FeeStatus::Paid if new_total != state.total => {
            return Err(LedgerError::PaidAmountLocked);
        }
        FeeStatus::Partial if new_total == collected => {
            next.status = FeeStatus::Paid;
            next.partial_paid = Money::ZERO;
        }
        _ => {}
    }
    Ok(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub total_amount: Money,
    pub collected: Money,
    pub pending: Money,
    pub unpaid_count: usize,
    pub partial_count: usize,
    pub paid_count: usize,
}

pub fn totals<'a, I>(states: I) -> LedgerTotals
where
    I: IntoIterator<Item = &'a FeeState>,
{
    let mut t = LedgerTotals::default();
    for s in states {
        t.total_amount += s.total;
        t.collected += s.collected();
        match s.status {
            FeeStatus::Paid => t.paid_count += 1,
            FeeStatus::Partial => t.partial_count += 1,
            FeeStatus::Unpaid => t.unpaid_count += 1,
        }
    }
    t.pending = t.total_amount.saturating_sub(t.collected);
    t
}

/// Paid only when every month is paid, unpaid only when none has been touched.
pub fn overall_status<I>(statuses: I) -> FeeStatus
where
    I: IntoIterator<Item = FeeStatus>,
{
    let mut all_paid = true;
    let mut all_unpaid = true;
    let mut any = false;
    for s in statuses {
        any = true;
        all_paid &= s == FeeStatus::Paid;
        all_unpaid &= s == FeeStatus::Unpaid;
    }
    if !any || all_unpaid {
        FeeStatus::Unpaid
    } else if all_paid {
        FeeStatus::Paid
    } else {
        FeeStatus::Partial
    }
}

pub fn invoice_number(year: i32, first_month: u32, last_month: u32, reference: &str) -> String {
    format!(
        "INV-{year}{first_month:02}{last_month:02}-{year}{last_month:02}{}",
        reference.to_ascii_uppercase()
    )
}

pub fn invoice_period(year: i32, first_month: u32, last_month: u32) -> String {
    let first = MonthKey {
        year,
        month: first_month,
    };
    if first_month == last_month {
        return first.label();
    }
    let last = MonthKey {
        year,
        month: last_month,
    };
    format!("{} - {}", first.label(), last.label())
}
