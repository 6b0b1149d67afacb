use crate::belts::BeltLevel;
use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("cannot mark attendance for future dates")]
    FutureAttendance,
    #[error("attendance can only be edited for the past {0} days")]
    EditWindowClosed(i64),
    #[error("student was not admitted until {0}")]
    NotAdmitted(NaiveDate),
    #[error("student is inactive")]
    InactiveStudent,
    #[error("mark all present is only available for today")]
    NotToday,
    #[error("{tested} is not above the current belt {current}")]
    BeltNotHigher {
        current: &'static str,
        tested: &'static str,
    },
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl RuleError {
    pub fn code(&self) -> &'static str {
        match self {
            RuleError::FutureAttendance | RuleError::EditWindowClosed(_) | RuleError::NotToday => {
                "edit_window_closed"
            }
            RuleError::NotAdmitted(_) | RuleError::InactiveStudent => "not_admitted",
            RuleError::BeltNotHigher { .. } => "belt_not_higher",
            RuleError::Invalid { .. } => "bad_params",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            RuleError::Invalid { field, .. } => Some(serde_json::json!({ "field": field })),
            RuleError::NotAdmitted(d) => {
                Some(serde_json::json!({ "admissionDate": d.format("%Y-%m-%d").to_string() }))
            }
            RuleError::BeltNotHigher { current, tested } => {
                Some(serde_json::json!({ "currentBelt": current, "testedForBelt": tested }))
            }
            _ => None,
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        RuleError::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
        }
    }

    /// Late arrivals count towards attendance.
    pub fn counts_as_present(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

/// Attendance is editable from `today - window_days` through today.
pub fn check_attendance_window(date: NaiveDate, today: NaiveDate, window_days: i64) -> Result<(), RuleError> {
    let back = (today - date).num_days();
    if back < 0 {
        return Err(RuleError::FutureAttendance);
    }
    if back > window_days {
        return Err(RuleError::EditWindowClosed(window_days));
    }
    Ok(())
}

pub fn check_admitted(admission: NaiveDate, is_active: bool, on: NaiveDate) -> Result<(), RuleError> {
    if !is_active {
        return Err(RuleError::InactiveStudent);
    }
    if admission > on {
        return Err(RuleError::NotAdmitted(admission));
    }
    Ok(())
}

pub fn check_belt_target(current: BeltLevel, tested: BeltLevel) -> Result<(), RuleError> {
    if tested <= current {
        return Err(RuleError::BeltNotHigher {
            current: current.code(),
            tested: tested.code(),
        });
    }
    Ok(())
}

/// Whole years between birth and `on`.
pub fn age_on(birth: NaiveDate, on: NaiveDate) -> i64 {
    let mut age = (on.year() - birth.year()) as i64;
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

pub fn validate_age(age: i64) -> Result<i64, RuleError> {
    if !(1..=99).contains(&age) {
        return Err(RuleError::invalid("age", "age must be between 1 and 99"));
    }
    Ok(age)
}

pub fn validate_phone(raw: &str) -> Result<String, RuleError> {
    let t = raw.trim();
    if t.len() != 10 || !t.chars().all(|c| c.is_ascii_digit()) {
        return Err(RuleError::invalid(
            "phoneNumber",
            "phone number must be exactly 10 digits",
        ));
    }
    Ok(t.to_string())
}

pub fn validate_gender(raw: &str) -> Result<&'static str, RuleError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "male" => Ok("male"),
        "female" => Ok("female"),
        "other" => Ok("other"),
        _ => Err(RuleError::invalid("gender", "gender must be male, female or other")),
    }
}

pub fn gender_initial(gender: &str) -> &'static str {
    match gender.trim().to_ascii_lowercase().as_str() {
        "male" => "M",
        "female" => "F",
        _ => "O",
    }
}

pub fn validate_text(field: &'static str, raw: &str, max: usize, required: bool) -> Result<Option<String>, RuleError> {
    let t = raw.trim();
    if t.is_empty() {
        if required {
            return Err(RuleError::invalid(field, format!("{} is required", field)));
        }
        return Ok(None);
    }
    if t.chars().count() > max {
        return Err(RuleError::invalid(field, format!("{} must be at most {} characters", field, max)));
    }
    Ok(Some(t.to_string()))
}
