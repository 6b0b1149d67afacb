use chrono::{NaiveDate, NaiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BeltLevel {
    White,
    YellowStripe,
    Yellow,
    GreenStripe,
    Green,
    BlueStripe,
    Blue,
    RedStripe,
    Red,
    RedBlack,
    Black1stDan,
    Black2ndDan,
    Black3rdDan,
    Black4thDan,
    Black5thDan,
}

pub const ALL_BELTS: [BeltLevel; 15] = [
    BeltLevel::White,
    BeltLevel::YellowStripe,
    BeltLevel::Yellow,
    BeltLevel::GreenStripe,
    BeltLevel::Green,
    BeltLevel::BlueStripe,
    BeltLevel::Blue,
    BeltLevel::RedStripe,
    BeltLevel::Red,
    BeltLevel::RedBlack,
    BeltLevel::Black1stDan,
    BeltLevel::Black2ndDan,
    BeltLevel::Black3rdDan,
    BeltLevel::Black4thDan,
    BeltLevel::Black5thDan,
];

impl BeltLevel {
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_ascii_lowercase();
        ALL_BELTS.iter().copied().find(|b| b.code() == key)
    }

    pub fn code(self) -> &'static str {
        match self {
            BeltLevel::White => "white",
            BeltLevel::YellowStripe => "yellow_stripe",
            BeltLevel::Yellow => "yellow",
            BeltLevel::GreenStripe => "green_stripe",
            BeltLevel::Green => "green",
            BeltLevel::BlueStripe => "blue_stripe",
            BeltLevel::Blue => "blue",
            BeltLevel::RedStripe => "red_stripe",
            BeltLevel::Red => "red",
            BeltLevel::RedBlack => "red_black",
            BeltLevel::Black1stDan => "black_1st_dan",
            BeltLevel::Black2ndDan => "black_2nd_dan",
            BeltLevel::Black3rdDan => "black_3rd_dan",
            BeltLevel::Black4thDan => "black_4th_dan",
            BeltLevel::Black5thDan => "black_5th_dan",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BeltLevel::White => "White",
            BeltLevel::YellowStripe => "Yellow Stripe",
            BeltLevel::Yellow => "Yellow",
            BeltLevel::GreenStripe => "Green Stripe",
            BeltLevel::Green => "Green",
            BeltLevel::BlueStripe => "Blue Stripe",
            BeltLevel::Blue => "Blue",
            BeltLevel::RedStripe => "Red Stripe",
            BeltLevel::Red => "Red",
            BeltLevel::RedBlack => "Red Black",
            BeltLevel::Black1stDan => "Black 1st Dan",
            BeltLevel::Black2ndDan => "Black 2nd Dan",
            BeltLevel::Black3rdDan => "Black 3rd Dan",
            BeltLevel::Black4thDan => "Black 4th Dan",
            BeltLevel::Black5thDan => "Black 5th Dan",
        }
    }

    /// Colour grades count down from 10th kup (white) to 1st kup (red-black).
    pub fn kup(self) -> Option<u8> {
        let rank = ALL_BELTS.iter().position(|b| *b == self)? as u8;
        if self <= BeltLevel::RedBlack {
            Some(10 - rank)
        } else {
            None
        }
    }

    /// Value for the "Kup applied for" column.
    pub fn kup_column(self) -> String {
        match self.kup() {
            Some(k) => k.to_string(),
            None => self.label().to_string(),
        }
    }

    pub fn higher(self) -> impl Iterator<Item = BeltLevel> {
        ALL_BELTS.into_iter().filter(move |b| *b > self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Pending,
    Passed,
    Failed,
}

impl TestResult {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TestResult::Pending),
            "passed" => Some(TestResult::Passed),
            "failed" => Some(TestResult::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestResult::Pending => "pending",
            TestResult::Passed => "passed",
            TestResult::Failed => "failed",
        }
    }
}

/// Belt held after the most recent passed test, falling back to the enrolled belt.
pub fn effective_belt<I>(enrolled: BeltLevel, tests: I) -> BeltLevel
where
    I: IntoIterator<Item = (NaiveDate, BeltLevel, TestResult)>,
{
    tests
        .into_iter()
        .filter(|(_, _, r)| *r == TestResult::Passed)
        .max_by_key(|(date, belt, _)| (*date, *belt))
        .map(|(_, belt, _)| belt)
        .unwrap_or(enrolled)
}

/// Pending tests stay upcoming until the cutoff hour on the test day.
pub fn is_upcoming(test_date: NaiveDate, result: TestResult, now: NaiveDateTime, cutoff_hour: u32) -> bool {
    if result != TestResult::Pending {
        return false;
    }
    let today = now.date();
    if test_date > today {
        return true;
    }
    if test_date != today {
        return false;
    }
    match chrono::NaiveTime::from_hms_opt(cutoff_hour, 0, 0) {
        Some(cutoff) => now.time() < cutoff,
        None => true,
    }
}

/// Keeps `[A-Za-z0-9-]`, at most 20 characters.
pub fn sanitize_certification_no(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(20)
        .collect()
}
