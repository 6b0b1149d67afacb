use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "dojo.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            age INTEGER NOT NULL,
            date_of_birth TEXT NOT NULL,
            gender TEXT NOT NULL,
            guardian_name TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            address TEXT,
            state TEXT,
            district TEXT,
            national_id TEXT,
            admission_fee INTEGER NOT NULL DEFAULT 0,
            admission_date TEXT NOT NULL,
            current_belt TEXT NOT NULL DEFAULT 'white',
            instructor_name TEXT,
            tai_certification_number TEXT,
            fee_structure TEXT NOT NULL DEFAULT '2_classes_700',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_active_name ON students(is_active, name)",
        [],
    )?;

    // Amounts are stored as integer paise.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monthly_fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL,
            amount INTEGER,
            partial_amount_paid INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'unpaid',
            paid_date TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, year, month)
        )",
        [],
    )?;
    ensure_monthly_fees_payment_method(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monthly_fees_period ON monthly_fees(year, month)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monthly_fees_student ON monthly_fees(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            fee_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            paid_on TEXT NOT NULL,
            amount INTEGER NOT NULL,
            FOREIGN KEY(fee_id) REFERENCES monthly_fees(id),
            UNIQUE(fee_id, seq)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_fee ON fee_payments(fee_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS belt_tests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            test_date TEXT NOT NULL,
            tested_for_belt TEXT NOT NULL,
            test_fee INTEGER NOT NULL DEFAULT 0,
            result TEXT NOT NULL DEFAULT 'pending',
            certification_no TEXT,
            examiner_name TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_belt_tests_student ON belt_tests(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_belt_tests_date ON belt_tests(test_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_events(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            event_name TEXT NOT NULL,
            date TEXT NOT NULL,
            location TEXT,
            participation_type TEXT NOT NULL,
            result TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_events_student ON student_events(student_id)",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before payment methods were tracked lack the column.
fn ensure_monthly_fees_payment_method(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "monthly_fees", "payment_method")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE monthly_fees ADD COLUMN payment_method TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
