use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_dojod");
    let mut child = Command::new(exe)
        .env("DOJOD_NOW", "2026-10-19T10:00:00")
        .env_remove("DOJOD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dojod");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(v: &Value) -> &str {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

#[test]
fn requests_before_workspace_select_are_rejected() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert_eq!(health["result"]["today"], json!("2026-10-19"));
    assert!(health["result"]["workspacePath"].is_null());

    let listed = request(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(error_code(&listed), "no_workspace");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let bad = read_response(&mut reader);
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(error_code(&bad), "bad_json");

    writeln!(stdin, "{}", json!({ "id": "3", "method": "nope.nothing" })).expect("write");
    stdin.flush().expect("flush");
    let unknown = read_response(&mut reader);
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("dojod-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let fees_csv = workspace.join("fees.csv");
    let attendance_csv = workspace.join("attendance.csv");
    let xlsx_out = workspace.join("certificates.xlsx");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], json!(true));

    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "name": "Smoke Student",
            "dateOfBirth": "2014-05-02",
            "gender": "male",
            "guardianName": "Smoke Parent",
            "phoneNumber": "9876543210",
            "admissionDate": "2026-09-01",
        }),
    );
    assert_eq!(created["ok"], json!(true), "{}", created);
    let student_id = created["result"]["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();

    let calls: Vec<(&str, Value)> = vec![
        ("academy.get", json!({})),
        ("academy.update", json!({ "patch": { "phone": "0471222333" } })),
        ("students.list", json!({})),
        ("students.get", json!({ "studentId": student_id })),
        ("students.update", json!({ "studentId": student_id, "patch": { "district": "Kollam" } })),
        ("students.profile", json!({ "studentId": student_id })),
        ("fees.monthOpen", json!({ "year": 2026, "month": 10 })),
        ("fees.list", json!({ "studentId": student_id })),
        ("fees.history", json!({ "studentId": student_id })),
        ("attendance.dayOpen", json!({ "date": "2026-10-19" })),
        ("attendance.mark", json!({ "studentId": student_id, "date": "2026-10-19", "status": "late" })),
        ("attendance.list", json!({ "from": "2026-10-01", "to": "2026-10-31" })),
        ("attendance.studentStats", json!({ "studentId": student_id })),
        ("beltTests.eligibleBelts", json!({ "studentId": student_id })),
        ("beltTests.create", json!({ "studentId": student_id, "testDate": "2026-10-25", "testedForBelt": "yellow_stripe" })),
        ("beltTests.list", json!({})),
        ("events.create", json!({ "studentId": student_id, "eventName": "District Open", "date": "2026-09-20" })),
        ("events.list", json!({ "studentId": student_id })),
        ("dashboard.stats", json!({})),
        ("reports.feesMonthlyModel", json!({ "year": 2026, "month": 10 })),
        ("reports.feeHistoryModel", json!({ "studentId": student_id })),
        ("reports.attendanceModel", json!({ "from": "2026-10-01", "to": "2026-10-31" })),
        ("reports.studentProfileModel", json!({ "studentId": student_id })),
        ("reports.beltCertificateListModel", json!({ "status": "all" })),
        ("exports.beltCertificateListXlsx", json!({ "outPath": xlsx_out.to_string_lossy() })),
        ("exports.feesCsv", json!({ "outPath": fees_csv.to_string_lossy(), "year": 2026, "month": 10 })),
        ("exports.attendanceCsv", json!({ "outPath": attendance_csv.to_string_lossy(), "from": "2026-10-01", "to": "2026-10-31" })),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle_out.to_string_lossy() })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("c{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, params);
        assert_eq!(resp["ok"], json!(true), "{} failed: {}", method, resp);
    }

    assert!(xlsx_out.is_file());
    assert!(fees_csv.is_file());
    assert!(attendance_csv.is_file());
    assert!(bundle_out.is_file());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn backup_bundle_restores_into_a_new_workspace() {
    let workspace = temp_dir("dojod-backup-src");
    let restored = temp_dir("dojod-backup-dst");
    let bundle = workspace.join("dojo-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "name": "Backed Up",
            "dateOfBirth": "2012-01-15",
            "gender": "female",
            "guardianName": "Guardian",
            "phoneNumber": "9000000001",
        }),
    );
    assert_eq!(created["ok"], json!(true), "{}", created);

    let exported = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["result"]["bundleFormat"], json!("dojod-workspace-v1"));

    let imported = request(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": restored.to_string_lossy() }),
    );
    assert_eq!(imported["ok"], json!(true), "{}", imported);
    assert_eq!(
        imported["result"]["dbSha256"],
        exported["result"]["dbSha256"]
    );

    let health = request(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(
        health["result"]["workspacePath"].as_str(),
        Some(restored.to_string_lossy().as_ref())
    );
    let listed = request(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(listed["result"]["count"], json!(1));
    assert_eq!(listed["result"]["students"][0]["name"], json!("Backed Up"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
}
