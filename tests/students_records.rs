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

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], json!(true), "{} failed: {}", method, value);
    value["result"].clone()
}

fn error_code(v: &Value) -> &str {
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

fn student_params(name: &str, phone: &str) -> Value {
    json!({
        "name": name,
        "dateOfBirth": "2014-05-02",
        "gender": "female",
        "guardianName": format!("Parent of {}", name),
        "phoneNumber": phone,
        "admissionDate": "2026-09-01",
    })
}

#[test]
fn create_validates_fields_and_derives_age() {
    let workspace = temp_dir("dojod-students-validate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut missing_phone = student_params("Asha", "9000000001");
    missing_phone
        .as_object_mut()
        .expect("object")
        .remove("phoneNumber");
    let missing = request(&mut stdin, &mut reader, "1", "students.create", missing_phone);
    assert_eq!(error_code(&missing), "bad_params");
    assert_eq!(missing["error"]["details"]["field"], json!("phoneNumber"));

    let short_phone = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        student_params("Asha", "12345"),
    );
    assert_eq!(error_code(&short_phone), "bad_params");
    assert_eq!(short_phone["error"]["details"]["field"], json!("phoneNumber"));

    let mut bad_gender = student_params("Asha", "9000000001");
    bad_gender["gender"] = json!("unknown");
    let gender = request(&mut stdin, &mut reader, "3", "students.create", bad_gender);
    assert_eq!(gender["error"]["details"]["field"], json!("gender"));

    let mut future_dob = student_params("Asha", "9000000001");
    future_dob["dateOfBirth"] = json!("2027-01-01");
    let dob = request(&mut stdin, &mut reader, "4", "students.create", future_dob);
    assert_eq!(dob["error"]["details"]["field"], json!("dateOfBirth"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        student_params("  Asha  ", " 9000000001 "),
    );
    let student = &created["student"];
    assert_eq!(student["name"], json!("Asha"));
    assert_eq!(student["phoneNumber"], json!("9000000001"));
    assert_eq!(student["age"], json!(12));
    assert_eq!(student["currentBelt"], json!("white"));
    assert_eq!(student["feeStructure"], json!("2_classes_700"));
    assert_eq!(student["monthlyFee"].as_f64(), Some(700.0));
    assert_eq!(student["isActive"], json!(true));

    let student_id = student["id"].as_str().expect("id").to_string();
    let unknown = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": student_id, "patch": { "nickname": "A" } }),
    );
    assert_eq!(error_code(&unknown), "bad_params");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "feeStructure": "4_classes_1000", "instructorName": "Master Ravi" },
        }),
    );
    assert_eq!(updated["student"]["monthlyFee"].as_f64(), Some(1000.0));
    assert_eq!(updated["student"]["instructorName"], json!("Master Ravi"));

    let bad_plan = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentId": student_id, "patch": { "feeStructure": "weekly" } }),
    );
    assert_eq!(bad_plan["error"]["details"]["field"], json!("feeStructure"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_pages_searches_and_hides_deleted_students() {
    let workspace = temp_dir("dojod-students-list");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut ids = Vec::new();
    for (i, (name, phone)) in [("Chitra", "9000000003"), ("asha", "9000000001"), ("Bala", "9000000002")]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "students.create",
            student_params(name, phone),
        );
        ids.push(created["student"]["id"].as_str().expect("id").to_string());
    }

    let page_two = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.list",
        json!({ "page": 2, "pageSize": 2 }),
    );
    assert_eq!(page_two["count"], json!(3));
    assert_eq!(page_two["students"].as_array().map(|s| s.len()), Some(1));
    assert_eq!(page_two["students"][0]["name"], json!("Chitra"));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "pageSize": 2 }),
    );
    assert_eq!(first["students"][0]["name"], json!("asha"));
    assert_eq!(first["students"][1]["name"], json!("Bala"));

    let by_name = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({ "search": "ASH" }),
    );
    assert_eq!(by_name["count"], json!(1));

    let by_phone = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "search": "0000002" }),
    );
    assert_eq!(by_phone["count"], json!(1));
    assert_eq!(by_phone["students"][0]["name"], json!("Bala"));

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.delete",
        json!({ "studentId": ids[0] }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.get",
        json!({ "studentId": ids[0] }),
    );
    assert_eq!(error_code(&gone), "not_found");
    assert_eq!(gone["error"]["details"]["id"], json!(ids[0]));

    let remaining = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(remaining["count"], json!(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_search_is_literal_and_paging_is_bounded() {
    let workspace = temp_dir("dojod-students-search");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut ids = Vec::new();
    for (i, (name, phone)) in [("Élodie Mathew", "9000000011"), ("Arun_K", "9000000012")]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "students.create",
            student_params(name, phone),
        );
        ids.push(created["student"]["id"].as_str().expect("id").to_string());
    }

    let accented = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.list",
        json!({ "search": "élodie" }),
    );
    assert_eq!(accented["count"], json!(1));
    assert_eq!(accented["students"][0]["name"], json!("Élodie Mathew"));

    for (i, pattern) in ["%", "r_n", "A%K"].iter().enumerate() {
        let wild = request_ok(
            &mut stdin,
            &mut reader,
            &format!("w{}", i),
            "students.list",
            json!({ "search": pattern }),
        );
        assert_eq!(wild["count"], json!(0), "pattern {}", pattern);
    }
    let underscore = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "search": "UN_K" }),
    );
    assert_eq!(underscore["count"], json!(1));

    let far_page = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.list",
        json!({ "page": i64::MAX, "pageSize": i64::MAX }),
    );
    assert_eq!(far_page["count"], json!(2));
    assert_eq!(far_page["students"], json!([]));

    let rich = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({ "studentId": ids[0], "patch": { "admissionFee": 1e300 } }),
    );
    assert_eq!(error_code(&rich), "bad_params");
    assert_eq!(rich["error"]["details"]["field"], json!("admissionFee"));

    let bad_period = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.profile",
        json!({ "studentId": ids[0], "attendanceYear": 4294969322_i64, "attendanceMonth": 10 }),
    );
    assert_eq!(error_code(&bad_period), "bad_params");

    let health = request(&mut stdin, &mut reader, "6", "health", json!({}));
    assert_eq!(health["ok"], json!(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dashboard_and_profile_reflect_activity() {
    let workspace = temp_dir("dojod-students-dashboard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let asha = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "students.create",
        student_params("Asha", "9000000001"),
    )["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let bala = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "students.create",
        student_params("Bala", "9000000002"),
    )["student"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let empty = request_ok(&mut stdin, &mut reader, "1", "dashboard.stats", json!({}));
    assert_eq!(empty["totalStudents"], json!(2));
    assert_eq!(empty["pendingFees"], json!(0));
    assert_eq!(empty["date"], json!("2026-10-19"));

    let oct = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.monthOpen",
        json!({ "year": 2026, "month": 10 }),
    );
    let asha_fee = oct["fees"]
        .as_array()
        .expect("fees")
        .iter()
        .find(|f| f["studentId"] == json!(asha))
        .and_then(|f| f["id"].as_str())
        .expect("asha fee")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.recordPayment",
        json!({ "feeId": asha_fee, "amount": 200 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({ "studentId": asha, "date": "2026-10-19", "status": "present" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "studentId": bala, "date": "2026-10-19", "status": "absent" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "beltTests.create",
        json!({ "studentId": bala, "testDate": "2026-10-25", "testedForBelt": "yellow_stripe" }),
    );

    let stats = request_ok(&mut stdin, &mut reader, "7", "dashboard.stats", json!({}));
    assert_eq!(stats["activeStudents"], json!(2));
    assert_eq!(stats["pendingFees"], json!(1));
    assert_eq!(stats["todayAttendance"], json!(1));
    assert_eq!(stats["upcomingTests"], json!(1));

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.profile",
        json!({ "studentId": asha, "attendanceYear": 2026, "attendanceMonth": 10 }),
    );
    assert_eq!(profile["attendance"]["present"], json!(1));
    assert_eq!(profile["attendance"]["period"], json!("2026-10"));
    assert_eq!(profile["fees"]["paid"].as_f64(), Some(200.0));
    assert_eq!(profile["fees"]["pending"].as_f64(), Some(500.0));
    assert_eq!(profile["currentBelt"], json!("white"));
    assert_eq!(profile["generatedOn"], json!("2026-10-19"));

    let half = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.profile",
        json!({ "studentId": asha, "attendanceYear": 2026 }),
    );
    assert_eq!(error_code(&half), "bad_params");

    let academy = request(
        &mut stdin,
        &mut reader,
        "10",
        "academy.update",
        json!({ "patch": { "motto": "x" } }),
    );
    assert_eq!(error_code(&academy), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
