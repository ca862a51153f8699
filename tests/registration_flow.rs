use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{tag}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

struct Daemon {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

fn spawn_daemon() -> Daemon {
    let mut child = Command::new(env!("CARGO_BIN_EXE_shuled"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn shuled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = BufReader::new(child.stdout.take().expect("child stdout"));
    Daemon {
        child,
        stdin: Some(stdin),
        stdout,
    }
}

impl Daemon {
    fn request(&mut self, id: &str, method: &str, params: Value) -> Value {
        let stdin = self.stdin.as_mut().expect("daemon stdin open");
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(stdin, "{payload}").expect("write request");
        stdin.flush().expect("flush request");

        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("read response line");
        let reply: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(
            reply.get("id").and_then(Value::as_str),
            Some(id),
            "id echo for {method}"
        );
        reply
    }

    fn request_ok(&mut self, id: &str, method: &str, params: Value) -> Value {
        let reply = self.request(id, method, params);
        assert_eq!(
            reply.get("ok").and_then(Value::as_bool),
            Some(true),
            "{method} failed: {reply}"
        );
        reply.get("result").cloned().expect("result payload")
    }

    fn shutdown(mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}

fn error_code(reply: &Value) -> &str {
    reply
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

#[test]
fn registration_assigns_admission_number_and_copies_photo() {
    let workspace = temp_dir("shuled-reg");
    let assets = temp_dir("shuled-reg-assets");
    let photo = assets.join("john.png");
    std::fs::write(&photo, b"png-bytes").expect("write photo");

    let mut d = spawn_daemon();
    let _ = d.request_ok(
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let result = d.request_ok(
        "2",
        "students.register",
        json!({
            "name": "John Otieno",
            "form": "Form 1",
            "guardianContact": "+254 712 345678",
            "gender": "Male",
            "dateOfBirth": "2012-06-15",
            "photoPath": photo.to_string_lossy(),
        }),
    );
    let student = result.get("student").expect("student payload");
    let admission = student
        .get("admissionNumber")
        .and_then(|v| v.as_str())
        .expect("admissionNumber");
    assert_eq!(admission.len(), 9, "admission number shape: {}", admission);
    assert!(
        admission.starts_with("JO1"),
        "prefix and form digit: {}",
        admission
    );
    assert_eq!(admission.as_bytes()[5], b'-');
    assert!(admission[6..].chars().all(|c| c.is_ascii_digit()));

    let class_level = student
        .get("classLevel")
        .and_then(|v| v.as_str())
        .expect("classLevel");
    assert!(
        matches!(class_level, "1A" | "1B" | "1C"),
        "stream drawn from A/B/C: {}",
        class_level
    );
    assert_eq!(student.get("form").and_then(|v| v.as_str()), Some("Form 1"));
    assert_eq!(student.get("gender").and_then(|v| v.as_str()), Some("Male"));
    assert_eq!(
        student.get("dateOfBirth").and_then(|v| v.as_str()),
        Some("2012-06-15")
    );

    let photo_rel = student
        .get("photoPath")
        .and_then(|v| v.as_str())
        .expect("photoPath");
    assert_eq!(photo_rel, format!("passport_photos/{}.png", admission));
    let copied = std::fs::read(workspace.join(photo_rel)).expect("copied photo readable");
    assert_eq!(copied, b"png-bytes");

    d.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(assets);
}

#[test]
fn registration_validates_inputs() {
    let workspace = temp_dir("shuled-reg-invalid");
    let assets = temp_dir("shuled-reg-invalid-assets");
    let photo = assets.join("jane.jpg");
    std::fs::write(&photo, b"jpeg-bytes").expect("write photo");

    let mut d = spawn_daemon();
    let _ = d.request_ok(
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing_photo = d.request(
        "2",
        "students.register",
        json!({
            "name": "Jane Njeri",
            "form": "Form 2",
            "guardianContact": "+254 700 111222",
            "gender": "Female",
            "dateOfBirth": "2011-01-20",
            "photoPath": assets.join("nope.jpg").to_string_lossy(),
        }),
    );
    assert_eq!(error_code(&missing_photo), "not_found");

    let bad_form = d.request(
        "3",
        "students.register",
        json!({
            "name": "Jane Njeri",
            "form": "Form 9",
            "guardianContact": "+254 700 111222",
            "gender": "Female",
            "dateOfBirth": "2011-01-20",
            "photoPath": photo.to_string_lossy(),
        }),
    );
    assert_eq!(error_code(&bad_form), "bad_params");

    let bad_dob = d.request(
        "4",
        "students.register",
        json!({
            "name": "Jane Njeri",
            "form": "Form 2",
            "guardianContact": "+254 700 111222",
            "gender": "Female",
            "dateOfBirth": "20-01-2011",
            "photoPath": photo.to_string_lossy(),
        }),
    );
    assert_eq!(error_code(&bad_dob), "bad_params");

    let missing_name = d.request(
        "5",
        "students.register",
        json!({
            "form": "Form 2",
            "guardianContact": "+254 700 111222",
            "gender": "Female",
            "dateOfBirth": "2011-01-20",
            "photoPath": photo.to_string_lossy(),
        }),
    );
    assert_eq!(error_code(&missing_name), "bad_params");

    d.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(assets);
}

#[test]
fn search_matches_names_loosely_and_admissions_exactly() {
    let workspace = temp_dir("shuled-search");
    let assets = temp_dir("shuled-search-assets");
    let photo = assets.join("p.jpg");
    std::fs::write(&photo, b"jpeg-bytes").expect("write photo");

    let mut d = spawn_daemon();
    let _ = d.request_ok(
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let result = d.request_ok(
        "2",
        "students.register",
        json!({
            "name": "Wanjiku Kamau",
            "form": "Form 3",
            "guardianContact": "+254 722 333444",
            "gender": "Female",
            "dateOfBirth": "2009-09-09",
            "photoPath": photo.to_string_lossy(),
        }),
    );
    let student = result.get("student").expect("student payload");
    let admission = student
        .get("admissionNumber")
        .and_then(|v| v.as_str())
        .expect("admissionNumber")
        .to_string();
    let class_level = student
        .get("classLevel")
        .and_then(|v| v.as_str())
        .expect("classLevel")
        .to_string();

    // Case-insensitive on the name.
    let by_name = d.request_ok(
        "3",
        "students.search",
        json!({ "form": "Form 3", "classLevel": class_level, "query": "KAMAU" }),
    );
    assert_eq!(by_name.get("count").and_then(|v| v.as_i64()), Some(1));

    // Case-sensitive on the admission number.
    let by_admission = d.request_ok(
        "4",
        "students.search",
        json!({ "form": "Form 3", "classLevel": class_level, "query": admission }),
    );
    assert_eq!(by_admission.get("count").and_then(|v| v.as_i64()), Some(1));

    let lowercased = d.request_ok(
        "5",
        "students.search",
        json!({
            "form": "Form 3",
            "classLevel": class_level,
            "query": admission.to_lowercase(),
        }),
    );
    assert_eq!(lowercased.get("count").and_then(|v| v.as_i64()), Some(0));

    // Blank query returns the whole class.
    let all = d.request_ok(
        "6",
        "students.search",
        json!({ "form": "Form 3", "classLevel": class_level }),
    );
    assert_eq!(all.get("count").and_then(|v| v.as_i64()), Some(1));

    d.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(assets);
}

#[test]
fn list_filters_by_form_and_class_level() {
    let workspace = temp_dir("shuled-list");
    let assets = temp_dir("shuled-list-assets");
    let photo = assets.join("p.jpg");
    std::fs::write(&photo, b"jpeg-bytes").expect("write photo");

    let mut d = spawn_daemon();
    let _ = d.request_ok(
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut form1_class = String::new();
    for (i, (name, form)) in [
        ("Abel Mwangi", "Form 1"),
        ("Betty Achieng", "Form 1"),
        ("Carol Wafula", "Form 4"),
    ]
    .iter()
    .enumerate()
    {
        let result = d.request_ok(
            &format!("r{}", i),
            "students.register",
            json!({
                "name": name,
                "form": form,
                "guardianContact": "+254 733 000111",
                "gender": "Other",
                "dateOfBirth": "2010-12-31",
                "photoPath": photo.to_string_lossy(),
            }),
        );
        if i == 0 {
            form1_class = result
                .get("student")
                .and_then(|s| s.get("classLevel"))
                .and_then(|v| v.as_str())
                .expect("classLevel")
                .to_string();
        }
    }

    let everyone = d.request_ok("4", "students.list", json!({}));
    assert_eq!(everyone.get("count").and_then(|v| v.as_i64()), Some(3));

    let form1 = d.request_ok("5", "students.list", json!({ "form": "Form 1" }));
    assert_eq!(form1.get("count").and_then(|v| v.as_i64()), Some(2));

    let one_class = d.request_ok(
        "6",
        "students.list",
        json!({ "form": "Form 1", "classLevel": form1_class }),
    );
    let count = one_class
        .get("count")
        .and_then(|v| v.as_i64())
        .expect("count");
    assert!(count >= 1, "the first student's class has at least them");
    for s in one_class
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students array")
    {
        assert_eq!(
            s.get("classLevel").and_then(|v| v.as_str()),
            Some(form1_class.as_str())
        );
    }

    let form4 = d.request_ok("7", "students.list", json!({ "form": "Form 4" }));
    assert_eq!(form4.get("count").and_then(|v| v.as_i64()), Some(1));

    d.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(assets);
}
