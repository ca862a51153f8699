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
        assert!(!line.trim().is_empty(), "empty response for {method}");
        let reply: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(
            reply.get("id").and_then(Value::as_str),
            Some(id),
            "id echo for {method}"
        );
        if reply.get("ok").and_then(Value::as_bool) == Some(false) {
            assert_ne!(error_code(&reply), "not_implemented", "unknown method {method}");
        }
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
        .unwrap_or("unknown")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("shuled-router-smoke");
    let assets = temp_dir("shuled-router-smoke-assets");
    let photo = assets.join("student.jpg");
    std::fs::write(&photo, b"jpeg-bytes").expect("write photo");
    let pdf = assets.join("timetable.pdf");
    std::fs::write(&pdf, b"%PDF-1.4\nsmoke").expect("write pdf");
    let bundle_out = assets.join("smoke-backup.shuledbackup.zip");

    let mut d = spawn_daemon();

    let health = d.request_ok("1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = d.request_ok(
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let profile = d.request_ok("3", "school.profileGet", json!({}));
    assert!(profile
        .get("school")
        .and_then(|s| s.get("name"))
        .and_then(|v| v.as_str())
        .is_some());
    let _ = d.request_ok(
        "4",
        "school.profileUpdate",
        json!({ "name": "Smoke High School" }),
    );

    let registered = d.request_ok(
        "5",
        "students.register",
        json!({
            "name": "Smoke Student",
            "form": "Form 1",
            "guardianContact": "+254 700 000000",
            "gender": "Female",
            "dateOfBirth": "2012-04-01",
            "photoPath": photo.to_string_lossy(),
        }),
    );
    let student = registered.get("student").expect("student payload");
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

    let search = d.request_ok(
        "6",
        "students.search",
        json!({ "form": "Form 1", "classLevel": class_level, "query": "smoke" }),
    );
    assert_eq!(search.get("count").and_then(|v| v.as_i64()), Some(1));
    let _ = d.request_ok("7", "students.list", json!({}));

    let _ = d.request_ok("8", "marks.currentTerm", json!({}));
    let _ = d.request_ok(
        "9",
        "marks.submit",
        json!({
            "admissionNumber": admission,
            "subject": "Mathematics",
            "term": 3,
            "examType": "Opener",
            "marks": 72.0,
        }),
    );
    let listed = d.request_ok("10", "marks.list", json!({ "admissionNumber": admission }));
    assert_eq!(listed.get("count").and_then(|v| v.as_i64()), Some(1));

    let model = d.request_ok(
        "11",
        "reports.reportCardsModel",
        json!({ "form": "Form 1", "classLevel": class_level }),
    );
    assert_eq!(model.get("studentCount").and_then(|v| v.as_i64()), Some(1));

    let _ = d.request_ok(
        "12",
        "timetable.upload",
        json!({ "classLevel": class_level, "filePath": pdf.to_string_lossy() }),
    );
    let timetables = d.request_ok("13", "timetable.list", json!({}));
    assert_eq!(timetables.get("count").and_then(|v| v.as_i64()), Some(1));

    let created = d.request_ok(
        "14",
        "announcements.create",
        json!({ "title": "Sports day", "content": "Friday, main field." }),
    );
    let announcement_id = created
        .get("announcement")
        .and_then(|a| a.get("id"))
        .and_then(|v| v.as_str())
        .expect("announcement id")
        .to_string();
    let _ = d.request_ok(
        "15",
        "announcements.update",
        json!({
            "id": announcement_id,
            "title": "Sports day (moved)",
            "content": "Now on Saturday.",
        }),
    );
    let _ = d.request_ok("16", "announcements.list", json!({}));
    let _ = d.request_ok("17", "announcements.recent", json!({ "limit": 3 }));

    let _ = d.request_ok(
        "18",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy(),
        }),
    );
    let _ = d.request_ok(
        "19",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy(),
        }),
    );

    let _ = d.request_ok("20", "timetable.delete", json!({ "classLevel": class_level }));
    let _ = d.request_ok("21", "announcements.delete", json!({ "id": announcement_id }));

    d.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(assets);
}

#[test]
fn unknown_methods_fall_through_to_not_implemented() {
    let mut d = spawn_daemon();

    let reply = {
        let stdin = d.stdin.as_mut().expect("daemon stdin open");
        let payload = json!({ "id": "x1", "method": "no.suchMethod", "params": {} });
        writeln!(stdin, "{payload}").expect("write request");
        stdin.flush().expect("flush request");
        let mut line = String::new();
        d.stdout.read_line(&mut line).expect("read response line");
        serde_json::from_str::<Value>(line.trim()).expect("parse response json")
    };
    assert_eq!(reply.get("id").and_then(Value::as_str), Some("x1"));
    assert_eq!(reply.get("ok").and_then(Value::as_bool), Some(false));
    assert_eq!(error_code(&reply), "not_implemented");
    assert!(reply
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .is_some_and(|m| m.contains("no.suchMethod")));

    d.shutdown();
}

#[test]
fn malformed_json_lines_get_a_bad_request_envelope() {
    let mut d = spawn_daemon();

    let reply = {
        let stdin = d.stdin.as_mut().expect("daemon stdin open");
        writeln!(stdin, "this is not json").expect("write garbage");
        stdin.flush().expect("flush garbage");
        let mut line = String::new();
        d.stdout.read_line(&mut line).expect("read response line");
        serde_json::from_str::<Value>(line.trim()).expect("parse response json")
    };
    assert!(reply.get("id").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(reply.get("ok").and_then(Value::as_bool), Some(false));
    assert_eq!(error_code(&reply), "bad_request");

    d.shutdown();
}

#[test]
fn data_methods_require_a_selected_workspace() {
    let mut d = spawn_daemon();

    let reply = d.request("w1", "students.list", json!({}));
    assert_eq!(reply.get("ok").and_then(Value::as_bool), Some(false));
    assert_eq!(error_code(&reply), "no_workspace");

    d.shutdown();
}
