use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, workspace_db, workspace_path};
use crate::ipc::types::{AppState, Request};
use crate::report::{ClassLevel, Form, Gender, Student};
use crate::store;
use chrono::{Datelike, NaiveDate, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Suffix space is only 1000 wide per (prefix, form, year) bucket, so a
/// busy intake year can collide; the register loop retries a bounded
/// number of times before giving up.
const ADMISSION_ATTEMPTS: usize = 20;

/// Uniform-enough draw from the v4 uuid generator, the only entropy
/// source this daemon carries.
fn random_below(bound: u128) -> u128 {
    Uuid::new_v4().as_u128() % bound
}

fn random_stream() -> char {
    match random_below(3) {
        0 => 'A',
        1 => 'B',
        _ => 'C',
    }
}

/// 2-letter uppercased name prefix ("XX" when the name is shorter than
/// two characters), form digit, 2-digit year, then a zero-padded 3-digit
/// random suffix: "JO326-042".
fn generate_admission_number(name: &str, form: Form, year: i32) -> String {
    let prefix: String = name.chars().take(2).flat_map(char::to_uppercase).collect();
    let prefix = if name.chars().count() < 2 {
        "XX".to_string()
    } else {
        prefix
    };
    format!(
        "{}{}{:02}-{:03}",
        prefix,
        form.digit(),
        year.rem_euclid(100),
        random_below(1000)
    )
}

fn student_json(student: &Student) -> serde_json::Value {
    json!({
        "admissionNumber": student.admission_number,
        "name": student.name,
        "form": student.form.as_str(),
        "classLevel": student.class_level.to_string(),
        "guardianContact": student.guardian_contact,
        "gender": student.gender.as_str(),
        "dateOfBirth": student.date_of_birth.format("%Y-%m-%d").to_string(),
        "photoPath": student.photo_path,
        "admittedAt": student.admitted_at,
    })
}

fn handle_students_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match workspace_path(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let form_text = match required_str(req, "form") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(form) = Form::parse(&form_text) else {
        return err(
            &req.id,
            "bad_params",
            "form must be one of 'Form 1'..'Form 4'",
            None,
        );
    };
    let guardian_contact = match required_str(req, "guardianContact") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let gender_text = match required_str(req, "gender") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(gender) = Gender::parse(&gender_text) else {
        return err(
            &req.id,
            "bad_params",
            "gender must be Male, Female or Other",
            None,
        );
    };
    let dob_text = match required_str(req, "dateOfBirth") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Ok(date_of_birth) = NaiveDate::parse_from_str(&dob_text, "%Y-%m-%d") else {
        return err(&req.id, "bad_params", "dateOfBirth must be YYYY-MM-DD", None);
    };
    let photo_param = match required_str(req, "photoPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let photo_src = std::path::Path::new(&photo_param);
    if !photo_src.is_file() {
        return err(
            &req.id,
            "not_found",
            "photo file not found",
            Some(json!({ "path": photo_param })),
        );
    }

    let year = Utc::now().year();
    let mut admission_number = generate_admission_number(&name, form, year);
    let mut attempts = 1usize;
    loop {
        let taken = match conn
            .query_row(
                "SELECT 1 FROM students WHERE admission_number = ?",
                [&admission_number],
                |r| r.get::<_, i64>(0),
            )
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !taken {
            break;
        }
        if attempts >= ADMISSION_ATTEMPTS {
            return err(
                &req.id,
                "db_insert_failed",
                "could not allocate a unique admission number",
                Some(json!({ "attempts": attempts })),
            );
        }
        admission_number = generate_admission_number(&name, form, year);
        attempts += 1;
    }

    let class_level = ClassLevel {
        form,
        stream: random_stream(),
    };

    let ext = photo_src
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    let photo_rel = format!("{}/{}.{}", db::PHOTOS_DIR, admission_number, ext);
    if let Err(e) = std::fs::copy(photo_src, workspace.join(&photo_rel)) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": photo_param })),
        );
    }

    let student = Student {
        admission_number,
        name,
        form,
        class_level,
        guardian_contact,
        gender,
        date_of_birth,
        photo_path: photo_rel,
        admitted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO students(admission_number, name, form, class_level, guardian_contact,
                              gender, date_of_birth, photo_path, admitted_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student.admission_number,
            &student.name,
            student.form.as_str(),
            student.class_level.to_string(),
            &student.guardian_contact,
            student.gender.as_str(),
            student.date_of_birth.format("%Y-%m-%d").to_string(),
            &student.photo_path,
            &student.admitted_at,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    tracing::info!(
        admission = %student.admission_number,
        class = %student.class_level,
        "student registered"
    );
    ok(&req.id, json!({ "student": student_json(&student) }))
}

fn handle_students_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form_text = match required_str(req, "form") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(form) = Form::parse(&form_text) else {
        return err(
            &req.id,
            "bad_params",
            "form must be one of 'Form 1'..'Form 4'",
            None,
        );
    };
    let class_text = match required_str(req, "classLevel") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(class_level) = ClassLevel::parse(&class_text) else {
        return err(
            &req.id,
            "bad_params",
            "classLevel must be a form digit plus stream letter, e.g. 3B",
            None,
        );
    };
    let query = optional_str(req, "query").unwrap_or_default();

    let students = match store::students_by_class(conn, form, class_level) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    // Name matching is case-insensitive; admission-number matching is
    // case-sensitive. The asymmetry is what the entry screens expect.
    let needle = query.to_lowercase();
    let hits: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&needle) || s.admission_number.contains(&query))
        .map(student_json)
        .collect();
    let count = hits.len();
    ok(&req.id, json!({ "students": hits, "count": count }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form = match optional_str(req, "form") {
        Some(text) => match Form::parse(&text) {
            Some(f) => Some(f),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "form must be one of 'Form 1'..'Form 4'",
                    None,
                )
            }
        },
        None => None,
    };
    let class_level = match optional_str(req, "classLevel") {
        Some(text) => match ClassLevel::parse(&text) {
            Some(c) => Some(c),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "classLevel must be a form digit plus stream letter, e.g. 3B",
                    None,
                )
            }
        },
        None => None,
    };

    let students = match store::students_all(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let filtered: Vec<serde_json::Value> = students
        .iter()
        .filter(|s| form.map(|f| s.form == f).unwrap_or(true))
        .filter(|s| class_level.map(|c| s.class_level == c).unwrap_or(true))
        .map(student_json)
        .collect();
    let count = filtered.len();
    ok(&req.id, json!({ "students": filtered, "count": count }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.register" => Some(handle_students_register(state, req)),
        "students.search" => Some(handle_students_search(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
