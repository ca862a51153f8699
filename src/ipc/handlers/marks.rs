use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    optional_i64, optional_str, required_f64, required_i64, required_str, workspace_db,
};
use crate::ipc::types::{AppState, Request};
use crate::report::{subject_key, ExamRecord, ExamType, Term, DEPARTMENTS};
use crate::store;
use chrono::{Datelike, Local, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// School-year calendar: Jan-Mar is term 1, May-Jul term 2, Sep-Nov
/// term 3. April, August and December are holiday months with no
/// current term.
fn term_for_month(month: u32) -> Option<Term> {
    match month {
        1..=3 => Some(Term::Term1),
        5..=7 => Some(Term::Term2),
        9..=11 => Some(Term::Term3),
        _ => None,
    }
}

fn record_json(record: &ExamRecord) -> serde_json::Value {
    json!({
        "id": record.id,
        "subject": record.subject,
        "admissionNumber": record.admission_number,
        "term": record.term.number(),
        "examType": record.exam_type.as_str(),
        "marks": record.marks,
        "recordedAt": record.recorded_at,
        "form": record.form.as_str(),
        "classLevel": record.class_level.to_string(),
    })
}

fn handle_marks_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !DEPARTMENTS.contains(&subject.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("unknown subject: {subject}"),
            Some(json!({ "subjects": DEPARTMENTS })),
        );
    }
    let admission_number = match required_str(req, "admissionNumber") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term_number = match required_i64(req, "term") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(term) = Term::from_number(term_number) else {
        return err(&req.id, "bad_params", "term must be 1, 2 or 3", None);
    };
    let exam_text = match required_str(req, "examType") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(exam_type) = ExamType::parse(&exam_text) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown exam type: {exam_text}"),
            Some(json!({
                "examTypes": ExamType::ALL.map(|t| t.as_str()),
            })),
        );
    };
    let marks = match required_f64(req, "marks") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student = match store::student_by_admission(conn, &admission_number) {
        Ok(Some(s)) => s,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                format!("no student with admission number {admission_number}"),
                None,
            )
        }
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    let key = subject_key(&subject);
    let already = match conn
        .query_row(
            "SELECT 1 FROM exam_records
             WHERE admission_number = ? AND subject = ? AND term = ? AND exam_type = ?",
            params![admission_number, key, term.number(), exam_type.as_str()],
            |r| r.get::<_, i64>(0),
        )
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already {
        return err(
            &req.id,
            "duplicate_exam",
            format!(
                "Marks for {} have already been submitted for this term.",
                exam_type.as_str()
            ),
            None,
        );
    }

    let record = ExamRecord {
        id: Uuid::new_v4().to_string(),
        subject: key,
        admission_number,
        term,
        exam_type,
        marks,
        recorded_at: Utc::now().timestamp_millis(),
        form: student.form,
        class_level: student.class_level,
    };
    if let Err(e) = conn.execute(
        "INSERT INTO exam_records(id, subject, admission_number, term, exam_type,
                                  marks, recorded_at, form, class_level)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.id,
            record.subject,
            record.admission_number,
            record.term.number(),
            record.exam_type.as_str(),
            record.marks,
            record.recorded_at,
            record.form.as_str(),
            record.class_level.to_string(),
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    tracing::info!(
        admission = %record.admission_number,
        subject = %record.subject,
        exam = %record.exam_type.as_str(),
        term = record.term.number(),
        "marks recorded"
    );
    ok(&req.id, json!({ "record": record_json(&record) }))
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let admission_number = match required_str(req, "admissionNumber") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = optional_str(req, "subject").map(|s| subject_key(&s));
    let term = match optional_i64(req, "term") {
        Some(n) => match Term::from_number(n) {
            Some(t) => Some(t),
            None => return err(&req.id, "bad_params", "term must be 1, 2 or 3", None),
        },
        None => None,
    };

    let records = match store::exam_records(conn, &admission_number, subject.as_deref(), term) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let rows: Vec<serde_json::Value> = records.iter().map(record_json).collect();
    let count = rows.len();
    ok(&req.id, json!({ "records": rows, "count": count }))
}

fn handle_marks_current_term(req: &Request) -> serde_json::Value {
    let month = Local::now().month();
    match term_for_month(month) {
        Some(term) => ok(
            &req.id,
            json!({
                "month": month,
                "term": term.number(),
                "termLabel": term.as_str(),
            }),
        ),
        None => ok(
            &req.id,
            json!({
                "month": month,
                "term": serde_json::Value::Null,
                "termLabel": serde_json::Value::Null,
            }),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.submit" => Some(handle_marks_submit(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        "marks.currentTerm" => Some(handle_marks_current_term(req)),
        _ => None,
    }
}
