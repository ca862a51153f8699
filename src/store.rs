use crate::report::{ClassLevel, ExamRecord, ExamType, Form, Gender, MarkSnapshot, Student, Term};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

/// Read-side failure surfaced to the caller as a distinct error, never
/// as an empty result.
#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

struct StudentRow {
    admission_number: String,
    name: String,
    form: String,
    class_level: String,
    guardian_contact: String,
    gender: String,
    date_of_birth: String,
    photo_path: String,
    admitted_at: String,
}

fn read_student_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        admission_number: row.get(0)?,
        name: row.get(1)?,
        form: row.get(2)?,
        class_level: row.get(3)?,
        guardian_contact: row.get(4)?,
        gender: row.get(5)?,
        date_of_birth: row.get(6)?,
        photo_path: row.get(7)?,
        admitted_at: row.get(8)?,
    })
}

/// Rows are validated into fixed-field values here, at the store
/// boundary; a row that no longer parses is a corrupt_row error, not a
/// silently skipped student.
fn validate_student(row: StudentRow) -> Result<Student, StoreError> {
    let form = Form::parse(&row.form).ok_or_else(|| {
        StoreError::new(
            "corrupt_row",
            format!("student {}: bad form '{}'", row.admission_number, row.form),
        )
    })?;
    let class_level = ClassLevel::parse(&row.class_level).ok_or_else(|| {
        StoreError::new(
            "corrupt_row",
            format!(
                "student {}: bad class level '{}'",
                row.admission_number, row.class_level
            ),
        )
    })?;
    let gender = Gender::parse(&row.gender).ok_or_else(|| {
        StoreError::new(
            "corrupt_row",
            format!(
                "student {}: bad gender '{}'",
                row.admission_number, row.gender
            ),
        )
    })?;
    let date_of_birth = NaiveDate::parse_from_str(&row.date_of_birth, "%Y-%m-%d")
        .map_err(|_| {
            StoreError::new(
                "corrupt_row",
                format!(
                    "student {}: bad date of birth '{}'",
                    row.admission_number, row.date_of_birth
                ),
            )
        })?;
    Ok(Student {
        admission_number: row.admission_number,
        name: row.name,
        form,
        class_level,
        guardian_contact: row.guardian_contact,
        gender,
        date_of_birth,
        photo_path: row.photo_path,
        admitted_at: row.admitted_at,
    })
}

struct RecordRow {
    id: String,
    subject: String,
    admission_number: String,
    term: i64,
    exam_type: String,
    marks: f64,
    recorded_at: i64,
    form: String,
    class_level: String,
}

fn read_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        subject: row.get(1)?,
        admission_number: row.get(2)?,
        term: row.get(3)?,
        exam_type: row.get(4)?,
        marks: row.get(5)?,
        recorded_at: row.get(6)?,
        form: row.get(7)?,
        class_level: row.get(8)?,
    })
}

fn validate_record(row: RecordRow) -> Result<ExamRecord, StoreError> {
    let term = Term::from_number(row.term)
        .ok_or_else(|| StoreError::new("corrupt_row", format!("record {}: bad term {}", row.id, row.term)))?;
    let exam_type = ExamType::parse(&row.exam_type).ok_or_else(|| {
        StoreError::new(
            "corrupt_row",
            format!("record {}: bad exam type '{}'", row.id, row.exam_type),
        )
    })?;
    let form = Form::parse(&row.form)
        .ok_or_else(|| StoreError::new("corrupt_row", format!("record {}: bad form '{}'", row.id, row.form)))?;
    let class_level = ClassLevel::parse(&row.class_level).ok_or_else(|| {
        StoreError::new(
            "corrupt_row",
            format!("record {}: bad class level '{}'", row.id, row.class_level),
        )
    })?;
    Ok(ExamRecord {
        id: row.id,
        subject: row.subject,
        admission_number: row.admission_number,
        term,
        exam_type,
        marks: row.marks,
        recorded_at: row.recorded_at,
        form,
        class_level,
    })
}

const STUDENT_COLUMNS: &str = "admission_number, name, form, class_level, guardian_contact, \
                               gender, date_of_birth, photo_path, admitted_at";

const RECORD_COLUMNS: &str =
    "id, subject, admission_number, term, exam_type, marks, recorded_at, form, class_level";

/// Class roster in admission (insertion) order. Students are never
/// deleted, so rowid order is stable.
pub fn students_by_class(
    conn: &Connection,
    form: Form,
    class_level: ClassLevel,
) -> Result<Vec<Student>, StoreError> {
    let sql = format!(
        "SELECT {} FROM students WHERE form = ? AND class_level = ? ORDER BY rowid",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    let rows = stmt
        .query_map((form.as_str(), class_level.to_string()), read_student_row)
        .map_err(StoreError::query)?;
    let mut students = Vec::new();
    for row in rows {
        students.push(validate_student(row.map_err(StoreError::query)?)?);
    }
    Ok(students)
}

pub fn students_all(conn: &Connection) -> Result<Vec<Student>, StoreError> {
    let sql = format!("SELECT {} FROM students ORDER BY rowid", STUDENT_COLUMNS);
    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    let rows = stmt
        .query_map([], read_student_row)
        .map_err(StoreError::query)?;
    let mut students = Vec::new();
    for row in rows {
        students.push(validate_student(row.map_err(StoreError::query)?)?);
    }
    Ok(students)
}

pub fn student_by_admission(
    conn: &Connection,
    admission_number: &str,
) -> Result<Option<Student>, StoreError> {
    let sql = format!(
        "SELECT {} FROM students WHERE admission_number = ?",
        STUDENT_COLUMNS
    );
    let row = conn
        .query_row(&sql, [admission_number], read_student_row)
        .optional()
        .map_err(StoreError::query)?;
    row.map(validate_student).transpose()
}

/// One student's records, optionally narrowed to a subject key and a
/// term, in (recorded_at, rowid) order. The aggregator's first-match
/// tie-break relies on that ordering.
pub fn exam_records(
    conn: &Connection,
    admission_number: &str,
    subject_key: Option<&str>,
    term: Option<Term>,
) -> Result<Vec<ExamRecord>, StoreError> {
    let mut sql = format!(
        "SELECT {} FROM exam_records WHERE admission_number = ?",
        RECORD_COLUMNS
    );
    let mut params: Vec<Value> = vec![Value::from(admission_number.to_string())];
    if let Some(subject) = subject_key {
        sql.push_str(" AND subject = ?");
        params.push(Value::from(subject.to_string()));
    }
    if let Some(term) = term {
        sql.push_str(" AND term = ?");
        params.push(Value::from(term.number()));
    }
    sql.push_str(" ORDER BY recorded_at, rowid");

    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    let rows = stmt
        .query_map(params_from_iter(params), read_record_row)
        .map_err(StoreError::query)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(validate_record(row.map_err(StoreError::query)?)?);
    }
    Ok(records)
}

/// Fetch everything one build call needs in a single pass: the filtered
/// roster plus all of its term records, batched with one IN-list query
/// and bucketed by (subject key, admission number).
pub fn load_snapshot(
    conn: &Connection,
    form: Form,
    class_level: ClassLevel,
    term: Term,
) -> Result<MarkSnapshot, StoreError> {
    let students = students_by_class(conn, form, class_level)?;

    let mut records: HashMap<(String, String), Vec<ExamRecord>> = HashMap::new();
    if !students.is_empty() {
        let placeholders = std::iter::repeat("?")
            .take(students.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT {} FROM exam_records
             WHERE term = ? AND admission_number IN ({})
             ORDER BY recorded_at, rowid",
            RECORD_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
        let mut params: Vec<Value> = Vec::with_capacity(students.len() + 1);
        params.push(Value::from(term.number()));
        params.extend(
            students
                .iter()
                .map(|s| Value::from(s.admission_number.clone())),
        );
        let rows = stmt
            .query_map(params_from_iter(params), read_record_row)
            .map_err(StoreError::query)?;
        for row in rows {
            let record = validate_record(row.map_err(StoreError::query)?)?;
            records
                .entry((record.subject.clone(), record.admission_number.clone()))
                .or_default()
                .push(record);
        }
    }

    Ok(MarkSnapshot {
        term,
        fetched_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        students,
        records,
    })
}
