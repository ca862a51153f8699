use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "shuled.sqlite3";

/// Blob subdirectories living next to the database inside a workspace.
pub const PHOTOS_DIR: &str = "passport_photos";
pub const TIMETABLES_DIR: &str = "timetables";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS students(
        admission_number TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        form TEXT NOT NULL,
        class_level TEXT NOT NULL,
        guardian_contact TEXT NOT NULL,
        gender TEXT NOT NULL,
        date_of_birth TEXT NOT NULL,
        photo_path TEXT NOT NULL,
        admitted_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_students_class ON students(form, class_level);

    CREATE TABLE IF NOT EXISTS exam_records(
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        admission_number TEXT NOT NULL,
        term INTEGER NOT NULL,
        exam_type TEXT NOT NULL,
        marks REAL NOT NULL,
        recorded_at INTEGER NOT NULL,
        form TEXT NOT NULL,
        class_level TEXT NOT NULL,
        FOREIGN KEY(admission_number) REFERENCES students(admission_number)
    );
    CREATE INDEX IF NOT EXISTS idx_exam_records_lookup
        ON exam_records(subject, admission_number, term);
    CREATE INDEX IF NOT EXISTS idx_exam_records_student ON exam_records(admission_number);

    CREATE TABLE IF NOT EXISTS announcements(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        posted_at TEXT NOT NULL,
        use_countdown INTEGER NOT NULL DEFAULT 0,
        countdown_days INTEGER,
        expires_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_announcements_posted ON announcements(posted_at);

    CREATE TABLE IF NOT EXISTS timetables(
        class_level TEXT PRIMARY KEY,
        file_name TEXT NOT NULL,
        stored_path TEXT NOT NULL,
        uploaded_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("create workspace dir {}", workspace.display()))?;
    std::fs::create_dir_all(workspace.join(PHOTOS_DIR))?;
    std::fs::create_dir_all(workspace.join(TIMETABLES_DIR))?;

    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;
    raw.map(|text| {
        serde_json::from_str(&text)
            .with_context(|| format!("settings value for '{}' is not valid JSON", key))
    })
    .transpose()
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value.to_string()),
    )?;
    Ok(())
}
