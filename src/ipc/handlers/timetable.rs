use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, workspace_db, workspace_path};
use crate::ipc::types::{AppState, Request};
use crate::report::ClassLevel;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::Path;

fn timetable_json(
    class_level: &str,
    file_name: &str,
    stored_path: &str,
    uploaded_at: &str,
) -> serde_json::Value {
    json!({
        "classLevel": class_level,
        "fileName": file_name,
        "storedPath": stored_path,
        "uploadedAt": uploaded_at,
    })
}

fn handle_timetable_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match workspace_path(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
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
    let file_param = match required_str(req, "filePath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let src = Path::new(&file_param);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "timetable file not found",
            Some(json!({ "path": file_param })),
        );
    }
    let is_pdf = src
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return err(
            &req.id,
            "bad_params",
            "only PDF timetables are supported",
            Some(json!({ "path": file_param })),
        );
    }
    let Some(file_name) = src.file_name().and_then(|n| n.to_str()) else {
        return err(&req.id, "bad_params", "filePath has no file name", None);
    };

    let class_key = class_level.to_string();
    let previous: Option<String> = match conn
        .query_row(
            "SELECT stored_path FROM timetables WHERE class_level = ?",
            [&class_key],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let stored_rel = format!("{}/{}/{}", db::TIMETABLES_DIR, class_key, file_name);
    let dest = workspace.join(&stored_rel);
    if let Some(parent) = dest.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(&req.id, "io_failed", e.to_string(), None);
        }
    }
    if let Err(e) = std::fs::copy(src, &dest) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": file_param })),
        );
    }

    let uploaded_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    if let Err(e) = conn.execute(
        "INSERT INTO timetables(class_level, file_name, stored_path, uploaded_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_level) DO UPDATE SET
             file_name = excluded.file_name,
             stored_path = excluded.stored_path,
             uploaded_at = excluded.uploaded_at",
        (&class_key, file_name, &stored_rel, &uploaded_at),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    // A replaced upload leaves its old file behind; removal is
    // best-effort since the row already points at the new one.
    if let Some(old) = previous {
        if old != stored_rel {
            if let Err(e) = std::fs::remove_file(workspace.join(&old)) {
                tracing::warn!(path = %old, error = %e, "stale timetable file not removed");
            }
        }
    }

    tracing::info!(class = %class_key, file = file_name, "timetable uploaded");
    ok(
        &req.id,
        json!({
            "timetable": timetable_json(&class_key, file_name, &stored_rel, &uploaded_at),
        }),
    )
}

fn handle_timetable_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT class_level, file_name, stored_path, uploaded_at
         FROM timetables ORDER BY class_level",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([], |r| {
            let class_level: String = r.get(0)?;
            let file_name: String = r.get(1)?;
            let stored_path: String = r.get(2)?;
            let uploaded_at: String = r.get(3)?;
            Ok(timetable_json(
                &class_level,
                &file_name,
                &stored_path,
                &uploaded_at,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let count = rows.len();
    ok(&req.id, json!({ "timetables": rows, "count": count }))
}

fn handle_timetable_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match workspace_path(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
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
    let class_key = class_level.to_string();

    let stored: Option<String> = match conn
        .query_row(
            "SELECT stored_path FROM timetables WHERE class_level = ?",
            [&class_key],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(stored) = stored else {
        return err(
            &req.id,
            "not_found",
            format!("no timetable for class {class_key}"),
            None,
        );
    };

    if let Err(e) = conn.execute("DELETE FROM timetables WHERE class_level = ?", [&class_key]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = std::fs::remove_file(workspace.join(&stored)) {
        tracing::warn!(path = %stored, error = %e, "timetable file not removed");
    }

    tracing::info!(class = %class_key, "timetable deleted");
    ok(&req.id, json!({ "deleted": true, "classLevel": class_key }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.upload" => Some(handle_timetable_upload(state, req)),
        "timetable.list" => Some(handle_timetable_list(state, req)),
        "timetable.delete" => Some(handle_timetable_delete(state, req)),
        _ => None,
    }
}
