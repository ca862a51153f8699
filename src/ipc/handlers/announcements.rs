use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_i64, required_i64, required_str, workspace_db};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{params, Row};
use serde_json::json;
use uuid::Uuid;

const ANNOUNCEMENT_COLUMNS: &str =
    "id, title, content, posted_at, use_countdown, countdown_days, expires_at";

/// Wire names predate this daemon; the noticeboard still reads
/// `timestamp` and `expiryDate`.
fn announcement_row_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let content: String = row.get(2)?;
    let posted_at: String = row.get(3)?;
    let use_countdown: i64 = row.get(4)?;
    let countdown_days: Option<i64> = row.get(5)?;
    let expires_at: Option<String> = row.get(6)?;
    Ok(json!({
        "id": id,
        "title": title,
        "content": content,
        "timestamp": posted_at,
        "useCountdown": use_countdown != 0,
        "countdownDays": countdown_days,
        "expiryDate": expires_at,
    }))
}

struct CountdownFields {
    use_countdown: bool,
    countdown_days: Option<i64>,
    expires_at: Option<String>,
}

/// An announcement either sits on the board indefinitely or counts down
/// from `countdownDays` and expires. The expiry instant is fixed at
/// write time, so editing an announcement restarts its countdown.
fn countdown_fields(req: &Request) -> Result<CountdownFields, serde_json::Value> {
    let use_countdown = req
        .params
        .get("useCountdown")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !use_countdown {
        return Ok(CountdownFields {
            use_countdown: false,
            countdown_days: None,
            expires_at: None,
        });
    }
    let days = required_i64(req, "countdownDays")?;
    if days < 1 {
        return Err(err(
            &req.id,
            "bad_params",
            "countdownDays must be at least 1",
            None,
        ));
    }
    let expires_at = (Utc::now() + Duration::days(days)).to_rfc3339_opts(SecondsFormat::Millis, true);
    Ok(CountdownFields {
        use_countdown: true,
        countdown_days: Some(days),
        expires_at: Some(expires_at),
    })
}

fn announcement_by_id(
    conn: &rusqlite::Connection,
    req: &Request,
    id: &str,
) -> Result<serde_json::Value, serde_json::Value> {
    conn.query_row(
        &format!("SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements WHERE id = ?"),
        [id],
        announcement_row_json,
    )
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_announcements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content = match required_str(req, "content") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let countdown = match countdown_fields(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    let posted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Err(e) = conn.execute(
        "INSERT INTO announcements(id, title, content, posted_at, use_countdown,
                                   countdown_days, expires_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            title,
            content,
            posted_at,
            countdown.use_countdown as i64,
            countdown.countdown_days,
            countdown.expires_at,
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    tracing::info!(id = %id, "announcement posted");
    match announcement_by_id(conn, req, &id) {
        Ok(a) => ok(&req.id, json!({ "announcement": a })),
        Err(resp) => resp,
    }
}

fn handle_announcements_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content = match required_str(req, "content") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let countdown = match countdown_fields(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let posted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let updated = match conn.execute(
        "UPDATE announcements
         SET title = ?, content = ?, posted_at = ?, use_countdown = ?,
             countdown_days = ?, expires_at = ?
         WHERE id = ?",
        params![
            title,
            content,
            posted_at,
            countdown.use_countdown as i64,
            countdown.countdown_days,
            countdown.expires_at,
            id,
        ],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(
            &req.id,
            "not_found",
            format!("no announcement with id {id}"),
            None,
        );
    }

    match announcement_by_id(conn, req, &id) {
        Ok(a) => ok(&req.id, json!({ "announcement": a })),
        Err(resp) => resp,
    }
}

fn handle_announcements_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let deleted = match conn.execute("DELETE FROM announcements WHERE id = ?", [&id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(
            &req.id,
            "not_found",
            format!("no announcement with id {id}"),
            None,
        );
    }
    ok(&req.id, json!({ "deleted": true, "id": id }))
}

fn handle_announcements_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(&format!(
        "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements ORDER BY posted_at"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([], announcement_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let count = rows.len();
    ok(&req.id, json!({ "announcements": rows, "count": count }))
}

fn handle_announcements_recent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let limit = optional_i64(req, "limit").unwrap_or(5);
    if limit < 1 {
        return err(&req.id, "bad_params", "limit must be at least 1", None);
    }
    let mut stmt = match conn.prepare(&format!(
        "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements ORDER BY posted_at DESC LIMIT ?"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([limit], announcement_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let count = rows.len();
    ok(&req.id, json!({ "announcements": rows, "count": count }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.create" => Some(handle_announcements_create(state, req)),
        "announcements.update" => Some(handle_announcements_update(state, req)),
        "announcements.delete" => Some(handle_announcements_delete(state, req)),
        "announcements.list" => Some(handle_announcements_list(state, req)),
        "announcements.recent" => Some(handle_announcements_recent(state, req)),
        _ => None,
    }
}
