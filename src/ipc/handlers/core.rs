use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, workspace_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

const SCHOOL_PROFILE_KEY: &str = "school.profile";

fn default_school_profile() -> serde_json::Value {
    json!({
        "name": "St. Anthony High School",
        "address": "P.O. Box 123, City, Country",
        "phone": "+123 456 7890",
        "email": "info@exampleschool.com"
    })
}

/// Stored profile with defaults filled in for anything never configured.
pub fn school_profile(conn: &Connection) -> anyhow::Result<serde_json::Value> {
    let mut profile = default_school_profile();
    if let Some(stored) = db::settings_get_json(conn, SCHOOL_PROFILE_KEY)? {
        if let Some(map) = stored.as_object() {
            for (key, value) in map {
                profile[key] = value.clone();
            }
        }
    }
    Ok(profile)
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = state
        .workspace
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());
    ok(
        &req.id,
        json!({ "version": env!("CARGO_PKG_VERSION"), "workspacePath": workspace }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(p) => PathBuf::from(p),
        Err(resp) => return resp,
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    tracing::info!(workspace = %path.display(), "workspace selected");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

fn handle_profile_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match school_profile(conn) {
        Ok(profile) => ok(&req.id, json!({ "school": profile })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_profile_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut profile = match school_profile(conn) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut touched = false;
    for key in ["name", "address", "phone", "email"] {
        if let Some(value) = optional_str(req, key) {
            profile[key] = json!(value);
            touched = true;
        }
    }
    if !touched {
        return err(&req.id, "bad_params", "no profile fields given", None);
    }

    if let Err(e) = db::settings_set_json(conn, SCHOOL_PROFILE_KEY, &profile) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "school": profile }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "school.profileGet" => Some(handle_profile_get(state, req)),
        "school.profileUpdate" => Some(handle_profile_update(state, req)),
        _ => None,
    }
}
