use super::error::err;
use super::types::{AppState, Request};
use rusqlite::Connection;
use std::path::PathBuf;

fn no_workspace(req: &Request) -> serde_json::Value {
    err(&req.id, "no_workspace", "select a workspace first", None)
}

fn missing(req: &Request, key: &str) -> serde_json::Value {
    err(&req.id, "bad_params", format!("missing {}", key), None)
}

pub fn workspace_db<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    match &state.db {
        Some(conn) => Ok(conn),
        None => Err(no_workspace(req)),
    }
}

pub fn workspace_path(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    match &state.workspace {
        Some(path) => Ok(path.clone()),
        None => Err(no_workspace(req)),
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    optional_str(req, key).ok_or_else(|| missing(req, key))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| missing(req, key))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    optional_i64(req, key).ok_or_else(|| missing(req, key))
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}
