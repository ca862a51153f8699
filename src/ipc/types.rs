use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line from the shell: `{"id", "method", "params"}`.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Process-wide daemon state: the selected workspace and its open
/// database. Blob directories hang off the workspace path.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
