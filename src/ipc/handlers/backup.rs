use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Explicit workspacePath lets the desktop shell export or restore a
/// workspace that is not the selected one.
fn workspace_override(state: &AppState, req: &Request) -> Option<PathBuf> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

fn io_failed(id: &str, e: impl std::fmt::Display, path: &str) -> serde_json::Value {
    err(id, "io_failed", e.to_string(), Some(json!({ "path": path })))
}

fn handle_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(workspace_path) = workspace_override(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Fold any WAL pages into the main db file so the bundle carries them.
    if let Some(conn) = &state.db {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    match backup::export_workspace_bundle(&workspace_path, Path::new(&out_path)) {
        Ok(export) => {
            tracing::info!(path = %out_path, entries = export.entry_count, "workspace bundle exported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out_path,
                    "bundleFormat": export.bundle_format,
                    "entryCount": export.entry_count,
                }),
            )
        }
        Err(e) => io_failed(&req.id, e, &out_path),
    }
}

fn handle_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_str(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(workspace_path) = workspace_override(state, req) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let bundle = Path::new(&in_path);
    if !bundle.is_file() {
        let details = json!({ "path": in_path });
        return err(&req.id, "not_found", "bundle file not found", Some(details));
    }
    if let Err(e) = std::fs::create_dir_all(&workspace_path) {
        return io_failed(&req.id, e, &workspace_path.to_string_lossy());
    }

    // The sqlite handle has to be closed before the file under it is swapped.
    state.db = None;

    let import = match backup::import_workspace_bundle(bundle, &workspace_path) {
        Ok(v) => v,
        Err(e) => return io_failed(&req.id, e, &in_path),
    };

    let conn = match db::open_db(&workspace_path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
    };
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);

    tracing::info!(
        workspace = %workspace_path.display(),
        entries = import.entry_count,
        "workspace bundle imported"
    );
    ok(
        &req.id,
        json!({
            "ok": true,
            "workspacePath": workspace_path.to_string_lossy(),
            "bundleFormatDetected": import.bundle_format_detected,
            "entryCount": import.entry_count,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_workspace_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_workspace_bundle(state, req)),
        _ => None,
    }
}
