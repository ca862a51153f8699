mod backup;
mod db;
mod ipc;
mod report;
mod store;

use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries the protocol; diagnostics go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "shuled ready");

    let mut state = ipc::AppState::default();
    let stdin = io::stdin();
    let mut out = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => serde_json::json!({
                "id": serde_json::Value::Null,
                "ok": false,
                "error": { "code": "bad_request", "message": format!("invalid JSON: {}", e) }
            }),
        };
        let _ = writeln!(out, "{}", reply);
        let _ = out.flush();
    }
}
