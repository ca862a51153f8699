use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Family = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// Handler families in dispatch order; the first one that recognizes
/// the method wins.
const FAMILIES: [Family; 7] = [
    handlers::core::try_handle,
    handlers::students::try_handle,
    handlers::marks::try_handle,
    handlers::reports::try_handle,
    handlers::timetable::try_handle,
    handlers::announcements::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
