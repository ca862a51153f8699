use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, workspace_db};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ClassLevel, Form};
use crate::store;
use serde_json::json;

/// Full payload for the printable report-card run of one class: school
/// header, term labels and one card per student, in roster order.
fn handle_report_cards_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match workspace_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let form_text = match required_str(req, "form") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(form) = Form::parse(&form_text) else {
        return err(
            &req.id,
            "bad_params",
            "form must be one of 'Form 1'..'Form 4'",
            None,
        );
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

    let snapshot = match store::load_snapshot(conn, form, class_level, report::REPORT_TERM) {
        Ok(s) => s,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let school = match super::core::school_profile(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };

    let cards = report::build_report_cards(&snapshot);
    let student_count = cards.len();
    let cards = match serde_json::to_value(cards) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "server_error", e.to_string(), None),
    };

    tracing::info!(
        class = %class_level,
        students = student_count,
        term = report::REPORT_TERM.number(),
        "report cards generated"
    );
    ok(
        &req.id,
        json!({
            "school": school,
            "term": report::REPORT_TERM.number(),
            "termLabel": report::REPORT_TERM.as_str(),
            "generatedAt": snapshot.fetched_at,
            "studentCount": student_count,
            "reportCards": cards,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.reportCardsModel" => Some(handle_report_cards_model(state, req)),
        _ => None,
    }
}
