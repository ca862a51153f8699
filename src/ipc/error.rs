use serde_json::{json, Value};

/// Success envelope. Every reply carries the request id back so the
/// shell can match it to the call.
pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

/// Failure envelope; `details` rides along only when the handler has
/// structured context to offer.
pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message.into() });
    if let Some(details) = details {
        error["details"] = details;
    }
    json!({ "id": id, "ok": false, "error": error })
}
