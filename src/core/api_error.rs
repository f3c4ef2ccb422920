//! Numeric error codes of the gateway API, plus the JSON error shape sent
//! back to transports.

use serde_json::{Value, json};

pub const ERROR_UNAUTHORIZED: i32 = 403;
pub const ERROR_UNKNOWN_REQUEST: i32 = 453;
pub const ERROR_TRANSPORT_SPECIFIC: i32 = 450;
pub const ERROR_MISSING_REQUEST: i32 = 452;
pub const ERROR_SESSION_NOT_FOUND: i32 = 458;
pub const ERROR_HANDLE_NOT_FOUND: i32 = 459;
pub const ERROR_PLUGIN_NOT_FOUND: i32 = 460;
pub const ERROR_PLUGIN_ATTACH: i32 = 461;
pub const ERROR_PLUGIN_MESSAGE: i32 = 462;
pub const ERROR_PLUGIN_DETACH: i32 = 463;
pub const ERROR_JSEP_UNKNOWN_TYPE: i32 = 464;
pub const ERROR_JSEP_INVALID_SDP: i32 = 465;
pub const ERROR_TRICKLE_INVALID_CANDIDATE: i32 = 466;
pub const ERROR_INVALID_JSON: i32 = 454;
pub const ERROR_INVALID_ELEMENT_TYPE: i32 = 455;
pub const ERROR_MISSING_MANDATORY_ELEMENT: i32 = 456;
pub const ERROR_TOKEN_NOT_FOUND: i32 = 413;
pub const ERROR_SESSION_CONFLICT: i32 = 468;
pub const ERROR_UNEXPECTED_ANSWER: i32 = 469;
pub const ERROR_UNKNOWN: i32 = 490;

/// Build the standard error envelope.
pub fn error_response(session_id: Option<u64>, transaction: Option<&str>, code: i32, reason: impl Into<String>) -> Value {
    let mut out = json!({
        "janus": "error",
        "error": {
            "code": code,
            "reason": reason.into(),
        }
    });
    if let Some(id) = session_id {
        out["session_id"] = json!(id);
    }
    if let Some(t) = transaction {
        out["transaction"] = json!(t);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let e = error_response(Some(7), Some("tx1"), ERROR_SESSION_NOT_FOUND, "no such session");
        assert_eq!(e["janus"], "error");
        assert_eq!(e["session_id"], 7);
        assert_eq!(e["transaction"], "tx1");
        assert_eq!(e["error"]["code"], 458);
    }
}
