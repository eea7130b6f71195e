//! Correlation-key derivation for application messages.
//!
//! The device reuses `response`, `event` and `request` inconsistently across
//! message families, so the key is computed per message here and nowhere else.

use serde_json::Value;

/// Error payload sub-event
pub const ERROR_EVENT: &str = "error";

/// Correlation key of an application payload.
///
/// Preference: `response`, then `event`, then `request`. An `event` of
/// `"error"` names the failure, not the request, so for error payloads the
/// originating request (`request_event`, then `request`) is used instead.
pub fn correlation_key(payload: &Value) -> Option<String> {
    let field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };

    if let Some(response) = field("response") {
        return Some(response.to_string());
    }
    match field("event") {
        Some(ERROR_EVENT) => field("request_event")
            .or_else(|| field("request"))
            .map(str::to_string),
        Some(event) => Some(event.to_string()),
        None => field("request").map(str::to_string),
    }
}

/// Device-reported failure extracted from a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    /// Device error code
    pub code: String,
    /// Device error message
    pub message: String,
}

/// Extract a device failure, if the payload signals one.
///
/// A payload fails when its `status` is `error` or `fail`, its `event` is
/// `error`, or it arrived on the generic error envelope event.
pub fn device_error(payload: &Value, envelope_event: Option<&str>) -> Option<DeviceFailure> {
    let status = payload.get("status").and_then(Value::as_str);
    let event = payload.get("event").and_then(Value::as_str);

    let failed = matches!(status, Some("error" | "fail"))
        || event == Some(ERROR_EVENT)
        || envelope_event == Some(crate::protocol::EVENT_ERROR);
    if !failed {
        return None;
    }

    let text = |names: &[&str]| {
        names.iter().find_map(|name| match payload.get(*name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    Some(DeviceFailure {
        code: text(&["error_code", "code"]).unwrap_or_else(|| "unknown".to_string()),
        message: text(&["error_message", "message", "msg"]).unwrap_or_default(),
    })
}
