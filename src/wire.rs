//! Parsing of push-channel frames.
//!
//! Two envelope shapes arrive on the channel:
//! - typed: `{"type": "b2c_result" | "b2c_timeout", "data": {...}}`
//! - untyped: an STK callback with its identifiers at the top level.
//!
//! Both are normalized into [`InboundNotification`].

use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::model::{InboundNotification, NotificationKind};

const B2C_RESULT: &str = "b2c_result";
const B2C_TIMEOUT: &str = "b2c_timeout";

/// Identifier keys, most specific first. The PascalCase forms appear when the
/// server forwards a raw gateway body (timeouts do).
const PRIMARY_KEYS: [&str; 4] = [
    "checkout_request_id",
    "conversation_id",
    "CheckoutRequestID",
    "ConversationID",
];
const SECONDARY_KEYS: [&str; 4] = [
    "merchant_request_id",
    "originator_conversation_id",
    "MerchantRequestID",
    "OriginatorConversationID",
];
const RESULT_CODE_KEYS: [&str; 2] = ["result_code", "ResultCode"];

/// Parse one text frame.
pub fn parse_notification(text: &str) -> Result<InboundNotification, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut envelope) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let tag = envelope
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);

    match tag {
        Some(kind) => {
            let data = match envelope.remove("data") {
                Some(data @ Value::Object(_)) => data,
                _ => return Err(ProtocolError::MissingData { kind }),
            };
            let notification_kind = match kind.as_str() {
                B2C_RESULT => NotificationKind::Result,
                B2C_TIMEOUT => NotificationKind::Timeout,
                _ => NotificationKind::Unclassified,
            };
            let result_code = find_result_code(&data);
            if notification_kind == NotificationKind::Result && result_code.is_none() {
                return Err(ProtocolError::MissingResultCode { kind });
            }
            Ok(build(notification_kind, result_code, data))
        }
        None => {
            let payload = Value::Object(envelope);
            let result_code = find_result_code(&payload);
            let kind = if result_code.is_some() {
                NotificationKind::Result
            } else {
                NotificationKind::Unclassified
            };
            Ok(build(kind, result_code, payload))
        }
    }
}

fn build(kind: NotificationKind, result_code: Option<i64>, payload: Value) -> InboundNotification {
    InboundNotification {
        kind,
        primary_id: find_string(&payload, &PRIMARY_KEYS),
        secondary_id: find_string(&payload, &SECONDARY_KEYS),
        result_code,
        payload,
    }
}

/// Objects searched for fields: the payload itself, then a nested gateway
/// `Result` object if any.
fn scopes(payload: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    let top = payload.as_object();
    let nested = top
        .and_then(|obj| obj.get("Result"))
        .and_then(Value::as_object);
    top.into_iter().chain(nested)
}

fn find_string(payload: &Value, keys: &[&str]) -> Option<String> {
    scopes(payload).find_map(|scope| {
        keys.iter().find_map(|key| match scope.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    })
}

fn find_result_code(payload: &Value) -> Option<i64> {
    scopes(payload).find_map(|scope| {
        RESULT_CODE_KEYS
            .iter()
            .find_map(|key| scope.get(*key).and_then(as_integer))
    })
}

/// Integers may arrive as numbers or numeric strings.
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
