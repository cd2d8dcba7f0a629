//! Mapping of notifications to terminal outcomes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::model::{InboundNotification, NotificationKind, PaymentRequest};

/// Result code reported for a completed payment.
pub const SUCCESS_CODE: i64 = 0;
/// Result code for an insufficient working-account balance.
pub const INSUFFICIENT_BALANCE_CODE: i64 = 1;
/// Result code for wrong initiator name or security credential.
pub const INVALID_INITIATOR_CODE: i64 = 2001;

const GENERIC_FAILURE: &str = "The payment could not be completed.";

/// Coarse classification of an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Success,
    Failure,
    Timeout,
}

/// Terminal result of a tracked request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Success(Receipt),
    Failure(Failure),
    /// The gateway gave up waiting; carries the raw notification body.
    Timeout { payload: Value },
}

impl Outcome {
    pub fn result(&self) -> OutcomeResult {
        match self {
            Outcome::Success(_) => OutcomeResult::Success,
            Outcome::Failure(_) => OutcomeResult::Failure,
            Outcome::Timeout { .. } => OutcomeResult::Timeout,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Outcome::Success(_) => Some(SUCCESS_CODE),
            Outcome::Failure(failure) => Some(failure.code),
            Outcome::Timeout { .. } => None,
        }
    }
}

/// Details of a completed payment. Every field is optional because the
/// gateway only reports what applies to the flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Receipt {
    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    pub receipt: Option<String>,
    pub recipient_name: Option<String>,
    pub completed_at: Option<String>,
    pub phone_number: Option<String>,
    pub working_account_balance: Option<f64>,
    pub utility_account_balance: Option<f64>,
    pub charges_paid_balance: Option<f64>,
    /// Every key/value pair reported by the gateway.
    pub parameters: BTreeMap<String, Value>,
}

/// A rejected or failed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub code: i64,
    pub description: String,
    /// Remediation for well-known codes.
    pub hint: Option<&'static str>,
}

/// Decide the outcome of `notification` for the tracked request, if any.
///
/// `None` means the notification must be ignored: nothing tracked, no id
/// match, or a message kind that does not settle a request.
pub fn classify(
    tracked: Option<&PaymentRequest>,
    notification: &InboundNotification,
) -> Option<Outcome> {
    let request = tracked?;
    if !request.matches(notification) {
        return None;
    }

    match notification.kind {
        NotificationKind::Timeout => Some(Outcome::Timeout {
            payload: notification.payload.clone(),
        }),
        NotificationKind::Result => {
            let code = notification.result_code?;
            if code == SUCCESS_CODE {
                Some(Outcome::Success(Receipt::from_payload(&notification.payload)))
            } else {
                Some(Outcome::Failure(Failure::new(code, &notification.payload)))
            }
        }
        NotificationKind::Unclassified => {
            debug!(
                primary = %request.primary_id(),
                "matching notification has no outcome, ignored"
            );
            None
        }
    }
}

/// Remediation text for result codes that have a known fix.
pub fn hint_for(code: i64) -> Option<&'static str> {
    match code {
        INSUFFICIENT_BALANCE_CODE => Some(
            "Insufficient balance in the payout account. Top up the working account and retry.",
        ),
        INVALID_INITIATOR_CODE => Some(
            "Invalid initiator credentials. Check the initiator name and security credential.",
        ),
        _ => None,
    }
}

impl Failure {
    fn new(code: i64, payload: &Value) -> Self {
        let description = lookup(payload, &["result_desc", "ResultDesc"])
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(GENERIC_FAILURE)
            .to_string();
        Self {
            code,
            description,
            hint: hint_for(code),
        }
    }
}

impl Receipt {
    /// Collect the gateway's key/value list into a receipt.
    ///
    /// B2C results carry `result_parameters.ResultParameter: [{Key, Value}]`;
    /// STK callbacks carry `callback_metadata.Item: [{Name, Value}]`.
    pub fn from_payload(payload: &Value) -> Self {
        let params = parameters(payload);

        let receipt = text(&params, &["TransactionReceipt", "MpesaReceiptNumber"]);
        let transaction_id = lookup(payload, &["transaction_id", "TransactionID"])
            .and_then(as_text)
            .or_else(|| receipt.clone());

        Receipt {
            transaction_id,
            amount: number(&params, &["TransactionAmount", "Amount"]),
            receipt,
            recipient_name: text(&params, &["ReceiverPartyPublicName"]),
            completed_at: text(&params, &["TransactionCompletedDateTime", "TransactionDate"]),
            phone_number: text(&params, &["PhoneNumber"]),
            working_account_balance: number(&params, &["B2CWorkingAccountAvailableFunds"]),
            utility_account_balance: number(&params, &["B2CUtilityAccountAvailableFunds"]),
            charges_paid_balance: number(&params, &["B2CChargesPaidAccountAvailableFunds"]),
            parameters: params,
        }
    }
}

fn parameters(payload: &Value) -> BTreeMap<String, Value> {
    let lists = [
        (
            lookup(payload, &["result_parameters", "ResultParameters"])
                .and_then(|p| p.get("ResultParameter")),
            "Key",
        ),
        (
            lookup(payload, &["callback_metadata", "CallbackMetadata"]).and_then(|m| m.get("Item")),
            "Name",
        ),
    ];

    let mut out = BTreeMap::new();
    for (list, key_field) in lists {
        let Some(items) = list.and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            if let Some(key) = item.get(key_field).and_then(Value::as_str) {
                out.insert(
                    key.to_string(),
                    item.get("Value").cloned().unwrap_or(Value::Null),
                );
            }
        }
    }
    out
}

/// First present key, at the top level or inside a nested gateway `Result`.
fn lookup<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let nested = payload.get("Result");
    [Some(payload), nested]
        .into_iter()
        .flatten()
        .find_map(|scope| keys.iter().find_map(|key| scope.get(*key)))
        .filter(|value| !value.is_null())
}

fn text(params: &BTreeMap<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| params.get(*key).and_then(as_text))
}

fn number(params: &BTreeMap<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| params.get(*key).and_then(as_number))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
