//! Core domain types for payment correlation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// The two payment flows supported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Payment prompt pushed to the payer's phone.
    StkPush,
    /// Business-to-customer payout.
    B2cDisbursement,
}

impl RequestKind {
    /// Gateway path (relative to the configured gateway URL) for this flow.
    pub fn endpoint(self) -> &'static str {
        match self {
            RequestKind::StkPush => "stk-push/initiate",
            RequestKind::B2cDisbursement => "b2c/payment",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::StkPush => f.write_str("stk_push"),
            RequestKind::B2cDisbursement => f.write_str("b2c_disbursement"),
        }
    }
}

/// Lifecycle of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Sent to the gateway, no acknowledgment yet.
    #[default]
    Pending,
    /// Acknowledged; waiting for a notification.
    Awaiting,
    /// A terminal outcome has been produced.
    Settled,
}

/// Gateway-assigned identifiers used to attribute notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationIds {
    pub primary: String,
    pub secondary: Option<String>,
}

impl CorrelationIds {
    /// Build from gateway fields. Empty strings count as absent; `None` is
    /// returned when no primary id is available.
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Option<Self> {
        let primary = primary.into();
        if primary.is_empty() {
            return None;
        }
        Some(Self {
            primary,
            secondary: secondary.filter(|s| !s.is_empty()),
        })
    }
}

/// A payment request the client is (or was) waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub kind: RequestKind,
    pub ids: CorrelationIds,
    pub submitted_at: DateTime<Utc>,
    pub status: RequestStatus,
}

impl PaymentRequest {
    /// Create a request in the `Awaiting` state.
    pub fn awaiting(kind: RequestKind, ids: CorrelationIds) -> Self {
        Self {
            kind,
            ids,
            submitted_at: Utc::now(),
            status: RequestStatus::Awaiting,
        }
    }

    pub fn primary_id(&self) -> &str {
        &self.ids.primary
    }

    pub fn secondary_id(&self) -> Option<&str> {
        self.ids.secondary.as_deref()
    }

    /// Inclusive-or correlation: either identifier matching is enough.
    pub fn matches(&self, notification: &InboundNotification) -> bool {
        let primary = notification.primary_id.as_deref() == Some(self.primary_id());
        let secondary = match (notification.secondary_id.as_deref(), self.secondary_id()) {
            (Some(theirs), Some(ours)) => theirs == ours,
            _ => false,
        };
        primary || secondary
    }
}

/// Classification of an inbound push message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Result,
    Timeout,
    Unclassified,
}

/// A parsed push-channel message, normalized from either envelope shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundNotification {
    pub kind: NotificationKind,
    pub primary_id: Option<String>,
    pub secondary_id: Option<String>,
    /// Present for every `Result` notification.
    pub result_code: Option<i64>,
    /// The notification body (the `data` member of a typed envelope).
    pub payload: Value,
}

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}
