//! Outbound payment submission.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{SubmissionError, SubmitError, TransportError};
use crate::form::{PaymentBody, PaymentForm};
use crate::model::{CorrelationIds, RequestKind};

pub const TIMESTAMP_HEADER: &str = "X-Request-Timestamp";
pub const MERCHANT_KEY_HEADER: &str = "X-Merchant-Key";
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// The gateway's acceptance of a payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub kind: RequestKind,
    pub ids: CorrelationIds,
    pub response_code: Option<String>,
    pub description: String,
    /// Message meant for the payer (STK push only).
    pub customer_message: Option<String>,
}

/// Anything able to submit a payment and return its correlation identifiers.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit(&self, form: &PaymentForm) -> Result<Acknowledgment, SubmitError>;
}

/// [`PaymentGateway`] over HTTP.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    merchant_key: String,
}

#[derive(Debug, Deserialize)]
struct StkPushAck {
    merchant_request_id: Option<String>,
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisbursementAck {
    conversation_id: Option<String>,
    originator_conversation_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &Config) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            merchant_key: config.merchant_key.clone(),
        }
    }

    fn url(&self, kind: RequestKind) -> String {
        format!("{}/{}", self.base_url, kind.endpoint())
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn submit(&self, form: &PaymentForm) -> Result<Acknowledgment, SubmitError> {
        let kind = form.kind();
        let token = Uuid::new_v4().to_string();
        let body = form.body(&token)?;

        let request = self
            .client
            .post(self.url(kind))
            .header(
                TIMESTAMP_HEADER,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .header(MERCHANT_KEY_HEADER, &self.merchant_key)
            .header(CORRELATION_HEADER, &token);
        let request = match &body {
            PaymentBody::StkPush(body) => request.json(body),
            PaymentBody::Disbursement(body) => request.json(body),
        };

        info!(%kind, correlation = %token, "submitting payment request");
        let response = request.send().await.map_err(TransportError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(TransportError::from)?;

        if !status.is_success() {
            let message = rejection_message(status.as_u16(), &text);
            warn!(%kind, status = status.as_u16(), reason = %message, "payment request rejected");
            return Err(SubmissionError {
                status: Some(status.as_u16()),
                message,
            }
            .into());
        }

        let ack = parse_acknowledgment(kind, &text)?;
        info!(
            %kind,
            primary = %ack.ids.primary,
            secondary = ?ack.ids.secondary,
            "payment request accepted"
        );
        Ok(ack)
    }
}

/// Turn a successful response body into an [`Acknowledgment`].
pub fn parse_acknowledgment(
    kind: RequestKind,
    body: &str,
) -> Result<Acknowledgment, SubmissionError> {
    let invalid = |reason: String| SubmissionError {
        status: None,
        message: format!("invalid acknowledgment: {reason}"),
    };

    match kind {
        RequestKind::StkPush => {
            let ack: StkPushAck = serde_json::from_str(body).map_err(|e| invalid(e.to_string()))?;
            let ids = CorrelationIds::new(
                ack.checkout_request_id.unwrap_or_default(),
                ack.merchant_request_id,
            )
            .ok_or_else(|| invalid("missing checkout_request_id".into()))?;
            Ok(Acknowledgment {
                kind,
                ids,
                response_code: ack.response_code,
                description: ack.response_description.unwrap_or_default(),
                customer_message: ack.customer_message,
            })
        }
        RequestKind::B2cDisbursement => {
            let ack: DisbursementAck =
                serde_json::from_str(body).map_err(|e| invalid(e.to_string()))?;
            let ids = CorrelationIds::new(
                ack.conversation_id.unwrap_or_default(),
                ack.originator_conversation_id,
            )
            .ok_or_else(|| invalid("missing conversation_id".into()))?;
            Ok(Acknowledgment {
                kind,
                ids,
                response_code: ack.response_code,
                description: ack.response_description.unwrap_or_default(),
                customer_message: None,
            })
        }
    }
}

/// Extract the most useful message from an error response: the `detail`
/// field, then the raw body, then a generic message.
pub fn rejection_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = detail_message(&value) {
            return message;
        }
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    format!("payment request failed with status {status}")
}

fn detail_message(value: &Value) -> Option<String> {
    match value.get("detail")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(detail) => ["error_message", "error"]
            .iter()
            .find_map(|key| detail.get(*key).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        // validation errors come back as a list of {msg, ...}
        Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}
