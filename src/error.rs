//! Error types for submission, inbound parsing and configuration.

use thiserror::Error;

/// Top-level error returned by [`Session::submit`](crate::Session::submit).
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Submission(#[from] SubmissionError),
}

/// Malformed user input, rejected before anything is sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid phone number '{0}': expected 254XXXXXXXXX (12 digits total)")]
    InvalidPhoneNumber(String),
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be alphanumeric")]
    NotAlphanumeric { field: &'static str },
}

/// No response was received from the gateway.
#[derive(Debug, Error)]
#[error("no response from payment gateway: {message}")]
pub struct TransportError {
    pub message: String,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// The gateway answered but refused the request.
#[derive(Debug, Error)]
#[error("payment request rejected: {message}")]
pub struct SubmissionError {
    /// HTTP status, when the rejection came from a non-success response.
    pub status: Option<u16>,
    pub message: String,
}

/// A push-channel frame that could not be turned into a notification.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame is not utf-8 text")]
    NotText,
    #[error("'{kind}' envelope has no object 'data' member")]
    MissingData { kind: String },
    #[error("'{kind}' envelope has no numeric result code")]
    MissingResultCode { kind: String },
}

/// Invalid client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: invalid url '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("{field}: unsupported url scheme '{scheme}', expected {expected}")]
    UnsupportedScheme {
        field: &'static str,
        scheme: String,
        expected: &'static str,
    },
    #[error("merchant key must not be empty")]
    MissingMerchantKey,
}
