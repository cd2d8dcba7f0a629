//! Client configuration.

use std::time::Duration;

use rand::Rng;
use url::Url;

use crate::error::ConfigError;

/// Endpoints and credentials for one payment session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the gateway API, e.g. `http://127.0.0.1:8000/api/v1`.
    pub gateway_url: String,
    /// WebSocket endpoint delivering payment notifications.
    pub notification_url: String,
    /// Sent as the merchant key header on every submission.
    pub merchant_key: String,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    pub const DEFAULT_GATEWAY_URL: &'static str = "http://127.0.0.1:8000/api/v1";
    pub const DEFAULT_NOTIFICATION_URL: &'static str = "ws://127.0.0.1:8000/ws/payments";

    pub fn new(
        gateway_url: impl Into<String>,
        notification_url: impl Into<String>,
        merchant_key: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            notification_url: notification_url.into(),
            merchant_key: merchant_key.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Check URLs and schemes before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("gateway_url", &self.gateway_url, &["http", "https"], "http or https")?;
        check_url("notification_url", &self.notification_url, &["ws", "wss"], "ws or wss")?;
        if self.merchant_key.trim().is_empty() {
            return Err(ConfigError::MissingMerchantKey);
        }
        Ok(())
    }
}

fn check_url(
    field: &'static str,
    value: &str,
    schemes: &[&str],
    expected: &'static str,
) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            field,
            scheme: url.scheme().to_string(),
            expected,
        });
    }
    Ok(())
}

/// Delay between push-channel reconnect attempts. Attempts never stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`, plus up to 25% random jitter.
    Exponential { base: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                let backoff = base.saturating_mul(1 << exponent).min(max);
                let jitter_cap = backoff.as_millis() as u64 / 4;
                let jitter = if jitter_cap == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=jitter_cap)
                };
                backoff + Duration::from_millis(jitter)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(Self::DEFAULT_DELAY)
    }
}
