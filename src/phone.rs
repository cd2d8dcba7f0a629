use std::fmt;

use serde::Serialize;

use crate::error::ValidationError;

/// A phone number in canonical international form: `254` followed by nine digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    const COUNTRY_CODE: &'static str = "254";
    const SUBSCRIBER_DIGITS: usize = 9;

    /// Normalize and validate user input.
    ///
    /// Separators are dropped, a leading `+` is stripped, a leading `0` is
    /// replaced by the country code and a bare subscriber number gets the
    /// country code prepended.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let cleaned: String = input
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

        let normalized = if let Some(rest) = cleaned.strip_prefix('0') {
            format!("{}{rest}", Self::COUNTRY_CODE)
        } else if cleaned.starts_with(Self::COUNTRY_CODE) {
            cleaned.to_string()
        } else {
            format!("{}{cleaned}", Self::COUNTRY_CODE)
        };

        let subscriber = &normalized[Self::COUNTRY_CODE.len()..];
        if subscriber.len() != Self::SUBSCRIBER_DIGITS
            || !subscriber.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ValidationError::InvalidPhoneNumber(input.to_string()));
        }

        Ok(PhoneNumber(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
