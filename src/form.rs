//! User-facing payment input and its validation.

use std::fmt;

use serde::Serialize;

use crate::RequestKind;
use crate::error::ValidationError;
use crate::phone::PhoneNumber;

/// B2C transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CommandId {
    /// Supports registered and unregistered customers.
    SalaryPayment,
    /// Normal payment, registered customers only.
    #[default]
    BusinessPayment,
    /// Payment with a congratulatory message, registered customers only.
    PromotionPayment,
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::SalaryPayment => "SalaryPayment",
            CommandId::BusinessPayment => "BusinessPayment",
            CommandId::PromotionPayment => "PromotionPayment",
        };
        f.write_str(name)
    }
}

/// Raw payment input as entered by the user.
#[derive(Debug, Clone)]
pub enum PaymentForm {
    /// Charge the payer through an on-phone prompt.
    StkPush {
        phone_number: String,
        amount: u64,
        account_reference: String,
        transaction_desc: String,
    },
    /// Send money from the business to a customer.
    Disbursement {
        phone_number: String,
        amount: u64,
        command: CommandId,
        remarks: String,
        occasion: Option<String>,
    },
}

/// Wire body of `POST stk-push/initiate`.
#[derive(Debug, Serialize)]
pub struct StkPushBody<'a> {
    pub phone_number: PhoneNumber,
    pub amount: u64,
    pub account_reference: &'a str,
    pub transaction_desc: &'a str,
}

/// Wire body of `POST b2c/payment`.
#[derive(Debug, Serialize)]
pub struct DisbursementBody<'a> {
    pub phone_number: PhoneNumber,
    pub amount: u64,
    pub command_id: CommandId,
    pub remarks: &'a str,
    pub occasion: &'a str,
    pub originator_conversation_id: &'a str,
}

/// A validated form, ready to serialize.
#[derive(Debug)]
pub enum PaymentBody<'a> {
    StkPush(StkPushBody<'a>),
    Disbursement(DisbursementBody<'a>),
}

impl PaymentForm {
    pub const DEFAULT_REMARKS: &'static str = "Payment";

    const ACCOUNT_REFERENCE_MAX: usize = 12;
    const TRANSACTION_DESC_MAX: usize = 13;
    const REMARKS_MAX: usize = 100;
    const OCCASION_MAX: usize = 100;

    pub fn kind(&self) -> RequestKind {
        match self {
            PaymentForm::StkPush { .. } => RequestKind::StkPush,
            PaymentForm::Disbursement { .. } => RequestKind::B2cDisbursement,
        }
    }

    /// Check every field without building a body.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.body("").map(|_| ())
    }

    /// Validate the form and build the wire body, attaching the
    /// client-generated correlation token where the flow carries one.
    pub fn body<'a>(
        &'a self,
        correlation_token: &'a str,
    ) -> Result<PaymentBody<'a>, ValidationError> {
        match self {
            PaymentForm::StkPush {
                phone_number,
                amount,
                account_reference,
                transaction_desc,
            } => {
                let phone_number = PhoneNumber::parse(phone_number)?;
                check_amount(*amount)?;
                check_required("account_reference", account_reference)?;
                check_length("account_reference", account_reference, Self::ACCOUNT_REFERENCE_MAX)?;
                if !account_reference.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(ValidationError::NotAlphanumeric {
                        field: "account_reference",
                    });
                }
                check_required("transaction_desc", transaction_desc)?;
                check_length("transaction_desc", transaction_desc, Self::TRANSACTION_DESC_MAX)?;

                Ok(PaymentBody::StkPush(StkPushBody {
                    phone_number,
                    amount: *amount,
                    account_reference,
                    transaction_desc,
                }))
            }
            PaymentForm::Disbursement {
                phone_number,
                amount,
                command,
                remarks,
                occasion,
            } => {
                let phone_number = PhoneNumber::parse(phone_number)?;
                check_amount(*amount)?;
                check_length("remarks", remarks, Self::REMARKS_MAX)?;
                let occasion = occasion.as_deref().unwrap_or_default();
                check_length("occasion", occasion, Self::OCCASION_MAX)?;

                let remarks = if remarks.trim().is_empty() {
                    Self::DEFAULT_REMARKS
                } else {
                    remarks.as_str()
                };

                Ok(PaymentBody::Disbursement(DisbursementBody {
                    phone_number,
                    amount: *amount,
                    command_id: *command,
                    remarks,
                    occasion,
                    originator_conversation_id: correlation_token,
                }))
            }
        }
    }
}

fn check_amount(amount: u64) -> Result<(), ValidationError> {
    if amount == 0 {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}

fn check_required(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
