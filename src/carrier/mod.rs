//! SMS carrier seam: the client trait, its error type, and error classification.

pub mod twilio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use twilio::TwilioClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierReceipt {
    pub sid: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CarrierError {
    pub message: String,
    pub code: Option<i64>,
    pub status: Option<u16>,
    pub more_info: Option<String>,
}

impl CarrierError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
            more_info: None,
        }
    }
}

#[async_trait]
pub trait CarrierClient: Send + Sync {
    async fn send(&self, body: &str, from: &str, to: &str) -> Result<CarrierReceipt, CarrierError>;
}

/// Keyword rule: if the carrier error text contains any of `needles`
/// (case-insensitive) the failure is reported as `category`.
#[derive(Debug, Clone, Copy)]
pub struct ErrorRule {
    pub needles: &'static [&'static str],
    pub category: &'static str,
}

pub const DEFAULT_ERROR_RULES: &[ErrorRule] = &[
    ErrorRule {
        needles: &["authenticate"],
        category: "Carrier authentication failed. Check: 1) Correct credentials, 2) Account status, 3) International messaging enabled.",
    },
    ErrorRule {
        needles: &["permission"],
        category: "Carrier account permissions issue. Verify your account status and messaging capabilities.",
    },
    ErrorRule {
        needles: &["phone number", "number"],
        category: "Invalid phone number format. Ensure international format (+country code).",
    },
    ErrorRule {
        needles: &["geo"],
        category: "Geographic permission denied. Enable international messaging for the destination country.",
    },
];

pub fn classify_carrier_error(text: &str) -> String {
    classify_with(DEFAULT_ERROR_RULES, text)
}

/// Unmatched errors pass through verbatim.
pub fn classify_with(rules: &[ErrorRule], text: &str) -> String {
    let lower = text.to_lowercase();
    rules
        .iter()
        .find(|rule| rule.needles.iter().any(|n| lower.contains(n)))
        .map(|rule| rule.category.to_string())
        .unwrap_or_else(|| text.to_string())
}
