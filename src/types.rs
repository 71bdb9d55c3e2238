use crate::db::MessageRecord;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One send target. Only `phone` is required; the rest feed placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub website: Option<String>,
}

impl Recipient {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        let value = match key {
            "name" => self.name.as_deref(),
            "firstName" => self.first_name.as_deref(),
            "lastName" => self.last_name.as_deref(),
            "company" => self.company.as_deref(),
            "email" => self.email.as_deref(),
            "website" => self.website.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }

    /// Name shown in failure reports: `name`, else "first last".
    pub fn display_name(&self) -> String {
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!(
                "{} {}",
                self.first_name.as_deref().unwrap_or_default(),
                self.last_name.as_deref().unwrap_or_default()
            )
            .trim()
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub phone: String,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Sent(MessageRecord),
    Failed(FailedMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub total_requested: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub latest_messages: Vec<MessageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_messages: Option<Vec<FailedMessage>>,
}

impl DispatchReport {
    pub fn from_outcomes(outcomes: Vec<DispatchOutcome>, group_name: Option<String>) -> Self {
        let total_requested = outcomes.len();
        let mut latest_messages = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                DispatchOutcome::Sent(record) => latest_messages.push(record),
                DispatchOutcome::Failed(failure) => failed.push(failure),
            }
        }
        let success_count = latest_messages.len();

        let mut message = if success_count == total_requested {
            format!("All {success_count} messages sent successfully")
        } else {
            format!("{success_count} out of {total_requested} messages sent successfully")
        };
        if let Some(name) = group_name.as_deref() {
            message.push_str(&format!(" to group \"{name}\""));
        }

        Self {
            message,
            group_name,
            total_requested,
            success_count,
            failed_count: failed.len(),
            latest_messages,
            failed_messages: if failed.is_empty() { None } else { Some(failed) },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub message: Option<String>,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToGroupRequest {
    pub message: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageType {
    #[default]
    Personal,
    Business,
}

impl UsageType {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageType::Personal => "Personal",
            UsageType::Business => "Business",
        }
    }
}

impl FromStr for UsageType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Personal" => Ok(UsageType::Personal),
            "Business" => Ok(UsageType::Business),
            other => Err(AppError::validation(format!("unknown usage type: {other}"))),
        }
    }
}

/// Account holder details collected at registration. Only the fields of the
/// chosen usage type are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_reg_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_reg_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regions_of_operation: Vec<String>,
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl UserProfile {
    /// Checks the fields required by `usage` and drops those of the other type.
    pub fn for_usage(self, usage: UsageType) -> Result<Self, AppError> {
        match usage {
            UsageType::Personal => {
                if !(present(&self.first_name) && present(&self.last_name) && present(&self.personal_phone)) {
                    return Err(AppError::validation(
                        "For personal use, first name, last name, and phone number are required",
                    ));
                }
                Ok(Self {
                    first_name: self.first_name,
                    last_name: self.last_name,
                    personal_phone: self.personal_phone,
                    personal_address: self.personal_address,
                    personal_city: self.personal_city,
                    personal_state: self.personal_state,
                    personal_postal_code: self.personal_postal_code,
                    personal_country: self.personal_country,
                    ..Self::default()
                })
            }
            UsageType::Business => {
                if !(present(&self.business_name) && present(&self.business_type) && present(&self.industry)) {
                    return Err(AppError::validation(
                        "For business use, business name, business type, and industry are required",
                    ));
                }
                Ok(Self {
                    first_name: None,
                    last_name: None,
                    personal_phone: None,
                    personal_address: None,
                    personal_city: None,
                    personal_state: None,
                    personal_postal_code: None,
                    personal_country: None,
                    ..self
                })
            }
        }
    }
}
