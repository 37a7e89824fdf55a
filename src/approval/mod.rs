pub mod executor;
pub mod gate;

pub use executor::{CategoryExecutor, ExecutionOutcome, ExecutorRegistry, FailurePolicy};
pub use gate::{ApprovalDirs, ApprovalGate, QueueReport};

use crate::shared::errors::StoreError;
use crate::store::{Entity, RecordFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_EXPIRATION_HOURS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalCategory {
    Email,
    Payment,
    SocialPost,
    FileOperation,
    Custom,
}

impl ApprovalCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Payment => "payment",
            Self::SocialPost => "social_post",
            Self::FileOperation => "file_operation",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "payment" => Ok(Self::Payment),
            "social_post" => Ok(Self::SocialPost),
            "file_operation" => Ok(Self::FileOperation),
            "custom" => Ok(Self::Custom),
            _ => Err(
                "category must be one of: email, payment, social_post, file_operation, custom"
                    .to_string(),
            ),
        }
    }

    /// Payload keys that must be present and non-empty.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Email => &["to"],
            Self::Payment => &["amount"],
            Self::SocialPost => &["content"],
            Self::FileOperation => &["path"],
            Self::Custom => &[],
        }
    }

    /// Outbound senders quarantine failed requests so nothing is sent twice;
    /// local actions stay approved and are retried on the next pass.
    pub fn default_failure_policy(self) -> FailurePolicy {
        match self {
            Self::Email | Self::Payment | Self::SocialPost => FailurePolicy::Quarantine,
            Self::FileOperation | Self::Custom => FailurePolicy::LeaveApproved,
        }
    }
}

impl std::fmt::Display for ApprovalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Executed => "executed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub category: ApprovalCategory,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ApprovalRequest {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl Entity for ApprovalRequest {
    const FORMAT: RecordFormat = RecordFormat::Markdown;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn markdown_body(&self) -> String {
        let mut body = format!(
            "# Approval required: {}\n\n{}\n\nMove this file to `approved/` to approve or `rejected/` to reject.\nExpires {}.\n",
            self.category,
            if self.summary.is_empty() {
                "(no summary)"
            } else {
                self.summary.as_str()
            },
            self.expires_at.to_rfc3339()
        );
        if let Some(error) = &self.last_error {
            body.push_str(&format!("\nLast execution error: {error}\n"));
        }
        body
    }
}

/// Checks `payload` against the category's required-field table.
pub fn validate_payload(
    category: ApprovalCategory,
    payload: &Map<String, Value>,
) -> Result<(), ApprovalError> {
    for field in category.required_fields() {
        let present = match payload.get(*field) {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ApprovalError::InvalidPayload {
                category,
                field: (*field).to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("{category} approval payload is missing required field `{field}`")]
    InvalidPayload {
        category: ApprovalCategory,
        field: String,
    },
    #[error("approval request `{id}` not found")]
    NotFound { id: String },
    #[error("approval request `{id}` expired at {expires_at}")]
    Expired {
        id: String,
        expires_at: DateTime<Utc>,
    },
    #[error("expiration must be at least one hour, got {0}")]
    InvalidExpiration(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}
