//! API key models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Stored API key (the derived key never leaves the repository)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: i32,
    pub user_id: Uuid,
    pub key_id: String,
    pub name: Option<String>,
    pub scoped: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Create API key request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    /// Narrowed permission tags; omitted means the owner's full set
    pub permissions: Option<Vec<String>>,
}

/// Freshly created key; the raw value is returned exactly once
#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    pub key: String,
    #[serde(flatten)]
    pub record: ApiKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}
