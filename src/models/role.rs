//! Role and permission domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Permission
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub id: i32,
    pub tag: String,
    pub description: Option<String>,
}

/// Role id and name, as attached to a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoleRef {
    pub id: i32,
    pub name: String,
}

/// Role → parent edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct RoleParentEdge {
    pub role_id: i32,
    pub parent_role_id: i32,
}

/// Role → permission tag grant
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoleGrant {
    pub role_id: i32,
    pub tag: String,
}

/// Replace a role's permission grants
#[derive(Debug, Deserialize)]
pub struct ReplaceRolePermissionsRequest {
    pub permissions: Vec<String>,
}
