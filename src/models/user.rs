//! User domain models

use crate::models::role::RoleRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,

    // Display fields
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nick_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,

    pub status: String, // active, disabled

    // Metadata
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Identity asserted by an external provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub email: String,
    pub provider: String,
    pub external_user_id: String,
}

/// Identity plus display fields, as handed over after a provider login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalProfile {
    pub email: String,
    pub provider: String,
    pub external_user_id: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nick_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

impl ExternalProfile {
    pub fn identity(&self) -> ExternalIdentity {
        ExternalIdentity {
            email: self.email.clone(),
            provider: self.provider.clone(),
            external_user_id: self.external_user_id.clone(),
        }
    }
}

impl From<ExternalIdentity> for ExternalProfile {
    fn from(identity: ExternalIdentity) -> Self {
        Self {
            email: identity.email,
            provider: identity.provider,
            external_user_id: identity.external_user_id,
            ..Default::default()
        }
    }
}

/// OAuth profile row linking a user to a provider identity
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: i32,
    pub user_id: Uuid,
    pub email: String,
    pub provider: String,
    pub external_user_id: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrowed permission set carried by an API key
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyScope {
    pub api_key_id: i32,
    pub key_id: String,
    /// `None` means the key carries the user's full permission set
    pub permissions: Option<BTreeSet<String>>,
}

/// Authenticated user attached to a request
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub user: User,
    pub roles: Vec<RoleRef>,
    /// Denormalized permission cache as read when the principal was loaded
    pub permissions: BTreeSet<String>,
    pub api_key: Option<ApiKeyScope>,
}

impl Principal {
    /// Exact tag match against the cache, narrowed by the API key scope
    pub fn has_permission(&self, tag: &str) -> bool {
        self.permissions.contains(tag) && self.key_allows(tag)
    }

    pub fn key_allows(&self, tag: &str) -> bool {
        match self.api_key.as_ref().and_then(|k| k.permissions.as_ref()) {
            Some(scope) => scope.contains(tag),
            None => true,
        }
    }

    pub fn has_role(&self, role_id: i32) -> bool {
        self.roles.iter().any(|r| r.id == role_id)
    }

    /// Permissions actually usable through this credential
    pub fn effective_permissions(&self) -> BTreeSet<String> {
        self.permissions
            .iter()
            .filter(|tag| self.has_permission(tag))
            .cloned()
            .collect()
    }
}

/// Create user request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 255))]
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<i32>,
}

/// Replace a user's roles
#[derive(Debug, Deserialize)]
pub struct AssignRolesRequest {
    pub role_ids: Vec<i32>,
}

/// Update user request; absent fields are left unchanged
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 255))]
    pub first_name: Option<String>,
    #[validate(length(max = 255))]
    pub last_name: Option<String>,
    #[validate(length(max = 255))]
    pub nick_name: Option<String>,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    #[validate(length(max = 1024))]
    pub description: Option<String>,
    #[validate(url, length(max = 1024))]
    pub avatar_url: Option<String>,
    #[validate(custom(function = "validate_status"))]
    pub status: Option<String>,
}

fn validate_status(status: &str) -> Result<(), validator::ValidationError> {
    match status {
        "active" | "disabled" => Ok(()),
        _ => Err(validator::ValidationError::new("status")),
    }
}

/// List users request
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersRequest {
    #[serde(default)]
    pub filters: Vec<crate::models::filter::FilterExpression>,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
    #[serde(alias = "order_by")]
    pub order_by: Option<String>,
    #[serde(default, alias = "sort_direction")]
    pub sort_direction: crate::models::filter::SortDirection,
}

/// User response
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nick_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            first_name: user.first_name,
            last_name: user.last_name,
            nick_name: user.nick_name,
            avatar_url: user.avatar_url,
            status: user.status,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Principal as returned by `/auth/me`
#[derive(Debug, Serialize)]
pub struct PrincipalResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
}

impl From<Principal> for PrincipalResponse {
    fn from(principal: Principal) -> Self {
        let permissions = principal.effective_permissions().into_iter().collect();
        Self {
            roles: principal.roles.iter().map(|r| r.name.clone()).collect(),
            permissions,
            api_key_id: principal.api_key.map(|k| k.key_id),
            user: UserResponse::from(principal.user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(perms: &[&str], scope: Option<&[&str]>) -> Principal {
        let now = Utc::now();
        Principal {
            user: User {
                id: Uuid::new_v4(),
                email: "test@test.com".to_string(),
                name: None,
                first_name: None,
                last_name: None,
                nick_name: None,
                location: None,
                description: None,
                avatar_url: None,
                status: "active".to_string(),
                created_by: None,
                updated_by: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            roles: vec![RoleRef {
                id: 2,
                name: "user".to_string(),
            }],
            permissions: perms.iter().map(|s| s.to_string()).collect(),
            api_key: scope.map(|s| ApiKeyScope {
                api_key_id: 1,
                key_id: "ak_test".to_string(),
                permissions: Some(s.iter().map(|t| t.to_string()).collect()),
            }),
        }
    }

    #[test]
    fn test_has_permission_exact_match() {
        let p = principal(&["read:users"], None);
        assert!(p.has_permission("read:users"));
        assert!(!p.has_permission("delete:users"));
        assert!(!p.has_permission("read:*"));
        assert!(!p.has_permission("read"));
    }

    #[test]
    fn test_api_key_scope_narrows() {
        let p = principal(&["read:users", "list:users"], Some(&["list:users", "delete:users"]));
        assert!(p.has_permission("list:users"));
        assert!(!p.has_permission("read:users"));
        // 范围内但用户本身没有的权限不能被放大
        assert!(!p.has_permission("delete:users"));
        assert_eq!(
            p.effective_permissions().into_iter().collect::<Vec<_>>(),
            vec!["list:users".to_string()]
        );
    }

    #[test]
    fn test_has_role() {
        let p = principal(&[], None);
        assert!(p.has_role(2));
        assert!(!p.has_role(1));
    }
}
