//! 角色管理的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext, error::AppError, middleware::AppState, models::role::*,
    repository::RoleRepository, services::PermissionService,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

const LIST_ROLES: &str = "list:roles";
const UPDATE_ROLES: &str = "update:roles";

/// 列出所有角色
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, LIST_ROLES).await?;

    let roles = RoleRepository::new(&mut tx).list().await?;
    tx.commit().await.map_err(AppError::transaction)?;

    Ok(Json(json!({
        "roles": roles,
        "count": roles.len()
    })))
}

/// 替换角色权限，成员的权限缓存在同一事务内重算
pub async fn replace_role_permissions(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(req): Json<ReplaceRolePermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, UPDATE_ROLES).await?;

    let affected =
        PermissionService::replace_role_permissions_in(&mut tx, id, &req.permissions).await?;
    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(
        role_id = id,
        updated_by = %auth.principal.user.id,
        permissions = ?req.permissions,
        affected_users = affected,
        "Role permissions replaced"
    );

    Ok(Json(json!({
        "role_id": id,
        "permissions": req.permissions,
        "affected_users": affected
    })))
}
