//! 用户管理的 HTTP 处理器
//!
//! 每个操作在同一个事务中先做权限检查，再访问数据。

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    filter::{FieldKind, FilterCompiler},
    middleware::AppState,
    models::user::*,
    repository::UserRepository,
    services::PermissionService,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

const LIST_USERS: &str = "list:users";
const CREATE_USERS: &str = "create:users";
const UPDATE_USERS: &str = "update:users";
const ASSIGN_USERS: &str = "assign:users";
const DELETE_USERS: &str = "delete:users";

const DEFAULT_LIMIT: i64 = 50;

/// 可过滤、可排序的用户字段
pub static USER_FILTERS: Lazy<FilterCompiler> = Lazy::new(|| {
    FilterCompiler::new()
        .allow_kind("id", FieldKind::Uuid)
        .allow("email")
        .allow("name")
        .allow("first_name")
        .allow("last_name")
        .allow("nick_name")
        .allow("location")
        .allow("status")
        .allow_kind("created_at", FieldKind::Timestamp)
        .allow_kind("updated_at", FieldKind::Timestamp)
});

/// 按过滤条件列出用户
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<ListUsersRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, LIST_USERS).await?;

    let condition = USER_FILTERS.compile(&req.filters)?;
    let order = USER_FILTERS.order_by(
        req.order_by.as_deref().unwrap_or("created_at"),
        req.sort_direction,
    )?;
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = req.offset.unwrap_or(0);

    let (users, total) = UserRepository::new(&mut tx)
        .list(&condition, &order, limit, offset)
        .await?;
    tx.commit().await.map_err(AppError::transaction)?;

    let users: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();

    Ok(Json(json!({
        "users": users,
        "total": total,
        "limit": limit,
        "offset": offset
    })))
}

/// 创建用户并分配角色
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, CREATE_USERS).await?;
    PermissionService::lock_writes(&mut tx).await?;

    let user = UserRepository::new(&mut tx)
        .create(&req, Some(auth.principal.user.id))
        .await?;
    let permissions = PermissionService::assign_roles_in(&mut tx, user.id, &req.role_ids).await?;

    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(
        user_id = %user.id,
        created_by = %auth.principal.user.id,
        roles = ?req.role_ids,
        "User created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": UserResponse::from(user),
            "permissions": permissions
        })),
    ))
}

/// 更新用户资料
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, UPDATE_USERS).await?;

    let user = UserRepository::new(&mut tx)
        .update(id, &req, auth.principal.user.id)
        .await?
        .ok_or_else(|| AppError::ResourceNotFound(format!("user {}", id)))?;
    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(user_id = %id, updated_by = %auth.principal.user.id, "User updated");

    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

/// 替换用户角色，权限缓存在同一事务内重算
pub async fn assign_roles(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRolesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, ASSIGN_USERS).await?;

    let permissions = PermissionService::assign_roles_in(&mut tx, id, &req.role_ids).await?;
    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(
        user_id = %id,
        assigned_by = %auth.principal.user.id,
        roles = ?req.role_ids,
        "User roles replaced"
    );

    Ok(Json(json!({
        "user_id": id,
        "role_ids": req.role_ids,
        "permissions": permissions
    })))
}

/// 软删除用户
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, DELETE_USERS).await?;

    // 不允许删除自己
    if id == auth.principal.user.id {
        return Err(AppError::BadRequest("Cannot delete your own account".to_string()));
    }

    if !UserRepository::new(&mut tx)
        .soft_delete(id, auth.principal.user.id)
        .await?
    {
        return Err(AppError::ResourceNotFound(format!("user {}", id)));
    }
    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(user_id = %id, deleted_by = %auth.principal.user.id, "User deleted");

    Ok(StatusCode::NO_CONTENT)
}
