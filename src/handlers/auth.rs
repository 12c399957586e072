//! 认证相关的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{
        api_key::CreateApiKeyRequest,
        user::PrincipalResponse,
    },
    repository::ApiKeyRepository,
    services::PermissionService,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

const CREATE_API_KEYS: &str = "create:user_api_keys";
const DELETE_API_KEYS: &str = "delete:user_api_keys";

/// 获取当前主体
pub async fn get_current_user(auth: AuthContext) -> Json<PrincipalResponse> {
    Json(PrincipalResponse::from((*auth.principal).clone()))
}

/// 为当前用户创建 API Key
///
/// 限定范围必须是当前凭证可用权限的子集。
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, CREATE_API_KEYS).await?;

    let scope =
        PermissionService::delegable_scope(&mut tx, &auth.principal, req.permissions.as_deref())
            .await?;

    let created = ApiKeyRepository::new(&mut tx)
        .create(auth.principal.user.id, req.name.as_deref(), scope.as_deref())
        .await?;
    tx.commit().await.map_err(AppError::transaction)?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// 吊销当前用户的 API Key
pub async fn revoke_api_key(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.db.begin().await.map_err(AppError::transaction)?;
    PermissionService::require_permission(&mut tx, &auth.principal, DELETE_API_KEYS).await?;

    if !ApiKeyRepository::new(&mut tx)
        .revoke(auth.principal.user.id, &key_id)
        .await?
    {
        return Err(AppError::ResourceNotFound(format!("api key {}", key_id)));
    }
    tx.commit().await.map_err(AppError::transaction)?;

    tracing::info!(user_id = %auth.principal.user.id, key_id = %key_id, "API key revoked");

    Ok(StatusCode::NO_CONTENT)
}
