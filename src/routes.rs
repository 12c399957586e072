//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{handlers, middleware::AppState};

/// 请求体上限（过滤条件列表足够小）
const MAX_BODY_BYTES: usize = 64 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 需要认证的路由；route_layer 保证中间件在路由匹配后执行，可读取路径参数
    let authenticated_routes = Router::new()
        // 当前主体
        .route("/api/v1/auth/me", get(handlers::auth::get_current_user))
        .route("/api/v1/auth/api-keys", post(handlers::auth::create_api_key))
        .route(
            "/api/v1/auth/api-keys/{key_id}",
            delete(handlers::auth::revoke_api_key),
        )
        // 用户管理（需要权限）
        .route("/api/v1/users", post(handlers::user::create_user))
        .route("/api/v1/users/search", post(handlers::user::list_users))
        .route(
            "/api/v1/users/{id}",
            put(handlers::user::update_user).delete(handlers::user::delete_user),
        )
        .route("/api/v1/users/{id}/roles", put(handlers::user::assign_roles))
        // 角色管理（需要权限）
        .route("/api/v1/roles", get(handlers::role::list_roles))
        .route(
            "/api/v1/roles/{id}/permissions",
            put(handlers::role::replace_role_permissions),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::middleware::auth_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
