//! 认证中间件
//!
//! 解析凭证 → 校验令牌或 API Key → 加载主体，并把主体挂到请求扩展上。
//! 具体失败原因只进入日志与指标，对外统一为未认证响应。

use crate::{
    auth::resolver::{Credential, HttpRequestView, RequestView},
    error::AppError,
    middleware::AppState,
    models::user::Principal,
};
use axum::{
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Arc<Principal>,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 认证中间件 - 必须认证
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();

    // 仅在路由匹配之后才有路径参数
    let params = RawPathParams::from_request_parts(&mut parts, &()).await.ok();

    let outcome = {
        let mut view = HttpRequestView::from_parts(&parts);
        if let Some(params) = &params {
            view = view.with_params(params.iter());
        }
        authenticate(&state, &view).await
    };

    let principal = outcome.map_err(reject)?;

    tracing::debug!(
        user_id = %principal.user.id,
        api_key = principal.api_key.as_ref().map(|k| k.key_id.as_str()),
        "Request authenticated"
    );

    parts.extensions.insert(AuthContext {
        principal: Arc::new(principal),
    });

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// 凭证解析与主体加载
pub async fn authenticate<R>(state: &AppState, req: &R) -> Result<Principal, AppError>
where
    R: RequestView + Sync,
{
    match state.resolver.resolve(req)? {
        Credential::ApiKey(key) => state.principals.load_by_api_key(&key).await,
        Credential::Bearer(token) => {
            let claims = state.jwt_service.validate_token(&token)?;
            let identity = claims.identity()?;

            if state.config.rbac.auto_provision {
                state.principals.load_or_create(&identity.into()).await
            } else {
                state.principals.load_by_identity(&identity).await
            }
        }
    }
}

/// 将内部失败原因折叠为对外错误
fn reject(e: AppError) -> AppError {
    if e.is_credential_error() {
        metrics::counter!("auth_failures_total", "reason" => e.reason()).increment(1);
        tracing::info!(reason = e.reason(), detail = %e, "Authentication failed");
        return AppError::Unauthorized;
    }

    if matches!(e, AppError::NotFound) {
        metrics::counter!("auth_failures_total", "reason" => e.reason()).increment(1);
        tracing::info!(reason = e.reason(), "No local principal for identity");
    }

    e
}
