//! 统一错误模型
//! 定义认证、授权与过滤编译的错误分类以及错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    // ===== 凭证解析 =====
    /// Every descriptor of a lookup chain came back empty.
    #[error("No credential found in: {0}")]
    MissingSource(String),

    #[error("Malformed credential in {0}")]
    InvalidFormat(String),

    // ===== 令牌校验 =====
    #[error("Invalid signing algorithm")]
    InvalidSigningAlgorithm,

    #[error("Token is missing the exp claim")]
    MissingExpiryClaim,

    #[error("Credential has expired")]
    ExpiredCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    // ===== 主体加载与授权 =====
    /// No local principal matches the validated identity.
    #[error("Principal not found")]
    NotFound,

    #[error("Identity already exists")]
    DuplicateIdentity,

    #[error("Permission denied")]
    PermissionDenied,

    /// Boundary form of every credential failure.
    #[error("Authentication failed")]
    Unauthorized,

    // ===== 过滤编译 =====
    #[error("Operation [{operator}] needs {required} in the [values] field, got {given}")]
    InvalidFilterArity {
        operator: String,
        required: String,
        given: usize,
    },

    #[error("Unknown filter operation [{0}]")]
    UnknownOperator(String),

    #[error("Field [{0}] cannot be filtered on")]
    InvalidFilterField(String),

    #[error("Field [{field}] {reason}")]
    InvalidFilterValue { field: String, reason: String },

    // ===== 基础设施 =====
    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingSource(_)
            | AppError::InvalidFormat(_)
            | AppError::InvalidSigningAlgorithm
            | AppError::MissingExpiryClaim
            | AppError::ExpiredCredential
            | AppError::InvalidCredential(_)
            | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound | AppError::PermissionDenied => StatusCode::FORBIDDEN,
            AppError::DuplicateIdentity => StatusCode::CONFLICT,
            AppError::InvalidFilterArity { .. }
            | AppError::UnknownOperator(_)
            | AppError::InvalidFilterField(_)
            | AppError::InvalidFilterValue { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            AppError::TransactionFailure(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    ///
    /// 凭证类错误统一为同一条消息，避免泄露具体失败的检查项；
    /// 过滤错误由客户端修正，原样返回。
    pub fn user_message(&self) -> String {
        match self {
            AppError::MissingSource(_)
            | AppError::InvalidFormat(_)
            | AppError::InvalidSigningAlgorithm
            | AppError::MissingExpiryClaim
            | AppError::ExpiredCredential
            | AppError::InvalidCredential(_)
            | AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::NotFound | AppError::PermissionDenied => "Access denied".to_string(),
            AppError::DuplicateIdentity => "Identity already exists".to_string(),
            AppError::InvalidFilterArity { .. }
            | AppError::UnknownOperator(_)
            | AppError::InvalidFilterField(_)
            | AppError::InvalidFilterValue { .. } => self.to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::ResourceNotFound(what) => format!("Resource not found: {}", what),
            AppError::TransactionFailure(_) | AppError::Database(_) => {
                "Database error occurred".to_string()
            }
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 日志与指标使用的内部条件标签
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::MissingSource(_) => "missing_source",
            AppError::InvalidFormat(_) => "invalid_format",
            AppError::InvalidSigningAlgorithm => "invalid_signing_algorithm",
            AppError::MissingExpiryClaim => "missing_expiry_claim",
            AppError::ExpiredCredential => "expired_credential",
            AppError::InvalidCredential(_) => "invalid_credential",
            AppError::NotFound => "not_found",
            AppError::DuplicateIdentity => "duplicate_identity",
            AppError::PermissionDenied => "permission_denied",
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidFilterArity { .. } => "invalid_filter_arity",
            AppError::UnknownOperator(_) => "unknown_operator",
            AppError::InvalidFilterField(_) => "invalid_filter_field",
            AppError::InvalidFilterValue { .. } => "invalid_filter_value",
            AppError::TransactionFailure(_) => "transaction_failure",
            AppError::Database(_) => "database",
            AppError::Config(_) => "config",
            AppError::BadRequest(_) => "bad_request",
            AppError::ResourceNotFound(_) => "resource_not_found",
            AppError::Internal(_) => "internal",
        }
    }

    /// 是否属于凭证解析或令牌校验失败
    pub fn is_credential_error(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }

    /// 事务边界上的 sqlx 错误
    pub fn transaction(e: sqlx::Error) -> Self {
        AppError::TransactionFailure(e.to_string())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 记录错误日志
        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                reason = self.reason(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::debug!(
                code = self.code(),
                reason = self.reason(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 请求体校验失败
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::BadRequest(e.to_string())
    }
}
