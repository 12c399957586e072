//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use crate::auth::lookup::LookupChain;
use config::{Config, ConfigError, Environment};
use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// JWT 密钥（使用 Secret 包装，防止日志泄露）
    pub jwt_secret: Secret<String>,
    /// JWT 签名算法，仅支持 HMAC 系列: HS256, HS384, HS512
    pub jwt_algorithm: String,
    /// Authorization 头中的认证方案
    pub token_scheme: String,
    /// 令牌查找链，例如 "query:token,cookie:jwt,header:Authorization"
    pub token_lookup: String,
    /// API Key 查找链，例如 "query:api_key,cookie:api_key,header:X-API-Key"
    pub api_key_lookup: String,
}

impl SecurityConfig {
    /// 解析后的签名算法
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        let algorithm = Algorithm::from_str(&self.jwt_algorithm).map_err(|_| {
            ConfigError::Message(format!("Unknown JWT algorithm: {}", self.jwt_algorithm))
        })?;

        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => Err(ConfigError::Message(format!(
                "JWT algorithm {:?} needs key material other than a shared secret",
                other
            ))),
        }
    }

    pub fn token_chain(&self) -> Result<LookupChain, ConfigError> {
        LookupChain::from_str(&self.token_lookup)
            .map_err(|e| ConfigError::Message(format!("security.token_lookup: {}", e)))
    }

    pub fn api_key_chain(&self) -> Result<LookupChain, ConfigError> {
        LookupChain::from_str(&self.api_key_lookup)
            .map_err(|e| ConfigError::Message(format!("security.api_key_lookup: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RbacConfig {
    /// 权限动作词汇表
    pub actions: Vec<String>,
    /// 实体词汇表（会被规范化为 snake_case 表名）
    pub entities: Vec<String>,
    /// 首次登录创建用户时分配的角色
    pub default_role: String,
    /// 启动时执行权限与角色初始化
    pub seed_on_start: bool,
    /// 有效令牌对应的身份不存在时自动创建用户
    pub auto_provision: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub rbac: RbacConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_secret", "change-this-secret-in-production-min-32-chars!")?
            .set_default("security.jwt_algorithm", "HS256")?
            .set_default("security.token_scheme", "Bearer")?
            .set_default("security.token_lookup", "query:token,cookie:jwt,header:Authorization")?
            .set_default(
                "security.api_key_lookup",
                "query:api_key,cookie:api_key,header:X-API-Key",
            )?
            .set_default("rbac.actions", crate::rbac::taxonomy::default_actions())?
            .set_default("rbac.entities", crate::rbac::taxonomy::default_entities())?
            .set_default("rbac.default_role", "user")?
            .set_default("rbac.seed_on_start", true)?
            .set_default("rbac.auto_provision", false)?;

        // 从环境变量加载配置（前缀为 GATEKEEPER_）
        settings = settings.add_source(
            Environment::with_prefix("GATEKEEPER")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("rbac.actions")
                .with_list_parse_key("rbac.entities")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证 JWT 密钥长度（至少 32 字符）
        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        self.security.algorithm()?;

        if self.security.token_scheme.trim().is_empty() || self.security.token_scheme.contains(' ')
        {
            return Err(ConfigError::Message(
                "token_scheme must be a single non-empty word".to_string(),
            ));
        }

        // 验证查找链
        self.security.token_chain()?;
        self.security.api_key_chain()?;

        // 验证权限词汇表
        if self.rbac.actions.is_empty() || self.rbac.entities.is_empty() {
            return Err(ConfigError::Message(
                "rbac.actions and rbac.entities must not be empty".to_string(),
            ));
        }

        if self.rbac.default_role.trim().is_empty() {
            return Err(ConfigError::Message("rbac.default_role must not be empty".to_string()));
        }

        Ok(())
    }
}
