//! 日志与追踪系统
//! 初始化结构化日志并登记指标说明

use crate::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪系统
///
/// RUST_LOG 优先于配置中的日志级别。重复初始化（例如测试中）会被忽略。
pub fn init_telemetry(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let log_layer = match config.format.to_lowercase().as_str() {
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(false)
            .boxed(),
        // JSON 格式（生产环境）
        _ => tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(true)
            .boxed(),
    };

    let initialized = tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            level = %config.level,
            format = %config.format,
            "Telemetry initialized"
        );
    }
}

/// 登记指标说明
///
/// metrics 0.24 在首次使用时创建指标，这里只补充描述与单位。
pub fn init_metrics() {
    metrics::describe_counter!("http_requests_total", "HTTP requests by method and status");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    metrics::describe_counter!(
        "auth_failures_total",
        "Rejected credentials by internal reason"
    );
    metrics::describe_counter!("authz_denied_total", "Denied permission checks");
    metrics::describe_gauge!("db.pool.size", "Database pool connections");
    metrics::describe_gauge!("db.pool.idle", "Idle database pool connections");

    tracing::debug!("Metrics initialized");
}
