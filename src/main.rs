//! 认证授权网关主入口

use gql_gatekeeper::{
    config::AppConfig, db, handlers::health, middleware::AppState, rbac, routes, telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("gql-gatekeeper {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 生产环境应该直接设置环境变量
    if let Ok(env) = std::env::var("GATEKEEPER_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config.logging);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gql-gatekeeper starting...");

    // 3. 数据库连接池 + 迁移 + 权限初始化
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    if config.rbac.seed_on_start {
        let applied = rbac::seed_rbac(&db_pool, &config.rbac).await?;
        tracing::info!(applied, "RBAC bootstrap checked");
    }

    // 4. 构建应用状态与路由
    let app_state = Arc::new(AppState::new(config.clone(), db_pool)?);
    let app = routes::create_router(app_state);

    // 5. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 6. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 收到信号后开始排空连接，超时仍未结束则强制退出。
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

/// 打印帮助信息
fn print_help() {
    println!("gql-gatekeeper {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: gql-gatekeeper [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --version     Print version and exit");
    println!("  --help        Print this help and exit");
    println!();
    println!("Environment:");
    println!("  All settings come from GATEKEEPER_* variables, e.g.");
    println!("  GATEKEEPER_DATABASE__URL, GATEKEEPER_SECURITY__JWT_SECRET,");
    println!("  GATEKEEPER_SECURITY__TOKEN_LOOKUP, GATEKEEPER_RBAC__ENTITIES");
}
