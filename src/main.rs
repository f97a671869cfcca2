//! 家庭账本服务主入口

use household_ledger::{
    auth::JwtService,
    config::AppConfig,
    db,
    handlers::health,
    middleware::AppState,
    repository::AuditRepository,
    routes,
    services::{audit_service, AuditService, LegacySyncCoordinator, MovementService},
    telemetry,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("household-ledger {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env.development > .env
    if let Ok(env) = std::env::var("LEDGER_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Household ledger starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 审计写入任务
    let audit_store = Arc::new(AuditRepository::new(db_pool.clone()));
    let (audit, audit_worker) = AuditService::start(audit_store, &config.audit);
    let retention_task =
        audit_service::spawn_retention_task(audit.clone(), config.audit.cleanup_interval_hours);

    // 5. 构建应用状态
    let legacy = LegacySyncCoordinator::from_config(&config.legacy_sync)?;
    let movement_service = MovementService::new(db_pool.clone(), legacy, audit.clone());

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: db_pool.clone(),
        jwt_service: Arc::new(JwtService::from_config(&config.security)?),
        movement_service: Arc::new(movement_service),
        audit_service: Arc::new(audit),
    });

    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. 排空审计队列：释放所有发送端后写入任务自然结束
    if let Some(task) = retention_task {
        task.abort();
        let _ = task.await;
    }
    let drain_timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if tokio::time::timeout(drain_timeout, audit_worker).await.is_err() {
        tracing::warn!("Audit queue drain timed out, remaining entries lost");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}

/// 打印帮助信息
fn print_help() {
    println!("household-ledger {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: household-ledger [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 LEDGER_ 前缀的环境变量完成，例如 LEDGER_DATABASE__URL");
    println!("  可用选项请参考 .env.example");
}
