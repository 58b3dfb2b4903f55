use std::sync::Arc;
use std::time::Duration;

use venue_server::orders::LoggingRefundGateway;
use venue_server::{Config, ServerState, init_logger_with_file};

/// 后台任务优雅退出的等待上限
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// 后台任务健康检查周期
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境变量 (.env 可选)
    dotenv::dotenv().ok();

    // 2. 加载配置 + 日志
    let config = Config::from_env();
    init_logger_with_file(Some(&config.log_level), config.log_dir.as_deref());

    tracing::info!(
        environment = %config.environment,
        work_dir = %config.work_dir,
        push_port = config.push_tcp_port,
        "Venue server starting..."
    );

    // 3. 初始化服务器状态
    let state = ServerState::initialize(&config)?;

    // 4. 启动后台任务 (清扫、退款、推送)
    let tasks = state.start_background_tasks(Arc::new(LoggingRefundGateway));

    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    health.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = health.tick() => {
                tasks.check_health();
            }
        }
    }

    tracing::info!("Shutdown signal received");
    tasks.shutdown(SHUTDOWN_TIMEOUT).await;
    tracing::info!("Venue server stopped");
    Ok(())
}
