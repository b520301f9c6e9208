//! 主应用程序入口
//!
//! 加载配置、连接外部依赖、组装实时服务并启动 Axum Web 服务。

use std::sync::Arc;

use application::{RealtimeOptions, RealtimeServices, SystemClock, TypingSweeper};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );

    let infrastructure = Infrastructure::connect(&config).await?;

    let clock = Arc::new(SystemClock);
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let services = RealtimeServices::build(
        infrastructure.store.clone(),
        jwt_service.clone(),
        infrastructure.publisher.clone(),
        clock.clone(),
        RealtimeOptions {
            typing_ttl: config.realtime.typing_ttl(),
            outbound_queue_capacity: config.realtime.outbound_queue_capacity,
            store_timeout: config.realtime.store_timeout(),
        },
    );

    let sweeper = TypingSweeper::start(
        services.typing.clone(),
        clock,
        config.realtime.sweep_interval(),
    );

    let gateway = services.gateway.clone();
    let app = router(AppState::new(services.gateway, jwt_service));
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("实时协调服务启动在 http://{}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    sweeper.shutdown().await;
    tracing::info!("服务已停止");
    Ok(())
}

/// 收到 Ctrl+C 后先取消全部连接，让 WebSocket 任务走完断开流程，
/// HTTP 服务随后排空。
async fn shutdown_signal(gateway: application::Gateway) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        return;
    }
    tracing::info!("收到关闭信号");
    gateway.shutdown();
}
