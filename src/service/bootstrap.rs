//! 应用启动器 - 负责依赖注入和服务启动

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::domain::registry::ConnectionRegistry;
use crate::domain::service::{EventNotifier, HeartbeatSupervisor, TransactionStore};
use crate::interface::{AppState, router};

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();

        let config = GatewayConfig::load();

        info!("🚀 启动 QRIS 实时交易通知网关");
        info!("");
        info!("📋 服务说明：");
        info!("   - WebSocket 接入：商户看板与收银终端长连接");
        info!("   - 授权回调：银行/Switch 交易事件实时扇出");
        info!("   - 心跳监督：应用层探测 + 连接年龄上限驱逐");
        info!("");

        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = Arc::new(EventNotifier::new(Arc::clone(&registry)));
        let store = TransactionStore::new(notifier, config.settlement_delay());

        let supervisor = HeartbeatSupervisor::new(
            Arc::clone(&registry),
            config.heartbeat_interval(),
            config.max_connection_age(),
        );
        let supervisor_handle = supervisor.spawn();

        let state = AppState {
            registry,
            store,
            started_at: Instant::now(),
        };
        let app = router(state);

        let bind_addr = format!("{}:{}", config.server.address, config.server.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        info!("✅ 通知网关已启动");
        info!("   WebSocket: ws://{}/ws", bind_addr);
        info!("   Callback:  http://{}/api/switch/callback", bind_addr);
        info!(
            "   Heartbeat: every {}s, max connection age {}s",
            config.heartbeat.interval_secs, config.heartbeat.max_connection_age_secs
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        supervisor_handle.abort();
        info!("✅ 服务器已停止");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("正在停止服务器...");
}
