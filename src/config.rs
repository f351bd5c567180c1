//! 网关配置模块
//!
//! 配置加载优先级：环境变量 > 配置文件 > 内置默认值。
//! 配置文件路径候选：`QRIS_NOTIFY_CONFIG` 环境变量 > ./config.toml > ../config.toml

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};

/// 网关应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

/// HTTP/WebSocket 监听配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// 心跳监督配置
///
/// interval 建议 20-30 秒；max_connection_age 是连接年龄上限，
/// 超龄连接会被主动关闭以强制客户端周期性重连。
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_connection_age")]
    pub max_connection_age_secs: u64,
}

/// 清算定时配置
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// 授权通过后到清算完成的固定延迟
    #[serde(default = "default_settlement_delay")]
    pub delay_ms: u64,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_heartbeat_interval() -> u64 {
    25
}

fn default_max_connection_age() -> u64 {
    300
}

fn default_settlement_delay() -> u64 {
    2000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            max_connection_age_secs: default_max_connection_age(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_settlement_delay(),
        }
    }
}

impl GatewayConfig {
    /// 加载配置：尝试候选路径，失败则回退到默认值
    pub fn load() -> Self {
        let candidates = match std::env::var("QRIS_NOTIFY_CONFIG") {
            Ok(path) => vec![path],
            Err(_) => vec!["./config.toml".to_string(), "../config.toml".to_string()],
        };

        for candidate in &candidates {
            if Path::new(candidate).exists() {
                match Self::from_file(candidate) {
                    Ok(config) => {
                        info!(config_path = %candidate, "Configuration loaded");
                        return config.with_env_overrides();
                    }
                    Err(e) => {
                        warn!(config_path = %candidate, error = %e, "Failed to parse config file, trying next candidate");
                    }
                }
            }
        }

        info!("No config file found, using defaults");
        Self::default().with_env_overrides()
    }

    /// 从指定文件解析配置
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// 环境变量覆盖（部署平台通常只注入 PORT）
    fn with_env_overrides(mut self) -> Self {
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secs) = std::env::var("QRIS_NOTIFY_HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.heartbeat.interval_secs = secs;
        }
        if let Some(secs) = std::env::var("QRIS_NOTIFY_MAX_CONNECTION_AGE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.heartbeat.max_connection_age_secs = secs;
        }
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn max_connection_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat.max_connection_age_secs as i64)
    }

    pub fn settlement_delay(&self) -> Duration {
        Duration::from_millis(self.settlement.delay_ms)
    }
}
