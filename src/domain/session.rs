//! 连接会话实体
//!
//! 职责：管理单条长连接的身份与活跃状态
//!
//! 业务规则：
//! 1. merchant_id 是必填身份，接入时校验，缺失的连接不会产生 Session
//! 2. device_id 的有无决定连接类别（终端设备 / 商户看板），类别一经确定不可变
//! 3. 每条物理连接都是一个新 Session，连接关闭即终结，不存在复用

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;

/// 连接类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionClass {
    /// 商户监控看板
    Dashboard,
    /// 收银终端设备（打印机/EDC）
    Device,
}

impl ConnectionClass {
    /// 连接 ID 前缀
    fn id_prefix(self) -> &'static str {
        match self {
            ConnectionClass::Dashboard => "dash",
            ConnectionClass::Device => "dev",
        }
    }

    /// 指标标签用
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionClass::Dashboard => "dashboard",
            ConnectionClass::Device => "device",
        }
    }
}

/// 一条在线双向连接的会话状态
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: String,
    pub merchant_id: String,
    pub device_id: Option<String>,
    pub class: ConnectionClass,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// 创建新会话，按 device_id 的有无确定连接类别
    pub fn new(merchant_id: String, device_id: Option<String>) -> Self {
        let class = if device_id.is_some() {
            ConnectionClass::Device
        } else {
            ConnectionClass::Dashboard
        };
        let now = Utc::now();

        Self {
            connection_id: generate_connection_id(class, now),
            merchant_id,
            device_id,
            class,
            connected_at: now,
            last_activity_at: now,
        }
    }

    /// 收到该连接的任何入站消息时刷新活跃时间
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// 连接年龄是否超过上限（心跳监督用）
    pub fn exceeds_max_age(&self, max_age: Duration) -> bool {
        Utc::now().signed_duration_since(self.connected_at) > max_age
    }
}

/// 生成连接 ID：类别前缀 + 毫秒时间戳 + 随机后缀
fn generate_connection_id(class: ConnectionClass, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "{}-{}-{}",
        class.id_prefix(),
        now.timestamp_millis(),
        suffix.to_lowercase()
    )
}
