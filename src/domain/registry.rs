//! 连接注册表
//!
//! 职责：
//! - 以 connection_id 为主键管理全部在线会话
//! - 维护商户 → 设备的二级索引（仅设备类连接），与主表 lockstep 增删
//! - 对外只暴露操作，不暴露底层 map
//!
//! 并发纪律：主表与二级索引放在同一把 RwLock 内，任何增删在一次
//! 写锁内完成，迭代返回克隆快照（copy-on-iterate）。快照取出后
//! 会话可能已经消失，此时投递按失败处理而不是崩溃。

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::metrics;

use super::message::ServerMessage;
use super::session::{ConnectionClass, Session};

/// 会话出站通道
///
/// 连接任务独占底层 socket；注册表和各组件只持有该无界发送端。
/// 发送永不阻塞，接收端消失（连接任务退出）即视为通道关闭。
#[derive(Debug, Clone)]
pub struct SessionChannel {
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl SessionChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    fn send(&self, message: ServerMessage) -> std::result::Result<(), ()> {
        self.sender.send(message).map_err(|_| ())
    }
}

/// 注册表中的一条会话记录：身份状态 + 出站通道
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session: Session,
    pub channel: SessionChannel,
}

impl SessionHandle {
    /// 投递一条消息；通道已关闭时返回投递失败
    pub fn deliver(&self, message: ServerMessage) -> Result<()> {
        self.channel
            .send(message)
            .map_err(|_| GatewayError::ChannelClosed(self.session.connection_id.clone()))
    }
}

#[derive(Default)]
struct RegistryInner {
    /// connection_id → 会话
    sessions: HashMap<String, SessionHandle>,
    /// merchant_id → (device_id → connection_id)，仅设备类会话
    device_index: HashMap<String, HashMap<String, String>>,
}

/// 在线连接注册表
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话。每条通过身份校验的连接恰好调用一次。
    pub async fn insert(&self, handle: SessionHandle) {
        let mut inner = self.inner.write().await;
        if handle.session.class == ConnectionClass::Device {
            if let Some(device_id) = &handle.session.device_id {
                inner
                    .device_index
                    .entry(handle.session.merchant_id.clone())
                    .or_default()
                    .insert(device_id.clone(), handle.session.connection_id.clone());
            }
        }
        let connection_id = handle.session.connection_id.clone();
        inner.sessions.insert(connection_id.clone(), handle);
        metrics::connections().active.set(inner.sessions.len() as i64);
        debug!(%connection_id, total = inner.sessions.len(), "Session registered");
    }

    /// 移除会话（幂等：移除不存在的 id 是空操作）
    ///
    /// 设备索引与主表在同一次写锁内 lockstep 移除；索引项只有仍指向
    /// 本连接时才清除，避免覆盖同一设备新连接的索引。
    pub async fn remove(&self, connection_id: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.write().await;
        let removed = inner.sessions.remove(connection_id)?;

        if let Some(device_id) = &removed.session.device_id {
            let merchant_id = &removed.session.merchant_id;
            let mut emptied = false;
            if let Some(devices) = inner.device_index.get_mut(merchant_id) {
                if devices.get(device_id).map(String::as_str) == Some(connection_id) {
                    devices.remove(device_id);
                }
                emptied = devices.is_empty();
            }
            if emptied {
                inner.device_index.remove(merchant_id);
            }
        }

        metrics::connections().active.set(inner.sessions.len() as i64);
        debug!(%connection_id, total = inner.sessions.len(), "Session removed");
        Some(removed)
    }

    /// 全量快照（心跳扫描用）
    pub async fn all_sessions(&self) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner.sessions.values().cloned().collect()
    }

    /// 指定商户、指定类别的会话快照
    pub async fn sessions_for_merchant(
        &self,
        merchant_id: &str,
        class: ConnectionClass,
    ) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|h| h.session.merchant_id == merchant_id && h.session.class == class)
            .cloned()
            .collect()
    }

    /// 指定商户的全部设备会话（经二级索引解析）
    pub async fn device_sessions(&self, merchant_id: &str) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        let Some(devices) = inner.device_index.get(merchant_id) else {
            return Vec::new();
        };
        devices
            .values()
            .filter_map(|connection_id| inner.sessions.get(connection_id))
            .cloned()
            .collect()
    }

    /// 单设备定点查询
    pub async fn device_session(
        &self,
        merchant_id: &str,
        device_id: &str,
    ) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        let connection_id = inner.device_index.get(merchant_id)?.get(device_id)?;
        inner.sessions.get(connection_id).cloned()
    }

    /// 按 connection_id 查询
    pub async fn get(&self, connection_id: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        inner.sessions.get(connection_id).cloned()
    }

    /// 刷新会话活跃时间
    pub async fn touch(&self, connection_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(handle) = inner.sessions.get_mut(connection_id) {
            handle.session.touch();
        }
    }

    /// 在线连接计数：(总数, 看板, 设备)
    pub async fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.read().await;
        let total = inner.sessions.len();
        let dashboards = inner
            .sessions
            .values()
            .filter(|h| h.session.class == ConnectionClass::Dashboard)
            .count();
        (total, dashboards, total - dashboards)
    }
}
