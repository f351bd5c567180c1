//! 心跳监督服务
//!
//! 独立于事件流运行的周期性巡检，每轮对注册表内全部会话：
//! 1. 通道已死的直接清除（两轮之间死掉的残留条目）
//! 2. 连接年龄超上限的主动关闭并清除，强制客户端周期性重连
//! 3. 其余发送应用层探测 SERVER_PING（携带 connectionId 与服务端时间）
//!
//! 探测必须是应用层可见消息而不是传输层控制帧：部分传输实现和
//! 前置代理会静默吞掉协议层 ping，应用层探测才能在应用层面观测到
//! 连接是否还活着。
//!
//! 本设计不做"探测未应答即驱逐"：驱逐只由年龄上限与传输层死亡
//! 驱动。是否需要更严格的活性超时是悬而未决的问题，这里有意保持
//! 不驱逐的行为。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::message::ServerMessage;
use crate::domain::registry::ConnectionRegistry;

/// 单轮巡检统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// 通道已死被清除的会话数
    pub removed_dead: usize,
    /// 超龄被驱逐的会话数
    pub evicted_aged: usize,
    /// 成功发出探测的会话数
    pub probed: usize,
}

/// 心跳监督器
pub struct HeartbeatSupervisor {
    registry: Arc<ConnectionRegistry>,
    interval: std::time::Duration,
    max_connection_age: chrono::Duration,
}

impl HeartbeatSupervisor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interval: std::time::Duration,
        max_connection_age: chrono::Duration,
    ) -> Self {
        Self {
            registry,
            interval,
            max_connection_age,
        }
    }

    /// 启动周期巡检任务
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // 首个 tick 立即返回，跳过
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = self.sweep().await;
                debug!(
                    removed_dead = stats.removed_dead,
                    evicted_aged = stats.evicted_aged,
                    probed = stats.probed,
                    "Heartbeat sweep completed"
                );
            }
        })
    }

    /// 执行一轮巡检
    ///
    /// 单个会话的投递失败被就地捕获并清除该会话，绝不中断本轮
    /// 对其余会话的处理。巡检期间并发关闭的会话，其探测按失败
    /// 处理即可。
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        for handle in self.registry.all_sessions().await {
            let connection_id = &handle.session.connection_id;

            if !handle.channel.is_open() {
                self.registry.remove(connection_id).await;
                stats.removed_dead += 1;
                debug!(%connection_id, "Removed session with dead channel");
                continue;
            }

            if handle.session.exceeds_max_age(self.max_connection_age) {
                // 移除即丢弃出站通道，连接任务随之关闭 socket
                self.registry.remove(connection_id).await;
                stats.evicted_aged += 1;
                info!(
                    %connection_id,
                    merchant_id = %handle.session.merchant_id,
                    connected_at = %handle.session.connected_at,
                    "Evicted session beyond max connection age"
                );
                continue;
            }

            match handle.deliver(ServerMessage::server_ping(connection_id)) {
                Ok(()) => stats.probed += 1,
                Err(err) => {
                    warn!(error = %err, %connection_id, "Heartbeat probe failed, removing session");
                    self.registry.remove(connection_id).await;
                    stats.removed_dead += 1;
                }
            }
        }

        stats
    }
}
