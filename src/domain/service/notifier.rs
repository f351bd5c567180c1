//! 事件通知领域服务（扇出引擎）
//!
//! 职责：
//! - 按交易状态分类通知种类，解析目标商户的在线会话
//! - 看板与设备两类连接各自格式化专属载荷并独立投递
//! - 单个会话投递失败只记录、不阻断本轮其余目标
//!
//! 投递语义是 at-most-once、尽力而为：没有在线会话时事件即丢失，
//! 调用方拿到 delivered=false。看板约定在重连后重新拉取当前状态，
//! 不依赖错过的推送。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::message::ServerMessage;
use crate::domain::registry::{ConnectionRegistry, SessionHandle};
use crate::domain::session::ConnectionClass;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::metrics;

/// 一次事件的投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResult {
    /// 至少一个看板会话收到
    pub dashboard_delivered: bool,
    /// 至少一个设备会话收到
    pub device_delivered: bool,
}

/// 事件通知领域服务
pub struct EventNotifier {
    registry: Arc<ConnectionRegistry>,
}

impl EventNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 授权事件扇出
    ///
    /// 看板收到与状态对应的通知；设备只在 APPROVED 时收到打印指令，
    /// 且发给该商户的全部在线设备（可能挂多台打印机）。
    pub async fn notify(&self, transaction: &Transaction) -> DeliveryResult {
        let dashboards = self
            .registry
            .sessions_for_merchant(&transaction.merchant_id, ConnectionClass::Dashboard)
            .await;
        let dashboard_delivered = self.fan_out(
            &dashboards,
            ServerMessage::dashboard_notification(transaction),
            "dashboard",
        );

        let device_delivered = if transaction.status == TransactionStatus::Approved {
            let devices = self.registry.device_sessions(&transaction.merchant_id).await;
            self.fan_out(&devices, ServerMessage::print_command(transaction), "device")
        } else {
            false
        };

        self.record_outcome(transaction, dashboard_delivered);

        DeliveryResult {
            dashboard_delivered,
            device_delivered,
        }
    }

    /// 清算事件：独立的简化通路，只发看板
    pub async fn notify_settlement(&self, transaction: &Transaction) -> bool {
        let dashboards = self
            .registry
            .sessions_for_merchant(&transaction.merchant_id, ConnectionClass::Dashboard)
            .await;
        let delivered = self.fan_out(
            &dashboards,
            ServerMessage::settlement_notification(transaction),
            "dashboard",
        );
        self.record_outcome(transaction, delivered);
        delivered
    }

    /// 向一组会话投递同一载荷
    ///
    /// 快照取出后会话可能已断开；逐个捕获失败并继续，
    /// 至少一个成功即视为本类投递成功。
    fn fan_out(&self, targets: &[SessionHandle], message: ServerMessage, class: &str) -> bool {
        let mut delivered = false;
        for handle in targets {
            if !handle.channel.is_open() {
                debug!(
                    connection_id = %handle.session.connection_id,
                    "Skipping closed channel in fan-out"
                );
                continue;
            }
            match handle.deliver(message.clone()) {
                Ok(()) => {
                    delivered = true;
                    metrics::notifier()
                        .sends_total
                        .with_label_values(&[class, "ok"])
                        .inc();
                }
                Err(err) => {
                    metrics::notifier()
                        .sends_total
                        .with_label_values(&[class, "failed"])
                        .inc();
                    warn!(
                        error = %err,
                        connection_id = %handle.session.connection_id,
                        "Failed to deliver notification"
                    );
                }
            }
        }
        delivered
    }

    /// 按商户与银行通道记录投递结果（仅计数）
    fn record_outcome(&self, transaction: &Transaction, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "missed" };
        metrics::notifier()
            .merchant_delivery_total
            .with_label_values(&[&transaction.merchant_id, outcome])
            .inc();
        metrics::notifier()
            .channel_delivery_total
            .with_label_values(&[
                transaction.bank_code.as_deref().unwrap_or("UNKNOWN"),
                outcome,
            ])
            .inc();
    }
}
