//! # Prometheus 指标收集模块
//!
//! 投递成败按商户与银行通道计数，仅做基础成功率观测；
//! 计数不落盘，进程重启即清零。

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 连接层指标
pub struct ConnectionMetrics {
    /// 当前在线连接数
    pub active: IntGauge,
    /// 接入结果计数
    pub accepted_total: IntCounterVec,
}

impl ConnectionMetrics {
    fn new() -> Self {
        let active = IntGauge::new("active_connections", "Number of live sessions")
            .expect("Failed to create active_connections metric");

        let accepted_total = IntCounterVec::new(
            Opts::new("connections_accepted_total", "Connection accept outcomes"),
            &["class", "outcome"],
        )
        .expect("Failed to create connections_accepted_total metric");

        REGISTRY
            .register(Box::new(active.clone()))
            .expect("Failed to register active_connections");
        REGISTRY
            .register(Box::new(accepted_total.clone()))
            .expect("Failed to register connections_accepted_total");

        Self {
            active,
            accepted_total,
        }
    }
}

/// 通知投递指标
pub struct NotifierMetrics {
    /// 按商户的事件投递结果（delivered / missed）
    pub merchant_delivery_total: IntCounterVec,
    /// 按银行通道的事件投递结果
    pub channel_delivery_total: IntCounterVec,
    /// 按目标类别的单次发送结果
    pub sends_total: IntCounterVec,
}

impl NotifierMetrics {
    fn new() -> Self {
        let merchant_delivery_total = IntCounterVec::new(
            Opts::new(
                "notifications_merchant_total",
                "Per-merchant delivery outcomes",
            ),
            &["merchant_id", "outcome"],
        )
        .expect("Failed to create notifications_merchant_total metric");

        let channel_delivery_total = IntCounterVec::new(
            Opts::new(
                "notifications_channel_total",
                "Per-bank-channel delivery outcomes",
            ),
            &["bank_code", "outcome"],
        )
        .expect("Failed to create notifications_channel_total metric");

        let sends_total = IntCounterVec::new(
            Opts::new("notification_sends_total", "Individual send results"),
            &["class", "result"],
        )
        .expect("Failed to create notification_sends_total metric");

        REGISTRY
            .register(Box::new(merchant_delivery_total.clone()))
            .expect("Failed to register notifications_merchant_total");
        REGISTRY
            .register(Box::new(channel_delivery_total.clone()))
            .expect("Failed to register notifications_channel_total");
        REGISTRY
            .register(Box::new(sends_total.clone()))
            .expect("Failed to register notification_sends_total");

        Self {
            merchant_delivery_total,
            channel_delivery_total,
            sends_total,
        }
    }
}

static CONNECTIONS: Lazy<ConnectionMetrics> = Lazy::new(ConnectionMetrics::new);
static NOTIFIER: Lazy<NotifierMetrics> = Lazy::new(NotifierMetrics::new);

pub fn connections() -> &'static ConnectionMetrics {
    &CONNECTIONS
}

pub fn notifier() -> &'static NotifierMetrics {
    &NOTIFIER
}

/// /metrics 端点的文本输出
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_count() {
        notifier()
            .merchant_delivery_total
            .with_label_values(&["MER001", "delivered"])
            .inc();
        connections().active.set(3);

        let output = gather();
        assert!(output.contains("notifications_merchant_total"));
        assert!(output.contains("active_connections"));
    }
}
