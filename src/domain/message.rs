//! 应用层消息协议
//!
//! 入站/出站消息都是带 `type` 判别字段的 JSON 对象，这里建模为
//! 封闭的 tagged union，在反序列化边界做穷尽处理；未识别的
//! 类型映射到显式的 `Unknown` 变体（忽略、不报错）。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::transaction::{Transaction, TransactionStatus};

/// 客户端 → 服务端
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// 客户端保活探测，要求回复 PONG
    #[serde(rename = "PING")]
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// 对服务端 SERVER_PING 的应答，只刷新活跃时间
    #[serde(rename = "PONG")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// 设备确认待定交易
    #[serde(rename = "APPROVE_TRANSACTION", rename_all = "camelCase")]
    ApproveTransaction {
        transaction_id: String,
        #[serde(default)]
        authorization_code: Option<String>,
    },
    /// 设备拒绝待定交易
    #[serde(rename = "DECLINE_TRANSACTION", rename_all = "camelCase")]
    DeclineTransaction { transaction_id: String },
    /// 未识别的消息类型
    #[serde(other)]
    Unknown,
}

/// 服务端 → 客户端
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// 接入成功后的欢迎消息，只发一次
    #[serde(rename = "CONNECTED", rename_all = "camelCase")]
    Connected {
        connection_id: String,
        merchant_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        message: String,
        timestamp: i64,
    },
    /// 策略违规（关闭前的诊断）或针对单设备的业务错误
    #[serde(rename = "ERROR")]
    Error {
        code: String,
        message: String,
        timestamp: i64,
    },
    /// 应用层心跳探测；客户端按约定回复 PONG
    #[serde(rename = "SERVER_PING", rename_all = "camelCase")]
    ServerPing {
        connection_id: String,
        timestamp: i64,
    },
    #[serde(rename = "PONG")]
    Pong { timestamp: i64 },
    #[serde(rename = "PAYMENT_INITIATED")]
    PaymentInitiated {
        title: String,
        message: String,
        transaction: Transaction,
        timestamp: i64,
    },
    #[serde(rename = "PAYMENT_APPROVED")]
    PaymentApproved {
        title: String,
        message: String,
        transaction: Transaction,
        timestamp: i64,
    },
    #[serde(rename = "PAYMENT_DECLINED")]
    PaymentDeclined {
        title: String,
        message: String,
        transaction: Transaction,
        timestamp: i64,
    },
    #[serde(rename = "SETTLEMENT_COMPLETED")]
    SettlementCompleted {
        title: String,
        message: String,
        transaction: Transaction,
        timestamp: i64,
    },
    /// 设备打印指令
    #[serde(rename = "PAYMENT_SUCCESS")]
    PaymentSuccess {
        command: String,
        receipt: Receipt,
        timestamp: i64,
    },
    /// 对发起确认/拒绝的设备的直接回执
    #[serde(rename = "TRANSACTION_PROCESSED", rename_all = "camelCase")]
    TransactionProcessed {
        transaction_id: String,
        status: TransactionStatus,
        message: String,
        timestamp: i64,
    },
}

/// 设备打印的小票字段
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_id: String,
    pub merchant_id: String,
    pub amount: f64,
    pub auth_code: String,
    pub rrn: String,
    pub stan: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_code: Option<String>,
    pub timestamp: i64,
}

/// 毫秒级时间戳（与原型客户端的 Date.now() 对齐）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl ServerMessage {
    pub fn welcome(
        connection_id: &str,
        merchant_id: &str,
        device_id: Option<&str>,
    ) -> Self {
        ServerMessage::Connected {
            connection_id: connection_id.to_string(),
            merchant_id: merchant_id.to_string(),
            device_id: device_id.map(String::from),
            message: "Connected to QRIS notification service".to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn server_ping(connection_id: &str) -> Self {
        ServerMessage::ServerPing {
            connection_id: connection_id.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: now_millis(),
        }
    }

    /// 看板通知：按交易授权状态选择消息种类
    pub fn dashboard_notification(transaction: &Transaction) -> Self {
        let timestamp = now_millis();
        match transaction.status {
            TransactionStatus::Pending => ServerMessage::PaymentInitiated {
                title: "Payment Initiated".to_string(),
                message: format!(
                    "Payment of Rp {:.0} awaiting confirmation",
                    transaction.amount
                ),
                transaction: transaction.clone(),
                timestamp,
            },
            TransactionStatus::Approved => ServerMessage::PaymentApproved {
                title: "Payment Approved".to_string(),
                message: format!("Payment of Rp {:.0} approved", transaction.amount),
                transaction: transaction.clone(),
                timestamp,
            },
            TransactionStatus::Declined => ServerMessage::PaymentDeclined {
                title: "Payment Declined".to_string(),
                message: format!(
                    "Payment of Rp {:.0} declined: {}",
                    transaction.amount, transaction.response_message
                ),
                transaction: transaction.clone(),
                timestamp,
            },
        }
    }

    /// 看板清算通知（独立于授权状态分类的简化通路）
    pub fn settlement_notification(transaction: &Transaction) -> Self {
        ServerMessage::SettlementCompleted {
            title: "Settlement Completed".to_string(),
            message: format!("Settlement for transaction {} completed", transaction.id),
            transaction: transaction.clone(),
            timestamp: now_millis(),
        }
    }

    /// 设备打印指令，小票字段取自交易记录
    pub fn print_command(transaction: &Transaction) -> Self {
        ServerMessage::PaymentSuccess {
            command: "PRINT_RECEIPT".to_string(),
            receipt: Receipt {
                transaction_id: transaction.id.clone(),
                merchant_id: transaction.merchant_id.clone(),
                amount: transaction.amount,
                auth_code: transaction
                    .authorization_code
                    .clone()
                    .unwrap_or_default(),
                rrn: transaction.rrn.clone(),
                stan: transaction.stan.clone(),
                bank_code: transaction.bank_code.clone(),
                timestamp: now_millis(),
            },
            timestamp: now_millis(),
        }
    }

    pub fn transaction_processed(transaction: &Transaction) -> Self {
        ServerMessage::TransactionProcessed {
            transaction_id: transaction.id.clone(),
            status: transaction.status,
            message: format!("Transaction {}", transaction.response_message),
            timestamp: now_millis(),
        }
    }
}
