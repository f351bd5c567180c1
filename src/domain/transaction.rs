//! 交易实体与银行应答码映射
//!
//! 职责：
//! - 表示一次支付授权尝试的完整记录
//! - 银行应答码到授权结果的映射（映射表可扩展）
//! - 缺失标识符（交易号、授权码、RRN、STAN）的合成
//!
//! 生命周期：PENDING → {APPROVED, DECLINED}；APPROVED 经清算定时器
//! 单向进入已清算，DECLINED 为终态。

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 授权状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Declined,
}

/// 清算状态，独立于授权状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    None,
    Completed,
}

/// 银行应答码映射表
///
/// 未收录的码一律按 DECLINED 处理
pub fn map_response_code(code: &str) -> (TransactionStatus, &'static str) {
    match code {
        "00" => (TransactionStatus::Approved, "APPROVED"),
        "51" => (TransactionStatus::Declined, "INSUFFICIENT FUNDS"),
        "55" => (TransactionStatus::Declined, "INCORRECT PIN"),
        "91" => (TransactionStatus::Declined, "ISSUER/SWITCH INOPERATIVE"),
        "96" => (TransactionStatus::Declined, "SYSTEM MALFUNCTION"),
        _ => (TransactionStatus::Declined, "DECLINED"),
    }
}

/// 银行/Switch 授权回调请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCallback {
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub merchant_id: String,
    pub amount: f64,
    /// 为空视为支付发起（PENDING），等待设备确认
    #[serde(default)]
    pub response_code: Option<String>,
    #[serde(default)]
    pub authorization_code: Option<String>,
    #[serde(default)]
    pub rrn: Option<String>,
    #[serde(default)]
    pub stan: Option<String>,
    #[serde(default)]
    pub bank_code: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_account: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
}

/// 一次支付授权尝试
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub merchant_id: String,
    pub amount: f64,
    pub status: TransactionStatus,
    pub settlement_status: SettlementStatus,
    pub response_code: Option<String>,
    pub response_message: String,
    pub authorization_code: Option<String>,
    pub rrn: String,
    pub stan: String,
    pub bank_code: Option<String>,
    pub customer_name: Option<String>,
    pub customer_account: Option<String>,
    pub received_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub settlement_reference: Option<String>,
}

impl Transaction {
    /// 从授权回调构造交易记录
    ///
    /// 业务规则：
    /// 1. 缺失的 transactionId / RRN / STAN 在此合成
    /// 2. responseCode 为空表示支付发起，进入 PENDING 等待设备确认
    /// 3. responseCode 非空时按映射表定终态，APPROVED 时补齐授权码
    pub fn from_callback(callback: SwitchCallback) -> Self {
        let now = Utc::now();
        let (status, response_message) = match callback.response_code.as_deref() {
            None | Some("") => (TransactionStatus::Pending, "PENDING AUTHORIZATION"),
            Some(code) => map_response_code(code),
        };

        let authorization_code = if status == TransactionStatus::Approved {
            Some(
                callback
                    .authorization_code
                    .unwrap_or_else(|| generate_numeric(6)),
            )
        } else {
            callback.authorization_code
        };

        Self {
            id: callback
                .transaction_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| generate_transaction_id(now)),
            merchant_id: callback.merchant_id,
            amount: callback.amount.max(0.0),
            status,
            settlement_status: SettlementStatus::None,
            response_code: callback.response_code.filter(|c| !c.is_empty()),
            response_message: response_message.to_string(),
            authorization_code,
            rrn: callback.rrn.unwrap_or_else(|| generate_numeric(12)),
            stan: callback.stan.unwrap_or_else(|| generate_numeric(6)),
            bank_code: callback.bank_code,
            customer_name: callback.customer_name,
            customer_account: callback.customer_account,
            received_at: now,
            settled_at: None,
            settlement_reference: None,
        }
    }

    /// 设备确认：PENDING → APPROVED
    pub fn approve(&mut self, authorization_code: Option<String>) {
        self.status = TransactionStatus::Approved;
        self.response_code = Some("00".to_string());
        self.response_message = "APPROVED".to_string();
        self.authorization_code =
            Some(authorization_code.unwrap_or_else(|| generate_numeric(6)));
    }

    /// 设备拒绝：PENDING → DECLINED（终态）
    pub fn decline(&mut self) {
        self.status = TransactionStatus::Declined;
        self.response_message = "DECLINED".to_string();
    }

    /// 清算完成：补记清算时间与清算参考号
    pub fn settle(&mut self) {
        let now = Utc::now();
        self.settlement_status = SettlementStatus::Completed;
        self.settled_at = Some(now);
        self.settlement_reference = Some(format!("STL{}{}", now.format("%Y%m%d"), generate_numeric(8)));
    }
}

/// 合成交易号："TXN" + 毫秒时间戳 + 4 位随机数
fn generate_transaction_id(now: DateTime<Utc>) -> String {
    format!("TXN{}{}", now.timestamp_millis(), generate_numeric(4))
}

/// 合成定长数字串（授权码 6 位、STAN 6 位、RRN 12 位）
fn generate_numeric(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(0..10).to_string()).collect()
}
