//! 交易生命周期存储
//!
//! 职责：
//! - 按状态分桶（pending / approved / declined / settled）持有全部交易
//! - 授权回调路径：映射应答码、入桶、触发通知
//! - 清算定时：APPROVED 入桶时调度一次性延迟任务，到期单向迁入已清算桶
//! - 设备确认路径：设备对 PENDING 交易的确认/拒绝，走与回调相同的迁移
//!
//! 并发纪律：所有桶在同一把 Mutex 内，入桶与通知在同一次持锁内完成，
//! 保证同一商户的事件按 Store 处理顺序通知；跨商户无全局顺序保证。
//! 交易在进程生命周期内不淘汰，属已知的规模化遗留问题。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::message::ServerMessage;
use crate::domain::registry::SessionHandle;
use crate::domain::transaction::{SwitchCallback, Transaction, TransactionStatus};
use crate::error::{GatewayError, Result};

use super::notifier::{DeliveryResult, EventNotifier};

/// 一次性清算任务调度器
///
/// 任务以交易号为键，原则上可取消（为将来的清算冲正留扩展点，
/// 当前流程从不取消）。
#[derive(Default)]
pub struct SettlementScheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl SettlementScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 延迟 delay 后执行 job；完成后自清理
    pub async fn schedule<F>(self: &Arc<Self>, transaction_id: String, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        let id = transaction_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
            scheduler.tasks.lock().await.remove(&id);
        });
        self.tasks.lock().await.insert(transaction_id, handle);
    }

    /// 取消尚未到期的任务；不存在时返回 false
    pub async fn cancel(&self, transaction_id: &str) -> bool {
        match self.tasks.lock().await.remove(transaction_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[derive(Default)]
struct Buckets {
    pending: HashMap<String, Transaction>,
    approved: HashMap<String, Transaction>,
    declined: HashMap<String, Transaction>,
    settled: HashMap<String, Transaction>,
}

/// 各状态桶的交易数：(pending, approved, declined, settled)
pub type BucketCounts = (usize, usize, usize, usize);

/// 交易生命周期存储
pub struct TransactionStore {
    buckets: Mutex<Buckets>,
    notifier: Arc<EventNotifier>,
    scheduler: Arc<SettlementScheduler>,
    settlement_delay: Duration,
}

impl TransactionStore {
    pub fn new(notifier: Arc<EventNotifier>, settlement_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            buckets: Mutex::new(Buckets::default()),
            notifier,
            scheduler: Arc::new(SettlementScheduler::new()),
            settlement_delay,
        })
    }

    /// 授权回调入口
    ///
    /// 业务规则：
    /// 1. 应答码映射决定入桶（恰好一个桶）
    /// 2. 通知在同一次持锁内完成，保证同商户事件顺序
    /// 3. APPROVED 在通知完成之后才调度清算，保证先批准后清算的投递顺序
    pub async fn process_callback(
        self: &Arc<Self>,
        callback: SwitchCallback,
    ) -> (Transaction, DeliveryResult) {
        let transaction = Transaction::from_callback(callback);

        let result = {
            let mut buckets = self.buckets.lock().await;
            match transaction.status {
                TransactionStatus::Pending => {
                    buckets
                        .pending
                        .insert(transaction.id.clone(), transaction.clone());
                }
                TransactionStatus::Approved => {
                    buckets
                        .approved
                        .insert(transaction.id.clone(), transaction.clone());
                }
                TransactionStatus::Declined => {
                    buckets
                        .declined
                        .insert(transaction.id.clone(), transaction.clone());
                }
            }
            self.notifier.notify(&transaction).await
        };

        info!(
            transaction_id = %transaction.id,
            merchant_id = %transaction.merchant_id,
            status = ?transaction.status,
            dashboard_delivered = result.dashboard_delivered,
            device_delivered = result.device_delivered,
            "Authorization callback processed"
        );

        if transaction.status == TransactionStatus::Approved {
            self.schedule_settlement(&transaction.id).await;
        }

        (transaction, result)
    }

    /// 设备确认：PENDING → APPROVED，再走正常的通知与清算调度，
    /// 最后只向发起确认的设备会话回直接回执。
    pub async fn approve_from_device(
        self: &Arc<Self>,
        transaction_id: &str,
        authorization_code: Option<String>,
        device: &SessionHandle,
    ) -> Result<Transaction> {
        let transaction = self
            .transition_pending(transaction_id, device, |txn| {
                txn.approve(authorization_code.clone())
            })
            .await?;

        self.schedule_settlement(&transaction.id).await;

        if let Err(err) = device.deliver(ServerMessage::transaction_processed(&transaction)) {
            warn!(error = %err, "Failed to confirm approval to device");
        }
        Ok(transaction)
    }

    /// 设备拒绝：PENDING → DECLINED（终态，不调度清算）
    pub async fn decline_from_device(
        self: &Arc<Self>,
        transaction_id: &str,
        device: &SessionHandle,
    ) -> Result<Transaction> {
        let transaction = self
            .transition_pending(transaction_id, device, |txn| txn.decline())
            .await?;

        if let Err(err) = device.deliver(ServerMessage::transaction_processed(&transaction)) {
            warn!(error = %err, "Failed to confirm decline to device");
        }
        Ok(transaction)
    }

    /// PENDING 桶内迁移的公共部分：校验、迁桶、通知（同一次持锁）
    ///
    /// 设备只能操作本商户的交易；未跟踪的交易号不改动任何状态。
    async fn transition_pending(
        &self,
        transaction_id: &str,
        device: &SessionHandle,
        mutate: impl FnOnce(&mut Transaction),
    ) -> Result<Transaction> {
        let mut buckets = self.buckets.lock().await;

        let known_elsewhere = buckets.approved.contains_key(transaction_id)
            || buckets.declined.contains_key(transaction_id)
            || buckets.settled.contains_key(transaction_id);

        let Some(mut transaction) = buckets.pending.remove(transaction_id) else {
            if known_elsewhere {
                return Err(GatewayError::InvalidTransactionState {
                    id: transaction_id.to_string(),
                    state: "not pending",
                });
            }
            return Err(GatewayError::UnknownTransaction(transaction_id.to_string()));
        };

        if transaction.merchant_id != device.session.merchant_id {
            // 不是本商户的交易，放回并按未知处理
            buckets
                .pending
                .insert(transaction.id.clone(), transaction);
            return Err(GatewayError::UnknownTransaction(transaction_id.to_string()));
        }

        mutate(&mut transaction);
        match transaction.status {
            TransactionStatus::Approved => {
                buckets
                    .approved
                    .insert(transaction.id.clone(), transaction.clone());
            }
            TransactionStatus::Declined => {
                buckets
                    .declined
                    .insert(transaction.id.clone(), transaction.clone());
            }
            TransactionStatus::Pending => unreachable!("transition must leave pending"),
        }

        let _ = self.notifier.notify(&transaction).await;
        Ok(transaction)
    }

    /// 调度清算任务（固定延迟的一次性任务）
    async fn schedule_settlement(self: &Arc<Self>, transaction_id: &str) {
        let store = Arc::clone(self);
        let id = transaction_id.to_string();
        debug!(transaction_id = %id, delay_ms = self.settlement_delay.as_millis() as u64, "Settlement scheduled");
        self.scheduler
            .schedule(id.clone(), self.settlement_delay, async move {
                store.settle(&id).await;
            })
            .await;
    }

    /// 清算到期：approved → settled，单向、无冲正，只通知看板
    async fn settle(&self, transaction_id: &str) {
        let mut buckets = self.buckets.lock().await;
        let Some(mut transaction) = buckets.approved.remove(transaction_id) else {
            // 交易已不在 approved 桶（理论上只有被取消的任务才会错过）
            warn!(%transaction_id, "Settlement fired for a transaction no longer approved");
            return;
        };

        transaction.settle();
        buckets
            .settled
            .insert(transaction.id.clone(), transaction.clone());

        let delivered = self.notifier.notify_settlement(&transaction).await;
        info!(
            transaction_id = %transaction.id,
            merchant_id = %transaction.merchant_id,
            delivered,
            "Transaction settled"
        );
    }

    /// 调度器（测试与将来的冲正扩展点用）
    pub fn scheduler(&self) -> &Arc<SettlementScheduler> {
        &self.scheduler
    }

    /// 按交易号查询（跨桶）
    pub async fn get(&self, transaction_id: &str) -> Option<Transaction> {
        let buckets = self.buckets.lock().await;
        buckets
            .pending
            .get(transaction_id)
            .or_else(|| buckets.approved.get(transaction_id))
            .or_else(|| buckets.declined.get(transaction_id))
            .or_else(|| buckets.settled.get(transaction_id))
            .cloned()
    }

    pub async fn bucket_counts(&self) -> BucketCounts {
        let buckets = self.buckets.lock().await;
        (
            buckets.pending.len(),
            buckets.approved.len(),
            buckets.declined.len(),
            buckets.settled.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::{ConnectionRegistry, SessionChannel};
    use crate::domain::session::Session;
    use crate::domain::transaction::SettlementStatus;
    use tokio::sync::mpsc;

    fn store_with_registry(delay: Duration) -> (Arc<TransactionStore>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = Arc::new(EventNotifier::new(Arc::clone(&registry)));
        (TransactionStore::new(notifier, delay), registry)
    }

    async fn connect(
        registry: &ConnectionRegistry,
        merchant: &str,
        device: Option<&str>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let session = Session::new(merchant.to_string(), device.map(String::from));
        let (channel, rx) = SessionChannel::new();
        let handle = SessionHandle { session, channel };
        registry.insert(handle.clone()).await;
        (handle, rx)
    }

    fn callback(merchant: &str, code: Option<&str>) -> SwitchCallback {
        SwitchCallback {
            transaction_id: None,
            merchant_id: merchant.to_string(),
            amount: 100_000.0,
            response_code: code.map(String::from),
            authorization_code: None,
            rrn: None,
            stan: None,
            bank_code: Some("BCA".to_string()),
            customer_name: None,
            customer_account: None,
            transaction_time: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_approved_callback_settles_after_delay() {
        let (store, registry) = store_with_registry(Duration::from_millis(2000));
        let (_dash, mut rx) = connect(&registry, "MER001", None).await;

        let (txn, result) = store.process_callback(callback("MER001", Some("00"))).await;
        assert!(result.dashboard_delivered);
        assert_eq!(store.bucket_counts().await, (0, 1, 0, 0));

        // 批准通知先到
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::PaymentApproved { .. }));

        // 清算延迟到期后迁桶并二次通知
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.bucket_counts().await, (0, 0, 0, 1));

        let settled = store.get(&txn.id).await.unwrap();
        assert_eq!(settled.settlement_status, SettlementStatus::Completed);
        assert!(settled.settlement_reference.is_some());

        let second = rx.recv().await.unwrap();
        match second {
            ServerMessage::SettlementCompleted { transaction, .. } => {
                assert_eq!(transaction.id, txn.id)
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_declined_callback_with_no_sessions() {
        let (store, _registry) = store_with_registry(Duration::from_millis(10));

        let (txn, result) = store.process_callback(callback("MER002", Some("51"))).await;

        assert_eq!(txn.status, TransactionStatus::Declined);
        assert_eq!(txn.response_message, "INSUFFICIENT FUNDS");
        assert!(!result.dashboard_delivered);
        assert!(!result.device_delivered);
        assert_eq!(store.bucket_counts().await, (0, 0, 1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle_ordering_on_device_approval() {
        let (store, registry) = store_with_registry(Duration::from_millis(2000));
        let (_dash, mut dash_rx) = connect(&registry, "MER001", None).await;
        let (device, mut dev_rx) = connect(&registry, "MER001", Some("EDC001")).await;

        // 发起（无应答码 → PENDING）
        let (txn, _) = store.process_callback(callback("MER001", None)).await;
        assert_eq!(store.bucket_counts().await, (1, 0, 0, 0));

        // 设备确认
        store
            .approve_from_device(&txn.id, Some("123456".to_string()), &device)
            .await
            .unwrap();

        // 清算
        tokio::time::sleep(Duration::from_millis(2100)).await;

        // 看板按序收到三条通知，交易号一致
        let kinds: Vec<ServerMessage> = [
            dash_rx.recv().await.unwrap(),
            dash_rx.recv().await.unwrap(),
            dash_rx.recv().await.unwrap(),
        ]
        .into();
        match (&kinds[0], &kinds[1], &kinds[2]) {
            (
                ServerMessage::PaymentInitiated { transaction: a, .. },
                ServerMessage::PaymentApproved { transaction: b, .. },
                ServerMessage::SettlementCompleted { transaction: c, .. },
            ) => {
                assert_eq!(a.id, txn.id);
                assert_eq!(b.id, txn.id);
                assert_eq!(c.id, txn.id);
            }
            other => panic!("unexpected ordering: {other:?}"),
        }

        // 设备收到打印指令与直接回执（回执只发给发起设备）
        let dev_first = dev_rx.recv().await.unwrap();
        assert!(matches!(dev_first, ServerMessage::PaymentSuccess { .. }));
        let dev_second = dev_rx.recv().await.unwrap();
        assert!(matches!(
            dev_second,
            ServerMessage::TransactionProcessed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_transaction_mutates_nothing() {
        let (store, registry) = store_with_registry(Duration::from_millis(10));
        let (device, _rx) = connect(&registry, "MER001", Some("EDC001")).await;

        let err = store
            .approve_from_device("TXN-UNTRACKED", None, &device)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::UnknownTransaction(_)));
        assert_eq!(store.bucket_counts().await, (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_device_cannot_touch_other_merchants_transaction() {
        let (store, registry) = store_with_registry(Duration::from_millis(10));
        let (foreign_device, _rx) = connect(&registry, "MER002", Some("EDC9")).await;

        let (txn, _) = store.process_callback(callback("MER001", None)).await;
        let err = store
            .approve_from_device(&txn.id, None, &foreign_device)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::UnknownTransaction(_)));
        // 交易仍在 PENDING 桶
        assert_eq!(store.bucket_counts().await, (1, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_double_approval_is_invalid_state() {
        let (store, registry) = store_with_registry(Duration::from_millis(60_000));
        let (device, _rx) = connect(&registry, "MER001", Some("EDC001")).await;

        let (txn, _) = store.process_callback(callback("MER001", None)).await;
        store.approve_from_device(&txn.id, None, &device).await.unwrap();

        let err = store
            .approve_from_device(&txn.id, None, &device)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidTransactionState { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_decline_is_terminal() {
        let (store, registry) = store_with_registry(Duration::from_millis(2000));
        let (device, mut dev_rx) = connect(&registry, "MER001", Some("EDC001")).await;

        let (txn, _) = store.process_callback(callback("MER001", None)).await;
        store.decline_from_device(&txn.id, &device).await.unwrap();

        assert_eq!(store.bucket_counts().await, (0, 0, 1, 0));
        assert_eq!(store.scheduler().pending_count().await, 0);

        // 拒绝不产生打印指令，只有直接回执
        let only = dev_rx.recv().await.unwrap();
        assert!(matches!(only, ServerMessage::TransactionProcessed { .. }));

        // 清算窗口过后仍是终态
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.bucket_counts().await, (0, 0, 1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_cancel_prevents_settlement() {
        let (store, _registry) = store_with_registry(Duration::from_millis(2000));

        let (txn, _) = store.process_callback(callback("MER001", Some("00"))).await;
        assert!(store.scheduler().cancel(&txn.id).await);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.bucket_counts().await, (0, 1, 0, 0));
        assert_eq!(
            store.get(&txn.id).await.unwrap().settlement_status,
            SettlementStatus::None
        );
    }
}
