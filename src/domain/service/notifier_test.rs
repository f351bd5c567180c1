//! 扇出引擎场景测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::domain::message::ServerMessage;
    use crate::domain::registry::{ConnectionRegistry, SessionChannel, SessionHandle};
    use crate::domain::session::Session;
    use crate::domain::service::notifier::EventNotifier;
    use crate::domain::transaction::{SwitchCallback, Transaction};

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

    fn transaction(merchant: &str, code: &str) -> Transaction {
        Transaction::from_callback(SwitchCallback {
            transaction_id: None,
            merchant_id: merchant.to_string(),
            amount: 250_000.0,
            response_code: Some(code.to_string()),
            authorization_code: None,
            rrn: None,
            stan: None,
            bank_code: Some("BNI".to_string()),
            customer_name: None,
            customer_account: None,
            transaction_time: None,
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_approved_fans_out_to_every_device_of_the_merchant() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = EventNotifier::new(Arc::clone(&registry));

        let (_d1, mut rx1) = connect(&registry, "MER001", Some("PRN1")).await;
        let (_d2, mut rx2) = connect(&registry, "MER001", Some("PRN2")).await;
        let (_d3, mut rx3) = connect(&registry, "MER001", Some("PRN3")).await;
        let (_other, mut other_rx) = connect(&registry, "MER002", Some("PRN1")).await;

        let result = notifier.notify(&transaction("MER001", "00")).await;
        assert!(result.device_delivered);

        // 每台在线设备恰好一条打印指令
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            assert!(matches!(msgs[0], ServerMessage::PaymentSuccess { .. }));
        }
        // 其他商户的设备一条都不收
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn test_declined_never_reaches_devices() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = EventNotifier::new(Arc::clone(&registry));

        let (_dash, mut dash_rx) = connect(&registry, "MER001", None).await;
        let (_dev, mut dev_rx) = connect(&registry, "MER001", Some("PRN1")).await;

        let result = notifier.notify(&transaction("MER001", "55")).await;

        assert!(result.dashboard_delivered);
        assert!(!result.device_delivered);

        let dash_msgs = drain(&mut dash_rx);
        assert_eq!(dash_msgs.len(), 1);
        assert!(matches!(dash_msgs[0], ServerMessage::PaymentDeclined { .. }));
        assert!(drain(&mut dev_rx).is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_and_device_payloads_are_independent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = EventNotifier::new(Arc::clone(&registry));

        let (_dash, mut dash_rx) = connect(&registry, "MER001", None).await;
        let (_dev, mut dev_rx) = connect(&registry, "MER001", Some("PRN1")).await;

        notifier.notify(&transaction("MER001", "00")).await;

        let dash_msg = dash_rx.recv().await.unwrap();
        assert!(matches!(dash_msg, ServerMessage::PaymentApproved { .. }));

        // 设备载荷带齐小票字段
        let dev_msg = dev_rx.recv().await.unwrap();
        let value = serde_json::to_value(&dev_msg).unwrap();
        assert_eq!(value["type"], "PAYMENT_SUCCESS");
        assert_eq!(value["receipt"]["authCode"].as_str().unwrap().len(), 6);
        assert_eq!(value["receipt"]["rrn"].as_str().unwrap().len(), 12);
        assert_eq!(value["receipt"]["stan"].as_str().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_one_dead_session_does_not_block_the_rest() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = EventNotifier::new(Arc::clone(&registry));

        let (_dead, dead_rx) = connect(&registry, "MER001", None).await;
        let (_live, mut live_rx) = connect(&registry, "MER001", None).await;
        // 快照与投递之间会话死亡：按投递失败处理，不是崩溃
        drop(dead_rx);

        let result = notifier.notify(&transaction("MER001", "00")).await;

        assert!(result.dashboard_delivered);
        assert_eq!(drain(&mut live_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_no_sessions_means_missed_not_error() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = EventNotifier::new(Arc::clone(&registry));

        let result = notifier.notify(&transaction("MER404", "00")).await;

        assert!(!result.dashboard_delivered);
        assert!(!result.device_delivered);
    }

    #[tokio::test]
    async fn test_settlement_goes_to_dashboards_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = EventNotifier::new(Arc::clone(&registry));

        let (_dash, mut dash_rx) = connect(&registry, "MER001", None).await;
        let (_dev, mut dev_rx) = connect(&registry, "MER001", Some("PRN1")).await;

        let mut txn = transaction("MER001", "00");
        txn.settle();
        let delivered = notifier.notify_settlement(&txn).await;

        assert!(delivered);
        assert!(matches!(
            dash_rx.recv().await.unwrap(),
            ServerMessage::SettlementCompleted { .. }
        ));
        assert!(drain(&mut dev_rx).is_empty());
    }
}
