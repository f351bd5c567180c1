//! HTTP 路由
//!
//! - `GET  /ws`                  长连接接入（见 connection 模块）
//! - `POST /api/switch/callback` 银行/Switch 授权回调
//! - `GET  /health`              健康检查（在线连接与交易桶计数）
//! - `GET  /metrics`             Prometheus 文本输出

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Json, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::domain::registry::ConnectionRegistry;
use crate::domain::service::TransactionStore;
use crate::domain::transaction::{SwitchCallback, TransactionStatus};
use crate::metrics;

use super::connection::ws_handler;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<TransactionStore>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/switch/callback", post(switch_callback))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

/// 授权回调应答
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub success: bool,
    pub transaction_id: String,
    pub status: TransactionStatus,
    /// 是否有任一在线会话收到推送（at-most-once，不重试）
    pub notified: bool,
}

/// `POST /api/switch/callback`
pub async fn switch_callback(
    State(state): State<AppState>,
    Json(callback): Json<SwitchCallback>,
) -> Json<CallbackResponse> {
    info!(
        merchant_id = %callback.merchant_id,
        response_code = ?callback.response_code,
        amount = callback.amount,
        "Switch callback received"
    );

    let (transaction, result) = state.store.process_callback(callback).await;

    Json(CallbackResponse {
        success: true,
        transaction_id: transaction.id,
        status: transaction.status,
        notified: result.dashboard_delivered || result.device_delivered,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connections: ConnectionCounts,
    pub transactions: TransactionCounts,
}

#[derive(Debug, Serialize)]
pub struct ConnectionCounts {
    pub total: usize,
    pub dashboards: usize,
    pub devices: usize,
}

#[derive(Debug, Serialize)]
pub struct TransactionCounts {
    pub pending: usize,
    pub approved: usize,
    pub declined: usize,
    pub settled: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (total, dashboards, devices) = state.registry.counts().await;
    let (pending, approved, declined, settled) = state.store.bucket_counts().await;

    Json(HealthResponse {
        status: "healthy",
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections: ConnectionCounts {
            total,
            dashboards,
            devices,
        },
        transactions: TransactionCounts {
            pending,
            approved,
            declined,
            settled,
        },
    })
}

/// `GET /metrics`
async fn metrics_text() -> String {
    metrics::gather()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::ServerMessage;
    use crate::domain::registry::{SessionChannel, SessionHandle};
    use crate::domain::service::EventNotifier;
    use crate::domain::session::Session;
    use std::time::Duration;

    fn test_state() -> AppState {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = Arc::new(EventNotifier::new(Arc::clone(&registry)));
        let store = TransactionStore::new(notifier, Duration::from_millis(2000));
        AppState {
            registry,
            store,
            started_at: Instant::now(),
        }
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
    async fn test_callback_notifies_connected_dashboard() {
        let state = test_state();
        let session = Session::new("M1".to_string(), None);
        let (channel, mut rx) = SessionChannel::new();
        state
            .registry
            .insert(SessionHandle { session, channel })
            .await;

        let response =
            switch_callback(State(state.clone()), Json(callback("M1", Some("00")))).await;

        assert!(response.0.success);
        assert!(response.0.notified);
        assert_eq!(response.0.status, TransactionStatus::Approved);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::PaymentApproved { .. }
        ));

        // 清算延迟后同一会话恰好再收到一条清算通知
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::SettlementCompleted { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_callback_without_sessions_reports_not_notified() {
        let state = test_state();

        let response =
            switch_callback(State(state.clone()), Json(callback("M2", Some("51")))).await;

        assert!(response.0.success);
        assert!(!response.0.notified);
        assert_eq!(response.0.status, TransactionStatus::Declined);
        assert_eq!(state.store.bucket_counts().await, (0, 0, 1, 0));
    }

    #[tokio::test]
    async fn test_health_reflects_registry_counts() {
        let state = test_state();
        let session = Session::new("M1".to_string(), Some("PRN1".to_string()));
        let (channel, _rx) = SessionChannel::new();
        state
            .registry
            .insert(SessionHandle { session, channel })
            .await;

        let response = health(State(state)).await;
        assert_eq!(response.0.status, "healthy");
        assert_eq!(response.0.connections.total, 1);
        assert_eq!(response.0.connections.devices, 1);
        assert_eq!(response.0.connections.dashboards, 0);
    }
}
