//! WebSocket 接入协议与单连接事件循环
//!
//! 接入：从查询参数解析 merchantId（必填）与 deviceId（可选）。
//! 缺失 merchantId 的连接尽力发一条诊断消息后按策略违规码关闭，
//! 任何时刻都不会进入注册表。
//!
//! 连接期间：单任务 select 循环同时消费出站通道与入站帧。出站
//! 通道的发送端只由注册表持有，注册表移除会话（心跳驱逐）即令
//! 通道关闭，循环随之关闭 socket；循环退出时再做一次幂等移除。

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::message::{ClientMessage, ServerMessage};
use crate::domain::registry::{SessionChannel, SessionHandle};
use crate::domain::session::{ConnectionClass, Session};
use crate::error::GatewayError;
use crate::metrics;

use super::routes::AppState;

/// 连接初始化参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// `GET /ws` 升级入口
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// 身份校验：merchantId 必填，空串视同缺失
fn validate_identity(params: ConnectQuery) -> Result<(String, Option<String>), GatewayError> {
    let merchant_id = params
        .merchant_id
        .filter(|m| !m.is_empty())
        .ok_or(GatewayError::MissingParameter("merchantId"))?;
    Ok((merchant_id, params.device_id.filter(|d| !d.is_empty())))
}

async fn handle_socket(mut socket: WebSocket, params: ConnectQuery, state: AppState) {
    // 身份校验失败即策略违规，诊断 + 关闭，不注册
    let Ok((merchant_id, device_id)) = validate_identity(params) else {
        metrics::connections()
            .accepted_total
            .with_label_values(&["unknown", "rejected"])
            .inc();
        warn!("Connection rejected: missing merchantId");

        let diagnostic = ServerMessage::error(
            "MERCHANT_ID_REQUIRED",
            GatewayError::MissingParameter("merchantId").to_string(),
        );
        if let Ok(json) = serde_json::to_string(&diagnostic) {
            let _ = socket.send(Message::Text(json)).await;
        }
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "merchantId required".into(),
            })))
            .await;
        return;
    };

    let session = Session::new(merchant_id, device_id);
    let connection_id = session.connection_id.clone();
    let (channel, rx) = SessionChannel::new();
    state
        .registry
        .insert(SessionHandle {
            session: session.clone(),
            channel,
        })
        .await;

    metrics::connections()
        .accepted_total
        .with_label_values(&[session.class.as_str(), "accepted"])
        .inc();
    info!(
        %connection_id,
        merchant_id = %session.merchant_id,
        device_id = ?session.device_id,
        class = ?session.class,
        "✅ Connection accepted"
    );

    // 欢迎消息在进入循环前直发，保证是该连接收到的第一条
    let welcome = ServerMessage::welcome(
        &connection_id,
        &session.merchant_id,
        session.device_id.as_deref(),
    );
    if let Ok(json) = serde_json::to_string(&welcome) {
        if socket.send(Message::Text(json)).await.is_err() {
            state.registry.remove(&connection_id).await;
            return;
        }
    }

    run_session_loop(socket, rx, &session, &state).await;

    // 幂等移除：心跳驱逐在前时这里是空操作
    state.registry.remove(&connection_id).await;
    info!(%connection_id, "🔌 Connection closed");
}

/// 单连接事件循环
async fn run_session_loop(
    socket: WebSocket,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    session: &Session,
    state: &AppState,
) {
    let (mut ws_tx, mut ws_rx): (SplitSink<WebSocket, Message>, SplitStream<WebSocket>) =
        socket.split();
    let connection_id = &session.connection_id;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => {
                    if !send_json(&mut ws_tx, &message).await {
                        debug!(%connection_id, "Outbound send failed, closing loop");
                        break;
                    }
                }
                // 发送端（注册表）已放弃该会话：主动关闭传输
                None => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "connection retired".into(),
                        })))
                        .await;
                    break;
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&text, session, &mut ws_tx, state).await;
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws_tx.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // 二进制帧与传输层 Pong 均无应用语义
                }
                Some(Err(err)) => {
                    debug!(error = %err, %connection_id, "WebSocket transport error");
                    break;
                }
            }
        }
    }
}

/// 入站应用消息分发
///
/// 畸形载荷与未识别类型都只记日志，连接保持打开。
async fn handle_client_message(
    text: &str,
    session: &Session,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
) {
    let connection_id = &session.connection_id;
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, %connection_id, "Ignoring malformed client message");
            return;
        }
    };

    // 任何入站消息（含心跳应答与未识别类型）都刷新活跃时间
    state.registry.touch(connection_id).await;

    match message {
        ClientMessage::Ping { .. } => {
            send_json(ws_tx, &ServerMessage::pong()).await;
        }
        ClientMessage::Pong { .. } => {
            // 对服务端探测的应答：只刷新活跃时间，已在上面完成
        }
        ClientMessage::ApproveTransaction {
            transaction_id,
            authorization_code,
        } => {
            if session.class != ConnectionClass::Device {
                debug!(%connection_id, "APPROVE_TRANSACTION from non-device connection, ignoring");
                return;
            }
            let Some(handle) = state.registry.get(connection_id).await else {
                return;
            };
            if let Err(err) = state
                .store
                .approve_from_device(&transaction_id, authorization_code, &handle)
                .await
            {
                reply_device_error(ws_tx, &transaction_id, err).await;
            }
        }
        ClientMessage::DeclineTransaction { transaction_id } => {
            if session.class != ConnectionClass::Device {
                debug!(%connection_id, "DECLINE_TRANSACTION from non-device connection, ignoring");
                return;
            }
            let Some(handle) = state.registry.get(connection_id).await else {
                return;
            };
            if let Err(err) = state
                .store
                .decline_from_device(&transaction_id, &handle)
                .await
            {
                reply_device_error(ws_tx, &transaction_id, err).await;
            }
        }
        ClientMessage::Unknown => {
            debug!(%connection_id, "Ignoring unrecognized message type");
        }
    }
}

/// 未知交易等业务错误只回给发起的设备，不改任何状态
async fn reply_device_error(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    transaction_id: &str,
    err: GatewayError,
) {
    let code = match &err {
        GatewayError::UnknownTransaction(_) => "UNKNOWN_TRANSACTION",
        GatewayError::InvalidTransactionState { .. } => "TRANSACTION_NOT_PENDING",
        _ => "PROCESSING_FAILED",
    };
    debug!(%transaction_id, error = %err, "Device transaction command rejected");
    send_json(ws_tx, &ServerMessage::error(code, err.to_string())).await;
}

/// 序列化并发送；失败返回 false（由调用方决定是否退出循环）
async fn send_json(ws_tx: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => ws_tx.send(Message::Text(json)).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "Failed to serialize outbound message");
            true
        }
    }
}
