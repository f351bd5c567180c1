//! QRIS 实时交易通知网关
//!
//! 接收银行/Switch 的授权回调，将交易事件实时推送到商户侧的
//! 在线连接（商户看板与收银终端设备），并统一管理连接生命周期
//! （身份、心跳、年龄上限驱逐）。

pub mod config;
pub mod domain;
pub mod error;
pub mod interface;
pub mod metrics;
pub mod service;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use service::ApplicationBootstrap;
