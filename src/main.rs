//! QRIS 实时交易通知网关服务入口
//!
//! 职责：
//! 1. **客户端连接接入** - 维护商户看板与收银终端的 WebSocket 长连接
//! 2. **交易事件扇出** - 接收银行/Switch 授权回调，按商户实时推送
//! 3. **心跳检测** - 应用层探测、失效清理与连接年龄上限驱逐
//! 4. **清算定时** - 授权通过的交易在固定延迟后完成清算并二次通知

use qris_notify_gateway::ApplicationBootstrap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ApplicationBootstrap::run().await
}
