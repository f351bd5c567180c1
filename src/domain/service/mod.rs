pub mod heartbeat;
pub mod lifecycle;
pub mod notifier;

mod notifier_test;

pub use heartbeat::HeartbeatSupervisor;
pub use lifecycle::{SettlementScheduler, TransactionStore};
pub use notifier::{DeliveryResult, EventNotifier};
