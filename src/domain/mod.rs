pub mod message;
pub mod registry;
pub mod service;
pub mod session;
pub mod transaction;

pub use message::{ClientMessage, ServerMessage};
pub use registry::{ConnectionRegistry, SessionChannel, SessionHandle};
pub use session::{ConnectionClass, Session};
pub use transaction::{
    SettlementStatus, SwitchCallback, Transaction, TransactionStatus, map_response_code,
};
