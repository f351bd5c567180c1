pub mod connection;
pub mod routes;

pub use routes::{AppState, router};
