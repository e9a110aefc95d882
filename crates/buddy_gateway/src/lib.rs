pub mod server;
pub mod types;

pub use server::{AppState, GatewayServer};
pub use types::{ApiError, ChatRequest};
