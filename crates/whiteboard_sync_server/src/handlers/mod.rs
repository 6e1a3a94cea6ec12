pub mod ws;

pub use ws::{GatewayState, ws_handler};
