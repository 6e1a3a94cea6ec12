mod connection;
mod room;

pub use connection::ClientConnection;
pub use room::{BoardRegistry, BoardRoom, Outbound, SyncStats};
