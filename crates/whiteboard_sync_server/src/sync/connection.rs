use super::BoardRoom;
use crate::protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A client's membership in one board room.
///
/// Subscribes on creation and unsubscribes on drop, so the room's
/// connection count always matches the set of live memberships.
pub struct ClientConnection {
    client_id: String,
    room: Arc<BoardRoom>,
    broadcast_rx: broadcast::Receiver<super::Outbound>,
}

impl ClientConnection {
    pub fn new(client_id: String, room: Arc<BoardRoom>) -> Self {
        let broadcast_rx = room.subscribe();
        Self {
            client_id,
            room,
            broadcast_rx,
        }
    }

    pub fn room(&self) -> &Arc<BoardRoom> {
        &self.room
    }

    pub fn board_id(&self) -> &str {
        self.room.board_id()
    }

    /// Receive the next broadcast from other clients in the board.
    ///
    /// The client's own frames are filtered out (broadcasts address the
    /// rest of the board). A lagged receiver skips the missed frames:
    /// broadcasts are at-most-once and the next `boardUpdate` carries the
    /// full recomputed state anyway. `None` means the room is gone.
    pub async fn recv_broadcast(&mut self) -> Option<ServerMessage> {
        loop {
            match self.broadcast_rx.recv().await {
                Ok(out) if out.origin == self.client_id => continue,
                Ok(out) => return Some(out.message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        client_id = %self.client_id,
                        board_id = %self.room.board_id(),
                        skipped = n,
                        "Client lagged behind board broadcasts"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.room.unsubscribe();
        debug!(
            client_id = %self.client_id,
            board_id = %self.room.board_id(),
            "Client connection dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn own_frames_are_filtered_out() {
        let room = Arc::new(BoardRoom::new("b1"));
        let mut conn = ClientConnection::new("c1".to_string(), room.clone());

        room.broadcast("c1", ServerMessage::ack_error("mine"));
        room.broadcast("c2", ServerMessage::ack_error("theirs"));

        let msg = conn.recv_broadcast().await.unwrap();
        match msg {
            ServerMessage::Ack { message, .. } => assert_eq!(message.as_deref(), Some("theirs")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn drop_releases_the_room_slot() {
        let room = Arc::new(BoardRoom::new("b1"));
        let conn = ClientConnection::new("c1".to_string(), room.clone());
        assert_eq!(room.connection_count(), 1);
        drop(conn);
        assert_eq!(room.connection_count(), 0);
    }
}
