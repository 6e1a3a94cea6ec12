use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard, RwLock, broadcast};
use tracing::{debug, info};
use whiteboard_core::BoardId;

/// A broadcast frame: the message plus the client it originated from, so
/// receivers can drop their own events (broadcasts go to the rest of the
/// board, not back to the sender).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub origin: String,
    pub message: ServerMessage,
}

/// Statistics about the realtime state
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub active_connections: usize,
    pub active_boards: usize,
}

/// Global registry of live board rooms
pub struct BoardRegistry {
    rooms: RwLock<HashMap<BoardId, Arc<BoardRoom>>>,
}

impl Default for BoardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the room for a board
    pub async fn get_or_create_room(&self, board_id: &str) -> Arc<BoardRoom> {
        // Check if the room exists
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(board_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;

        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(board_id) {
            return room.clone();
        }

        let room = Arc::new(BoardRoom::new(board_id));
        rooms.insert(board_id.to_string(), room.clone());
        info!(board_id, "Created board room");

        room
    }

    /// Remove a room if it has no active connections
    pub async fn maybe_remove_room(&self, board_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(board_id) {
            if room.connection_count() == 0 {
                rooms.remove(board_id);
                info!(board_id, "Removed idle board room");
            }
        }
    }

    /// Get statistics about the realtime state
    pub async fn stats(&self) -> SyncStats {
        let rooms = self.rooms.read().await;
        SyncStats {
            active_connections: rooms.values().map(|room| room.connection_count()).sum(),
            active_boards: rooms.len(),
        }
    }
}

/// The realtime state of one board: the broadcast channel its members
/// listen on and the guard that serializes document mutations.
pub struct BoardRoom {
    board_id: BoardId,
    broadcast_tx: broadcast::Sender<Outbound>,
    connection_count: AtomicUsize,
    /// Serializes every read-modify-write of the board document (append,
    /// undo, redo, compaction, reset). One board is one serialization
    /// domain; concurrent edits from different clients queue here instead
    /// of racing on sequence assignment.
    doc_guard: Mutex<()>,
}

impl BoardRoom {
    pub fn new(board_id: &str) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            board_id: board_id.to_string(),
            broadcast_tx,
            connection_count: AtomicUsize::new(0),
            doc_guard: Mutex::new(()),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Subscribe to room broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.connection_count.fetch_add(1, Ordering::SeqCst);
        self.broadcast_tx.subscribe()
    }

    /// Unsubscribe from room broadcasts
    pub fn unsubscribe(&self) {
        self.connection_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Take the board's document guard for a read-modify-write sequence.
    pub async fn lock_document(&self) -> MutexGuard<'_, ()> {
        self.doc_guard.lock().await
    }

    /// Fire-and-forget broadcast to the board's members. At-most-once: a
    /// send with no subscribers or a lagged receiver drops frames.
    pub fn broadcast(&self, origin: &str, message: ServerMessage) {
        let _ = self.broadcast_tx.send(Outbound {
            origin: origin.to_string(),
            message,
        });
        debug!(board_id = %self.board_id, origin, "Broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_the_same_room() {
        let registry = BoardRegistry::new();

        let a = registry.get_or_create_room("b1").await;
        let b = registry.get_or_create_room("b1").await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get_or_create_room("b2").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn idle_rooms_are_removed_busy_rooms_kept() {
        let registry = BoardRegistry::new();

        let room = registry.get_or_create_room("b1").await;
        let _rx = room.subscribe();
        registry.maybe_remove_room("b1").await;
        assert_eq!(registry.stats().await.active_boards, 1);

        room.unsubscribe();
        registry.maybe_remove_room("b1").await;
        assert_eq!(registry.stats().await.active_boards, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_with_origin() {
        let room = BoardRoom::new("b1");
        let mut rx = room.subscribe();

        room.broadcast("c1", ServerMessage::ack_success());
        let out = rx.recv().await.unwrap();
        assert_eq!(out.origin, "c1");
        room.unsubscribe();
    }
}
