//! Wire messages for the realtime channel.
//!
//! Every frame is JSON with an `event` name and an optional `data`
//! payload, mirroring the event inventory the drawing clients speak.
//! Handler results are acknowledged with an [`ServerMessage::Ack`];
//! handler errors never close the connection.

use crate::locks::LockHolder;
use crate::registry::ActiveUser;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use whiteboard_core::{DeltaInput, ShapeId, ShapePayload, UserId};

/// Messages a client sends to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinBoard { board_id: String },
    LeaveBoard,
    BoardUpdate(DeltaInput),
    SelectShape { shape_id: ShapeId },
    LockShape { shape_id: ShapeId },
    UnlockShape { shape_id: ShapeId },
    ActiveUsers,
    MouseMove { x: f64, y: f64 },
    /// Whole-board ephemeral payload relayed verbatim, not persisted.
    BoardChange { payload: serde_json::Value },
    Undo,
    Redo,
    CreateSnapshot,
    ResetBoard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

/// Messages the gateway sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Replayed current state, pushed to a joining client and broadcast
    /// after every accepted mutation.
    BoardState {
        shapes: HashMap<ShapeId, ShapePayload>,
    },
    /// Lock map pushed to a joining client.
    CurrentlyLockedShapes {
        locks: HashMap<ShapeId, LockHolder>,
    },
    UserJoined {
        client_id: String,
        user_id: UserId,
        username: String,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        client_id: String,
        user_id: UserId,
        username: String,
    },
    BoardUpdate {
        shapes: HashMap<ShapeId, ShapePayload>,
    },
    LockedNewShape {
        shape_id: ShapeId,
        lock_user: LockHolder,
    },
    UnlockShape {
        shape_id: ShapeId,
    },
    ActiveUsers {
        users: Vec<ActiveUser>,
    },
    MouseMove {
        x: f64,
        y: f64,
        client_id: String,
        user_id: UserId,
    },
    UpdatedBoard {
        payload: serde_json::Value,
    },
    Ack {
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerMessage {
    pub fn ack_success() -> Self {
        ServerMessage::Ack {
            status: AckStatus::Success,
            message: None,
        }
    }

    pub fn ack_error(message: impl Into<String>) -> Self {
        ServerMessage::Ack {
            status: AckStatus::Error,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use whiteboard_core::DeltaOperation;

    #[test]
    fn client_messages_use_event_and_data() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "joinBoard",
            "data": { "boardId": "b1" }
        }))
        .unwrap();
        assert!(matches!(msg, ClientMessage::JoinBoard { board_id } if board_id == "b1"));

        // Unit events carry no data member at all.
        let msg: ClientMessage = serde_json::from_value(json!({ "event": "leaveBoard" })).unwrap();
        assert!(matches!(msg, ClientMessage::LeaveBoard));

        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "boardUpdate",
            "data": { "operation": "update", "shapeId": "r1", "data": { "x": 5 } }
        }))
        .unwrap();
        match msg {
            ClientMessage::BoardUpdate(input) => {
                assert_eq!(input.operation, DeltaOperation::Update);
                assert_eq!(input.shape_id, "r1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn server_messages_serialize_camel_case() {
        let msg = ServerMessage::LockedNewShape {
            shape_id: "r1".to_string(),
            lock_user: LockHolder {
                uid: "u1".to_string(),
                username: "alice".to_string(),
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "lockedNewShape");
        assert_eq!(value["data"]["shapeId"], "r1");
        assert_eq!(value["data"]["lockUser"]["uid"], "u1");
    }

    #[test]
    fn success_ack_omits_message() {
        let value = serde_json::to_value(ServerMessage::ack_success()).unwrap();
        assert_eq!(value, json!({ "event": "ack", "data": { "status": "success" } }));

        let value = serde_json::to_value(ServerMessage::ack_error("nothing to undo")).unwrap();
        assert_eq!(value["data"]["status"], "error");
        assert_eq!(value["data"]["message"], "nothing to undo");
    }
}
