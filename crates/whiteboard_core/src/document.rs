use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Board identifier
pub type BoardId = String;
/// Shape identifier (client-assigned, embedded in deltas)
pub type ShapeId = String;
/// User identifier
pub type UserId = String;

/// Opaque shape payload. The engine never interprets its contents beyond
/// shallow-merging fields on Update and removing the entry on Delete;
/// shape-specific meaning lives entirely client-side.
pub type ShapePayload = serde_json::Map<String, serde_json::Value>;

/// The three atomic shape operations a delta can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOperation {
    Create,
    Update,
    Delete,
}

/// One atomic change to a shape, tagged with a monotonically assigned
/// sequence number. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub operation: DeltaOperation,
    pub shape_id: ShapeId,
    /// Payload for Create/Update; absent for Delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ShapePayload>,
    /// Pre-image captured at append time, needed to invert an Update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_data: Option<ShapePayload>,
    pub author: UserId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// The client-supplied portion of a delta (the `boardUpdate` payload).
/// Author, sequence and timestamp are assigned by the engine at append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaInput {
    pub operation: DeltaOperation,
    pub shape_id: ShapeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ShapePayload>,
}

/// Compacted base state plus the sequence at which it was taken. Deltas
/// appended after `version` extend it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub shapes: HashMap<ShapeId, ShapePayload>,
    pub version: u64,
}

/// Who may open a board without an explicit collaborator entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Private,
    Public,
}

/// What a collaborator may do on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorRole {
    View,
    Edit,
}

/// Whether a collaborator is currently joined to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorStatus {
    Active,
    Inactive,
}

/// A board document: compacted snapshot, append-only delta log and the
/// sequence pointer that decides which deltas are visible during replay.
///
/// Invariants: `sequence` is monotonically non-decreasing across the
/// document's lifetime and `deltas` is ordered by `Delta::sequence`
/// ascending. Deltas with `sequence > self.sequence` exist transiently
/// after an undo; replay excludes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDocument {
    pub id: BoardId,
    pub owner_id: UserId,
    pub title: String,
    pub access_mode: AccessMode,
    pub collaborator_ids: HashSet<UserId>,
    pub snapshot: Snapshot,
    pub deltas: Vec<Delta>,
    pub sequence: u64,
}

impl BoardDocument {
    /// Create an empty board owned by `owner_id`.
    pub fn new(
        id: impl Into<BoardId>,
        owner_id: impl Into<UserId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            access_mode: AccessMode::Private,
            collaborator_ids: HashSet::new(),
            snapshot: Snapshot::default(),
            deltas: Vec::new(),
            sequence: 0,
        }
    }
}
