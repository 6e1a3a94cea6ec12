//! Whiteboard Core
//!
//! Document model and delta engine for the collaborative whiteboard.
//!
//! A board document is an append-only log of shape deltas on top of a
//! compacted snapshot. The [`engine::DeltaEngine`] owns every mutation of
//! that model (append, replay, undo/redo, compaction) and talks to
//! persistence only through the abstract [`repo::DocumentRepository`]
//! trait, keeping a single source of truth per board.

/// Board document, delta and collaborator types
pub mod document;

/// Delta engine (append, replay, undo/redo, compaction)
pub mod engine;

/// Error (common error types)
pub mod error;

/// Repository traits and the in-memory backend
pub mod repo;

pub use document::{
    AccessMode, BoardDocument, BoardId, CollaboratorRole, CollaboratorStatus, Delta, DeltaInput,
    DeltaOperation, ShapeId, ShapePayload, Snapshot, UserId,
};
pub use engine::DeltaEngine;
pub use error::{BoardError, Result};
pub use repo::{CollaboratorStore, DocumentRepository, MemoryRepository};
