use crate::document::{
    BoardDocument, Delta, DeltaInput, DeltaOperation, ShapeId, ShapePayload, Snapshot,
};
use crate::error::{BoardError, Result};
use crate::repo::DocumentRepository;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The document state machine: append, replay, undo/redo, compaction.
///
/// Stateless over the repository — every operation re-reads the document
/// it addresses, so the repository stays the single source of truth per
/// board. Callers serialize the read-modify-write operations per board
/// (the sync server routes them through one per-board guard); the engine
/// itself holds no locks.
///
/// Undo is modeled as a sequence-pointer rewind: the pointer moves, the
/// log is untouched, and replay excludes deltas past the pointer. The
/// inverse-delta helpers ([`DeltaEngine::inverse_delta`],
/// [`DeltaEngine::last_user_delta`]) exist for user-scoped inversion but
/// are never used as a second undo mechanism.
pub struct DeltaEngine {
    documents: Arc<dyn DocumentRepository>,
}

impl DeltaEngine {
    pub fn new(documents: Arc<dyn DocumentRepository>) -> Self {
        Self { documents }
    }

    async fn fetch(&self, board_id: &str) -> Result<BoardDocument> {
        self.documents
            .get(board_id)
            .await?
            .ok_or_else(|| BoardError::NotFound(board_id.to_string()))
    }

    /// Append a delta to the board's log and return the recomputed state.
    ///
    /// Assigns `sequence = document.sequence + 1`. Appending while undone
    /// deltas are pending discards them — new edits overwrite the redo
    /// branch, keeping sequence numbers unique per document.
    pub async fn append_delta(
        &self,
        board_id: &str,
        input: DeltaInput,
        author: &str,
    ) -> Result<HashMap<ShapeId, ShapePayload>> {
        let mut doc = self.fetch(board_id).await?;

        // Pre-image of the shape, captured so an Update can be inverted.
        let previous_data = match input.operation {
            DeltaOperation::Update => Self::current_state(&doc).remove(&input.shape_id),
            _ => None,
        };

        doc.deltas.retain(|delta| delta.sequence <= doc.sequence);

        let next_seq = doc.sequence + 1;
        let delta = Delta {
            operation: input.operation,
            shape_id: input.shape_id,
            data: input.data,
            previous_data,
            author: author.to_string(),
            sequence: next_seq,
            timestamp: Utc::now(),
        };
        debug!(board_id, sequence = next_seq, shape_id = %delta.shape_id, "Delta appended");

        doc.deltas.push(delta);
        doc.sequence = next_seq;
        self.documents.save(&doc).await?;

        Ok(Self::current_state(&doc))
    }

    /// Replay the visible delta log over the snapshot.
    ///
    /// Deterministic and independent of storage order: only deltas with
    /// `sequence <= document.sequence` participate, folded in ascending
    /// sequence order. Create inserts, Update shallow-merges into an
    /// existing entry (silently ignored otherwise), Delete removes
    /// unconditionally.
    pub fn current_state(doc: &BoardDocument) -> HashMap<ShapeId, ShapePayload> {
        let mut state = doc.snapshot.shapes.clone();

        let mut visible: Vec<&Delta> = doc
            .deltas
            .iter()
            .filter(|delta| delta.sequence <= doc.sequence)
            .collect();
        visible.sort_by_key(|delta| delta.sequence);

        for delta in visible {
            match delta.operation {
                DeltaOperation::Create => {
                    state.insert(
                        delta.shape_id.clone(),
                        delta.data.clone().unwrap_or_default(),
                    );
                }
                DeltaOperation::Update => {
                    if let Some(shape) = state.get_mut(&delta.shape_id) {
                        if let Some(data) = &delta.data {
                            for (key, value) in data {
                                shape.insert(key.clone(), value.clone());
                            }
                        }
                    }
                }
                DeltaOperation::Delete => {
                    state.remove(&delta.shape_id);
                }
            }
        }

        state
    }

    /// Fetch the document and replay its current state.
    pub async fn board_state(&self, board_id: &str) -> Result<HashMap<ShapeId, ShapePayload>> {
        let doc = self.fetch(board_id).await?;
        Ok(Self::current_state(&doc))
    }

    /// Rewind the sequence pointer past the most recently visible delta.
    ///
    /// The delta is not removed from the log; it merely becomes invisible
    /// to replay, and [`DeltaEngine::redo`] can bring it back. Returns the
    /// delta that became invisible.
    pub async fn undo(&self, board_id: &str) -> Result<Delta> {
        let mut doc = self.fetch(board_id).await?;

        if doc.sequence < 1 {
            return Err(BoardError::BadRequest("nothing to undo".into()));
        }
        let undone = doc
            .deltas
            .iter()
            .find(|delta| delta.sequence == doc.sequence)
            .cloned()
            .ok_or_else(|| BoardError::BadRequest("nothing to undo".into()))?;

        doc.sequence -= 1;
        self.documents.save(&doc).await?;
        debug!(board_id, sequence = doc.sequence, "Undo");

        Ok(undone)
    }

    /// Advance the sequence pointer over the next undone delta.
    pub async fn redo(&self, board_id: &str) -> Result<Delta> {
        let mut doc = self.fetch(board_id).await?;

        let redone = doc
            .deltas
            .iter()
            .filter(|delta| delta.sequence > doc.sequence)
            .min_by_key(|delta| delta.sequence)
            .cloned()
            .ok_or_else(|| BoardError::BadRequest("nothing to redo".into()))?;

        doc.sequence = redone.sequence;
        self.documents.save(&doc).await?;
        debug!(board_id, sequence = doc.sequence, "Redo");

        Ok(redone)
    }

    /// Compact the board: fold the visible log into the snapshot and clear
    /// the delta log.
    ///
    /// Replayed state is unchanged, but any undone deltas past the
    /// sequence pointer are discarded with the log — compaction destroys
    /// redo history.
    pub async fn create_snapshot(&self, board_id: &str) -> Result<HashMap<ShapeId, ShapePayload>> {
        let mut doc = self.fetch(board_id).await?;

        let state = Self::current_state(&doc);
        doc.snapshot = Snapshot {
            shapes: state.clone(),
            version: doc.sequence,
        };
        doc.deltas.clear();
        self.documents.save(&doc).await?;
        info!(board_id, version = doc.sequence, "Snapshot created");

        Ok(state)
    }

    /// Most recently appended delta authored by `user_id`, by insertion
    /// order. Drives user-scoped inverse-delta construction.
    pub async fn last_user_delta(&self, board_id: &str, user_id: &str) -> Result<Option<Delta>> {
        let doc = self.fetch(board_id).await?;
        Ok(doc
            .deltas
            .iter()
            .rev()
            .find(|delta| delta.author == user_id)
            .cloned())
    }

    /// The delta that would cancel `delta` out: Create becomes Delete,
    /// Delete becomes Create with the original payload, Update becomes an
    /// Update carrying the captured pre-image.
    pub fn inverse_delta(delta: &Delta) -> Delta {
        let mut inverse = delta.clone();
        match delta.operation {
            DeltaOperation::Create => {
                inverse.operation = DeltaOperation::Delete;
                inverse.data = None;
            }
            DeltaOperation::Delete => {
                inverse.operation = DeltaOperation::Create;
                inverse.data = delta.data.clone();
            }
            DeltaOperation::Update => {
                inverse.data = delta.previous_data.clone();
                inverse.previous_data = delta.data.clone();
            }
        }
        inverse
    }

    /// Wipe the board back to its initial empty state. Irrecoverable;
    /// callers restrict this to the document owner.
    pub async fn reset_board(&self, board_id: &str) -> Result<()> {
        let mut doc = self.fetch(board_id).await?;

        doc.snapshot = Snapshot::default();
        doc.deltas.clear();
        doc.sequence = 0;
        self.documents.save(&doc).await?;
        info!(board_id, "Board reset");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> ShapePayload {
        value.as_object().expect("object payload").clone()
    }

    fn input(operation: DeltaOperation, shape_id: &str, data: Option<serde_json::Value>) -> DeltaInput {
        DeltaInput {
            operation,
            shape_id: shape_id.to_string(),
            data: data.map(payload),
        }
    }

    async fn engine_with_board(board_id: &str) -> (DeltaEngine, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        repo.create(BoardDocument::new(board_id, "owner", "test board"))
            .await
            .unwrap();
        (DeltaEngine::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn missing_board_is_not_found() {
        let repo = Arc::new(MemoryRepository::new());
        let engine = DeltaEngine::new(repo);

        let err = engine
            .append_delta("ghost", input(DeltaOperation::Create, "r1", Some(json!({}))), "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::NotFound(_)));
        assert!(matches!(engine.undo("ghost").await.unwrap_err(), BoardError::NotFound(_)));
    }

    #[tokio::test]
    async fn example_scenario_append_undo_redo() {
        // The canonical walk-through: create, update, undo, redo.
        let (engine, repo) = engine_with_board("b1").await;

        let state = engine
            .append_delta(
                "b1",
                input(DeltaOperation::Create, "r1", Some(json!({"x": 0, "y": 0}))),
                "u1",
            )
            .await
            .unwrap();
        assert_eq!(state["r1"], payload(json!({"x": 0, "y": 0})));

        let state = engine
            .append_delta(
                "b1",
                input(DeltaOperation::Update, "r1", Some(json!({"x": 5}))),
                "u1",
            )
            .await
            .unwrap();
        assert_eq!(state["r1"], payload(json!({"x": 5, "y": 0})));
        assert_eq!(repo.get("b1").await.unwrap().unwrap().sequence, 2);

        let undone = engine.undo("b1").await.unwrap();
        assert_eq!(undone.sequence, 2);
        let state = engine.board_state("b1").await.unwrap();
        assert_eq!(state["r1"], payload(json!({"x": 0, "y": 0})));

        let redone = engine.redo("b1").await.unwrap();
        assert_eq!(redone.sequence, 2);
        let state = engine.board_state("b1").await.unwrap();
        assert_eq!(state["r1"], payload(json!({"x": 5, "y": 0})));
        assert_eq!(repo.get("b1").await.unwrap().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn replay_is_invariant_under_storage_order() {
        let (engine, repo) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "a", Some(json!({"x": 1}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Create, "b", Some(json!({"x": 2}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Update, "a", Some(json!({"x": 9}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Delete, "b", None), "u1")
            .await
            .unwrap();

        let mut doc = repo.get("b1").await.unwrap().unwrap();
        let expected = DeltaEngine::current_state(&doc);

        // Permute the storage order; sequence numbers still decide the fold.
        doc.deltas.reverse();
        assert_eq!(DeltaEngine::current_state(&doc), expected);
        doc.deltas.swap(0, 2);
        assert_eq!(DeltaEngine::current_state(&doc), expected);

        assert_eq!(expected.get("a"), Some(&payload(json!({"x": 9}))));
        assert!(!expected.contains_key("b"));
    }

    #[tokio::test]
    async fn update_of_missing_shape_is_silently_ignored() {
        let (engine, _) = engine_with_board("b1").await;

        let state = engine
            .append_delta("b1", input(DeltaOperation::Update, "ghost", Some(json!({"x": 1}))), "u1")
            .await
            .unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn undo_and_redo_have_boundaries() {
        let (engine, _) = engine_with_board("b1").await;

        let err = engine.undo("b1").await.unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(ref msg) if msg == "nothing to undo"));
        let err = engine.redo("b1").await.unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(ref msg) if msg == "nothing to redo"));

        engine
            .append_delta("b1", input(DeltaOperation::Create, "r1", Some(json!({}))), "u1")
            .await
            .unwrap();
        engine.undo("b1").await.unwrap();
        // Pointer at zero again; the log top is the only redo candidate.
        assert!(engine.undo("b1").await.is_err());
        engine.redo("b1").await.unwrap();
        assert!(engine.redo("b1").await.is_err());
    }

    #[tokio::test]
    async fn append_after_undo_discards_redo_branch() {
        let (engine, repo) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "r1", Some(json!({"x": 0}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Update, "r1", Some(json!({"x": 5}))), "u1")
            .await
            .unwrap();
        engine.undo("b1").await.unwrap();

        // A fresh edit claims sequence 2; the undone update is gone.
        engine
            .append_delta("b1", input(DeltaOperation::Update, "r1", Some(json!({"y": 7}))), "u2")
            .await
            .unwrap();

        let doc = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(doc.sequence, 2);
        let sequences: Vec<u64> = doc.deltas.iter().map(|d| d.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(engine.redo("b1").await.is_err());

        let state = DeltaEngine::current_state(&doc);
        assert_eq!(state["r1"], payload(json!({"x": 0, "y": 7})));
    }

    #[tokio::test]
    async fn compaction_is_transparent_and_clears_the_log() {
        let (engine, repo) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "r1", Some(json!({"x": 1}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Update, "r1", Some(json!({"x": 2}))), "u1")
            .await
            .unwrap();

        let before = engine.board_state("b1").await.unwrap();
        let compacted = engine.create_snapshot("b1").await.unwrap();
        let after = engine.board_state("b1").await.unwrap();
        assert_eq!(before, compacted);
        assert_eq!(before, after);

        let doc = repo.get("b1").await.unwrap().unwrap();
        assert!(doc.deltas.is_empty());
        assert_eq!(doc.snapshot.version, doc.sequence);
    }

    #[tokio::test]
    async fn compaction_discards_redo_history() {
        let (engine, _) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "r1", Some(json!({}))), "u1")
            .await
            .unwrap();
        engine.undo("b1").await.unwrap();
        engine.create_snapshot("b1").await.unwrap();

        assert!(engine.redo("b1").await.is_err());
    }

    #[tokio::test]
    async fn last_user_delta_picks_latest_by_author() {
        let (engine, _) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "a", Some(json!({}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Create, "b", Some(json!({}))), "u2")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Update, "a", Some(json!({"x": 1}))), "u1")
            .await
            .unwrap();

        let last = engine.last_user_delta("b1", "u1").await.unwrap().unwrap();
        assert_eq!(last.sequence, 3);
        assert_eq!(last.shape_id, "a");
        assert!(engine.last_user_delta("b1", "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inverse_delta_cancels_each_operation() {
        let (engine, repo) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "r1", Some(json!({"x": 1, "y": 2}))), "u1")
            .await
            .unwrap();
        engine
            .append_delta("b1", input(DeltaOperation::Update, "r1", Some(json!({"x": 8}))), "u1")
            .await
            .unwrap();

        let doc = repo.get("b1").await.unwrap().unwrap();
        let update = doc.deltas.last().unwrap();
        // The pre-image was captured at append time.
        assert_eq!(update.previous_data, Some(payload(json!({"x": 1, "y": 2}))));

        let inverse = DeltaEngine::inverse_delta(update);
        assert_eq!(inverse.operation, DeltaOperation::Update);
        assert_eq!(inverse.data, Some(payload(json!({"x": 1, "y": 2}))));

        let create = &doc.deltas[0];
        let inverse = DeltaEngine::inverse_delta(create);
        assert_eq!(inverse.operation, DeltaOperation::Delete);
        assert!(inverse.data.is_none());

        let delete = Delta {
            operation: DeltaOperation::Delete,
            data: Some(payload(json!({"x": 8, "y": 2}))),
            ..create.clone()
        };
        let inverse = DeltaEngine::inverse_delta(&delete);
        assert_eq!(inverse.operation, DeltaOperation::Create);
        assert_eq!(inverse.data, Some(payload(json!({"x": 8, "y": 2}))));
    }

    #[tokio::test]
    async fn reset_board_reinitializes_everything() {
        let (engine, repo) = engine_with_board("b1").await;

        engine
            .append_delta("b1", input(DeltaOperation::Create, "r1", Some(json!({"x": 1}))), "u1")
            .await
            .unwrap();
        engine.create_snapshot("b1").await.unwrap();
        engine.reset_board("b1").await.unwrap();

        let doc = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(doc.sequence, 0);
        assert!(doc.deltas.is_empty());
        assert!(doc.snapshot.shapes.is_empty());
        assert_eq!(doc.snapshot.version, 0);
    }
}
