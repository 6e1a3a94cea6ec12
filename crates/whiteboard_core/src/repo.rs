use crate::document::{BoardDocument, BoardId, CollaboratorRole, CollaboratorStatus, UserId};
use crate::error::{BoardError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Abstract persistence for board documents. The durable backend lives
/// outside this crate; the engine only ever reads and writes whole
/// documents through this trait.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Fetch a document by id; `Ok(None)` when absent.
    async fn get(&self, board_id: &str) -> Result<Option<BoardDocument>>;

    /// Persist the full document, replacing the stored copy.
    async fn save(&self, document: &BoardDocument) -> Result<()>;

    /// Insert a new document.
    async fn create(&self, document: BoardDocument) -> Result<()>;

    /// Remove a document.
    async fn delete(&self, board_id: &str) -> Result<()>;
}

/// Collaborator roles and presence status, owned by the repository side.
/// The core only reads the role for authorization and writes status
/// transitions on join/leave.
#[async_trait]
pub trait CollaboratorStore: Send + Sync {
    /// Role of `user_id` on the board, if they are a collaborator.
    async fn role(&self, board_id: &str, user_id: &str) -> Result<Option<CollaboratorRole>>;

    /// Record an active/inactive transition (with `last_seen = now`).
    async fn set_status(
        &self,
        board_id: &str,
        user_id: &str,
        status: CollaboratorStatus,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
struct CollaboratorRecord {
    role: CollaboratorRole,
    status: CollaboratorStatus,
    last_seen: DateTime<Utc>,
}

/// In-memory implementation of both repository traits. Used by the server
/// when no durable backend is configured and by every test.
#[derive(Default)]
pub struct MemoryRepository {
    documents: RwLock<HashMap<BoardId, BoardDocument>>,
    collaborators: RwLock<HashMap<(BoardId, UserId), CollaboratorRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collaborator with the given role (inactive until joined).
    pub async fn add_collaborator(&self, board_id: &str, user_id: &str, role: CollaboratorRole) {
        let mut collaborators = self.collaborators.write().await;
        collaborators.insert(
            (board_id.to_string(), user_id.to_string()),
            CollaboratorRecord {
                role,
                status: CollaboratorStatus::Inactive,
                last_seen: Utc::now(),
            },
        );
    }

    /// Current status of a collaborator, if any (used by tests).
    pub async fn collaborator_status(
        &self,
        board_id: &str,
        user_id: &str,
    ) -> Option<CollaboratorStatus> {
        let collaborators = self.collaborators.read().await;
        collaborators
            .get(&(board_id.to_string(), user_id.to_string()))
            .map(|record| record.status)
    }
}

#[async_trait]
impl DocumentRepository for MemoryRepository {
    async fn get(&self, board_id: &str) -> Result<Option<BoardDocument>> {
        let documents = self.documents.read().await;
        Ok(documents.get(board_id).cloned())
    }

    async fn save(&self, document: &BoardDocument) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn create(&self, document: BoardDocument) -> Result<()> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.id) {
            return Err(BoardError::Conflict(format!(
                "board '{}' already exists",
                document.id
            )));
        }
        debug!(board_id = %document.id, "Board created");
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn delete(&self, board_id: &str) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.remove(board_id);
        Ok(())
    }
}

#[async_trait]
impl CollaboratorStore for MemoryRepository {
    async fn role(&self, board_id: &str, user_id: &str) -> Result<Option<CollaboratorRole>> {
        let collaborators = self.collaborators.read().await;
        Ok(collaborators
            .get(&(board_id.to_string(), user_id.to_string()))
            .map(|record| record.role))
    }

    async fn set_status(
        &self,
        board_id: &str,
        user_id: &str,
        status: CollaboratorStatus,
    ) -> Result<()> {
        let mut collaborators = self.collaborators.write().await;
        if let Some(record) = collaborators.get_mut(&(board_id.to_string(), user_id.to_string())) {
            record.status = status;
            record.last_seen = Utc::now();
        }
        Ok(())
    }
}
