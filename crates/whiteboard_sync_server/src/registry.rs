use crate::store::EphemeralStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use whiteboard_core::{
    BoardDocument, BoardError, BoardId, CollaboratorStatus, CollaboratorStore, DocumentRepository,
    Result, UserId,
};

/// Connection status carried in the client record. The record is deleted
/// on disconnect and expires with the session TTL, so a readable record
/// is always `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Connected,
}

/// Ephemeral record describing which user a connected client belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub user_id: UserId,
    pub username: String,
    pub status: ClientStatus,
}

/// One member of a board, as reported to presence queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub user_id: UserId,
    pub username: String,
    pub client_id: String,
}

/// Tracks which client belongs to which user and which board.
///
/// All state lives in the ephemeral store under `client:{id}`,
/// `client:{id}:board` and `board:{id}:members`; nothing here survives a
/// store flush, which is exactly the durability presence needs.
pub struct SessionRegistry {
    store: Arc<dyn EphemeralStore>,
    documents: Arc<dyn DocumentRepository>,
    collaborators: Arc<dyn CollaboratorStore>,
    session_ttl: Duration,
}

fn client_key(client_id: &str) -> String {
    format!("client:{client_id}")
}

fn client_board_key(client_id: &str) -> String {
    format!("client:{client_id}:board")
}

fn members_key(board_id: &str) -> String {
    format!("board:{board_id}:members")
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        documents: Arc<dyn DocumentRepository>,
        collaborators: Arc<dyn CollaboratorStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            documents,
            collaborators,
            session_ttl,
        }
    }

    /// Store the client's session record, refreshing the TTL when the
    /// client re-registers.
    pub async fn register_client(
        &self,
        client_id: &str,
        user_id: &str,
        username: &str,
    ) -> Result<()> {
        let record = ClientRecord {
            user_id: user_id.to_string(),
            username: username.to_string(),
            status: ClientStatus::Connected,
        };
        self.store
            .set(
                &client_key(client_id),
                &serde_json::to_string(&record)?,
                Some(self.session_ttl),
            )
            .await?;
        debug!(client_id, user_id, "Client registered");
        Ok(())
    }

    /// Leave any joined board, then drop the client's session record.
    pub async fn unregister_client(&self, client_id: &str, user_id: &str) -> Result<()> {
        self.leave_board(client_id, user_id).await?;
        self.store.delete(&client_key(client_id)).await?;
        debug!(client_id, "Client unregistered");
        Ok(())
    }

    /// Join a board, leaving any other board first (membership is
    /// exclusive: one board per client at a time). Fails `NotFound` when
    /// the document does not exist; returns it otherwise so the gateway
    /// can push the initial state.
    pub async fn join_board(
        &self,
        client_id: &str,
        board_id: &str,
        user_id: &str,
    ) -> Result<BoardDocument> {
        if let Some(current) = self.client_board(client_id).await? {
            if current != board_id {
                self.leave_board(client_id, user_id).await?;
            }
        }

        let document = self
            .documents
            .get(board_id)
            .await?
            .ok_or_else(|| BoardError::NotFound(board_id.to_string()))?;

        self.store
            .set(
                &client_board_key(client_id),
                board_id,
                Some(self.session_ttl),
            )
            .await?;
        self.store
            .set_add(&members_key(board_id), client_id)
            .await?;
        self.collaborators
            .set_status(board_id, user_id, CollaboratorStatus::Active)
            .await?;

        debug!(client_id, board_id, "Client joined board");
        Ok(document)
    }

    /// Leave the current board; a no-op for clients that are not in one.
    pub async fn leave_board(&self, client_id: &str, user_id: &str) -> Result<()> {
        let Some(board_id) = self.client_board(client_id).await? else {
            return Ok(());
        };

        self.store.delete(&client_board_key(client_id)).await?;
        self.store
            .set_remove(&members_key(board_id.as_str()), client_id)
            .await?;
        self.collaborators
            .set_status(&board_id, user_id, CollaboratorStatus::Inactive)
            .await?;

        debug!(client_id, %board_id, "Client left board");
        Ok(())
    }

    /// Members of a board, deduplicated by user: a user with several tabs
    /// open appears once, under the first client record found.
    pub async fn active_users(&self, board_id: &str) -> Result<Vec<ActiveUser>> {
        let mut users = Vec::new();
        let mut seen: HashSet<UserId> = HashSet::new();

        for client_id in self.store.set_members(&members_key(board_id)).await? {
            let Some(record) = self.client_record(&client_id).await? else {
                // Member set can briefly hold clients whose session record
                // already expired.
                warn!(%client_id, board_id, "Stale member without client record");
                continue;
            };
            if seen.insert(record.user_id.clone()) {
                users.push(ActiveUser {
                    user_id: record.user_id,
                    username: record.username,
                    client_id,
                });
            }
        }
        Ok(users)
    }

    /// The board a client is currently joined to, if any.
    pub async fn client_board(&self, client_id: &str) -> Result<Option<BoardId>> {
        self.store.get(&client_board_key(client_id)).await
    }

    /// The session record for a client, if it is still alive.
    pub async fn client_record(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        match self.store.get(&client_key(client_id)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// The user a client belongs to, if registered.
    pub async fn client_user(&self, client_id: &str) -> Result<Option<UserId>> {
        Ok(self
            .client_record(client_id)
            .await?
            .map(|record| record.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use whiteboard_core::{CollaboratorRole, MemoryRepository};

    async fn registry_with_boards(boards: &[&str]) -> (SessionRegistry, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        for board_id in boards {
            repo.create(BoardDocument::new(*board_id, "owner", "board"))
                .await
                .unwrap();
        }
        let registry = SessionRegistry::new(
            Arc::new(MemoryStore::new()),
            repo.clone(),
            repo.clone(),
            Duration::from_secs(43200),
        );
        (registry, repo)
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let (registry, _) = registry_with_boards(&[]).await;

        registry.register_client("c1", "u1", "alice").await.unwrap();
        let record = registry.client_record("c1").await.unwrap().unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.username, "alice");
        assert_eq!(record.status, ClientStatus::Connected);
        assert_eq!(registry.client_user("c1").await.unwrap(), Some("u1".into()));
        assert_eq!(registry.client_board("c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn join_missing_board_is_not_found() {
        let (registry, _) = registry_with_boards(&[]).await;
        registry.register_client("c1", "u1", "alice").await.unwrap();

        let err = registry.join_board("c1", "ghost", "u1").await.unwrap_err();
        assert!(matches!(err, BoardError::NotFound(_)));
        assert_eq!(registry.client_board("c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn membership_is_exclusive_per_client() {
        let (registry, repo) = registry_with_boards(&["b1", "b2"]).await;
        repo.add_collaborator("b1", "u1", CollaboratorRole::Edit).await;
        repo.add_collaborator("b2", "u1", CollaboratorRole::Edit).await;
        registry.register_client("c1", "u1", "alice").await.unwrap();

        registry.join_board("c1", "b1", "u1").await.unwrap();
        assert_eq!(
            registry.client_board("c1").await.unwrap(),
            Some("b1".to_string())
        );

        // Joining another board implicitly leaves the first one.
        registry.join_board("c1", "b2", "u1").await.unwrap();
        assert_eq!(
            registry.client_board("c1").await.unwrap(),
            Some("b2".to_string())
        );
        assert!(registry.active_users("b1").await.unwrap().is_empty());
        assert_eq!(
            repo.collaborator_status("b1", "u1").await,
            Some(CollaboratorStatus::Inactive)
        );
        assert_eq!(
            repo.collaborator_status("b2", "u1").await,
            Some(CollaboratorStatus::Active)
        );
    }

    #[tokio::test]
    async fn leave_without_board_is_a_no_op() {
        let (registry, _) = registry_with_boards(&[]).await;
        registry.register_client("c1", "u1", "alice").await.unwrap();
        registry.leave_board("c1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn active_users_deduplicates_by_user() {
        let (registry, _) = registry_with_boards(&["b1"]).await;

        // Two tabs of the same user plus one other user.
        registry.register_client("c1", "u1", "alice").await.unwrap();
        registry.register_client("c2", "u1", "alice").await.unwrap();
        registry.register_client("c3", "u2", "bob").await.unwrap();
        registry.join_board("c1", "b1", "u1").await.unwrap();
        registry.join_board("c2", "b1", "u1").await.unwrap();
        registry.join_board("c3", "b1", "u2").await.unwrap();

        let users = registry.active_users("b1").await.unwrap();
        assert_eq!(users.len(), 2);
        let ids: HashSet<_> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["u1", "u2"]));
    }

    #[tokio::test]
    async fn unregister_cascades_into_leave() {
        let (registry, repo) = registry_with_boards(&["b1"]).await;
        repo.add_collaborator("b1", "u1", CollaboratorRole::Edit).await;
        registry.register_client("c1", "u1", "alice").await.unwrap();
        registry.join_board("c1", "b1", "u1").await.unwrap();

        registry.unregister_client("c1", "u1").await.unwrap();

        assert!(registry.client_record("c1").await.unwrap().is_none());
        assert_eq!(registry.client_board("c1").await.unwrap(), None);
        assert!(registry.active_users("b1").await.unwrap().is_empty());
        assert_eq!(
            repo.collaborator_status("b1", "u1").await,
            Some(CollaboratorStatus::Inactive)
        );
    }
}
