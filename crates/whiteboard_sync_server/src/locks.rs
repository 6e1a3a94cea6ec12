use crate::store::EphemeralStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use whiteboard_core::{Result, ShapeId, UserId};

/// Default shape lock expiry. TTL is the sole expiry mechanism: there is
/// no renewal call in the protocol, so a lock silently becomes available
/// again after this much inactivity and a long edit must reacquire or
/// accept that the lock may be stolen.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(120);

/// Identity of a lock holder, stored as the lock value so hydrating a
/// newly joined client needs no reverse lookup from user id to name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub uid: UserId,
    pub username: String,
}

/// Per-shape distributed locks: one user at a time gets the exclusive
/// right to mutate a shape, while everyone else can still observe it.
///
/// A lock has no identity beyond its `(board, shape)` key: creation is a
/// successful atomic acquire, destruction is explicit release, TTL expiry
/// or holder disconnect.
pub struct ShapeLockManager {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

fn lock_key(board_id: &str, shape_id: &str) -> String {
    format!("lock:board:{board_id}:shape:{shape_id}")
}

fn board_prefix(board_id: &str) -> String {
    format!("lock:board:{board_id}:shape:")
}

impl ShapeLockManager {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Try to take the lock on a shape for `holder`.
    ///
    /// Policy: one locked shape per user per board. Acquiring a shape
    /// releases any other lock the user holds on the board, including a
    /// re-acquire of the same shape, which refreshes the TTL. Returns
    /// true iff the lock is now held by `holder`.
    ///
    /// The final acquisition is a single atomic set-if-absent, so two
    /// concurrent calls for the same shape can both release their own old
    /// locks but only one wins the new one.
    pub async fn lock_shape(
        &self,
        board_id: &str,
        shape_id: &str,
        holder: &LockHolder,
    ) -> Result<bool> {
        let key = lock_key(board_id, shape_id);
        let value = serde_json::to_string(holder)?;

        if let Some(current) = self.shape_lock_holder(board_id, shape_id).await? {
            if current.uid != holder.uid {
                return Ok(false);
            }
        }

        self.forced_unlock(board_id, &holder.uid).await?;
        let acquired = self.store.set_if_absent(&key, &value, self.ttl).await?;
        if acquired {
            debug!(board_id, shape_id, uid = %holder.uid, "Shape locked");
        }
        Ok(acquired)
    }

    /// Unconditionally drop the lock on a shape. No ownership check;
    /// callers that care verify the holder first.
    pub async fn unlock_shape(&self, board_id: &str, shape_id: &str) -> Result<()> {
        self.store.delete(&lock_key(board_id, shape_id)).await?;
        debug!(board_id, shape_id, "Shape unlocked");
        Ok(())
    }

    /// Current holder of a shape's lock, if any.
    pub async fn shape_lock_holder(
        &self,
        board_id: &str,
        shape_id: &str,
    ) -> Result<Option<LockHolder>> {
        match self.store.get(&lock_key(board_id, shape_id)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// All currently held locks on a board, keyed by shape. Used to
    /// hydrate a newly joined client.
    pub async fn locked_shapes(&self, board_id: &str) -> Result<HashMap<ShapeId, LockHolder>> {
        let prefix = board_prefix(board_id);
        let mut locks = HashMap::new();
        for key in self.store.keys(&prefix).await? {
            let Some(shape_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            // A lock may expire between the scan and the read.
            if let Some(value) = self.store.get(&key).await? {
                locks.insert(shape_id.to_string(), serde_json::from_str(&value)?);
            }
        }
        Ok(locks)
    }

    /// Drop the lock `user_id` holds on the board, if any. Invoked on
    /// disconnect so an abandoned lock does not outlive its holder's
    /// session. The single-lock-per-user policy means at most one match.
    pub async fn forced_unlock(&self, board_id: &str, user_id: &str) -> Result<()> {
        for key in self.store.keys(&board_prefix(board_id)).await? {
            let Some(value) = self.store.get(&key).await? else {
                continue;
            };
            let holder: LockHolder = serde_json::from_str(&value)?;
            if holder.uid == user_id {
                self.store.delete(&key).await?;
                debug!(board_id, uid = %user_id, "Forced shape unlock");
                break;
            }
        }
        Ok(())
    }
}
