mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use whiteboard_core::Result;

/// Key/value storage with per-key expiry, used for client registration,
/// board-membership sets and shape locks.
///
/// Not a cache of the document and never durable: locks and presence live
/// here exclusively, everything else can be regenerated. Values are JSON
/// strings; set members are opaque ids.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Read a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, optionally bounded by a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key (value or set). No-op when absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Add a member to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of the set at `key` (empty when absent).
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// All live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically set `key` to `value` with a TTL only if the key is
    /// absent. Returns whether the write happened. This is the primitive
    /// lock acquisition is built on; read-then-write is unsafe under
    /// concurrent attempts for the same key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}
