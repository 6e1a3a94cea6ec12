use super::EphemeralStore;
use async_trait::async_trait;
use std::time::Duration;
use whiteboard_core::{BoardError, Result};

/// Redis-backed ephemeral store (for production).
///
/// Expiry is delegated to Redis TTLs; lock acquisition maps to a single
/// `SET key value EX ttl NX`.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a new Redis store.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| BoardError::Store(e.to_string()))?;
        Ok(Self { client })
    }

    /// Get an async connection
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BoardError::Store(format!("Redis connection failed: {e}")))
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.get_connection().await?;
        match ttl {
            Some(ttl) => redis::cmd("SETEX")
                .arg(key)
                .arg(ttl.as_secs())
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| BoardError::Store(format!("Redis SETEX failed: {e}"))),
            None => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| BoardError::Store(format!("Redis SET failed: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis DEL failed: {e}")))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis SADD failed: {e}")))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis SREM failed: {e}")))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis SMEMBERS failed: {e}")))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        // KEYS is a linear scan; acceptable at whiteboard scale where a
        // board holds at most a handful of locks.
        redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis KEYS failed: {e}")))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| BoardError::Store(format!("Redis SET NX failed: {e}")))?;
        Ok(result.is_some())
    }
}
