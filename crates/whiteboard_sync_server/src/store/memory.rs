use super::EphemeralStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use whiteboard_core::{BoardError, Result};

#[derive(Debug, Clone)]
enum Stored {
    Value(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    stored: Stored,
    deadline: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-process ephemeral store. The default backend when no Redis URL is
/// configured, and what the tests run against.
///
/// Expiry is lazy: expired entries are treated as absent on read and
/// purged when touched. `set_if_absent` is atomic under the single write
/// lock, giving the same acquire semantics as Redis `SET NX EX`.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn value_entry(value: &str, ttl: Option<Duration>) -> Entry {
        Entry {
            stored: Stored::Value(value.to_string()),
            deadline: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() => match &entry.stored {
                Stored::Value(value) => Ok(Some(value.clone())),
                Stored::Set(_) => Err(BoardError::Store(format!(
                    "key '{key}' holds a set, not a value"
                ))),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Self::value_entry(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expired() {
                    entry.stored = Stored::Set(HashSet::new());
                    entry.deadline = None;
                }
            })
            .or_insert_with(|| Entry {
                stored: Stored::Set(HashSet::new()),
                deadline: None,
            });
        match &mut entry.stored {
            Stored::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Stored::Value(_) => Err(BoardError::Store(format!(
                "key '{key}' holds a value, not a set"
            ))),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let mut drop_key = false;
        match entries.get_mut(key) {
            Some(entry) if entry.expired() => drop_key = true,
            Some(Entry {
                stored: Stored::Set(members),
                ..
            }) => {
                members.remove(member);
                drop_key = members.is_empty();
            }
            Some(_) => {
                return Err(BoardError::Store(format!(
                    "key '{key}' holds a value, not a set"
                )));
            }
            None => {}
        }
        if drop_key {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() => match &entry.stored {
                Stored::Set(members) => Ok(members.iter().cloned().collect()),
                Stored::Value(_) => Err(BoardError::Store(format!(
                    "key '{key}' holds a value, not a set"
                ))),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.expired())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() => Ok(false),
            _ => {
                entries.insert(key.to_string(), Self::value_entry(value, Some(ttl)));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_delete_round_trip() {
        let store = MemoryStore::new();

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("k").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(120);

        assert!(store.set_if_absent("lock", "u1", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "u2", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("u1".to_string()));

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(store.set_if_absent("lock", "u2", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("u2".to_string()));
    }

    #[tokio::test]
    async fn sets_track_membership() {
        let store = MemoryStore::new();

        store.set_add("members", "a").await.unwrap();
        store.set_add("members", "b").await.unwrap();
        store.set_add("members", "a").await.unwrap();

        let mut members = store.set_members("members").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.set_remove("members", "a").await.unwrap();
        assert_eq!(store.set_members("members").await.unwrap(), vec!["b"]);

        // Removing the last member drops the key entirely.
        store.set_remove("members", "b").await.unwrap();
        assert!(store.keys("members").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let store = MemoryStore::new();
        store.set("lock:board:b1:shape:s1", "u1", None).await.unwrap();
        store.set("lock:board:b1:shape:s2", "u2", None).await.unwrap();
        store.set("lock:board:b2:shape:s1", "u3", None).await.unwrap();

        let mut keys = store.keys("lock:board:b1:shape:").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["lock:board:b1:shape:s1", "lock:board:b1:shape:s2"]
        );
    }

    #[tokio::test]
    async fn type_mismatch_is_a_store_error() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(store.set_add("k", "m").await.is_err());
        assert!(store.set_remove("k", "m").await.is_err());

        store.set_add("s", "m").await.unwrap();
        assert!(store.get("s").await.is_err());
    }
}
