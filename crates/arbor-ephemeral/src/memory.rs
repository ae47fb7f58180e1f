//! In-process implementation of the ephemeral store.
//!
//! Used by every test and by single-instance development deployments. Expiry
//! is lazy: any access to a lapsed entry observes it as absent and removes
//! it. Pipelines take the table lock once, so they are atomic with respect
//! to every other caller of this store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{EphemeralError, EphemeralResult};
use crate::store::{EphemeralStore, PipelineOp, PubSubMessage, SetOptions};

const SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

impl Stored {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

struct Subscriber {
    pattern: String,
    sender: mpsc::Sender<PubSubMessage>,
}

/// In-memory ephemeral store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str, found: &'static str, wanted: &'static str) -> EphemeralError {
        EphemeralError::Command(format!(
            "wrong type for key {key}: holds {found}, operation needs {wanted}"
        ))
    }

    /// Apply one pipeline op under the table lock.
    fn apply(entries: &mut HashMap<String, Entry>, op: PipelineOp, now: Instant) {
        match op {
            PipelineOp::SetString { key, value, ttl } => {
                let expires_at = ttl.map(|t| now + t);
                entries.insert(
                    key,
                    Entry {
                        value: Stored::Text(value),
                        expires_at,
                    },
                );
            },
            PipelineOp::HashSet { key, fields, ttl } => {
                let entry = entries.entry(key).or_insert_with(|| Entry {
                    value: Stored::Hash(HashMap::new()),
                    expires_at: None,
                });
                if !entry.is_live(now) || !matches!(entry.value, Stored::Hash(_)) {
                    entry.value = Stored::Hash(HashMap::new());
                    entry.expires_at = None;
                }
                if let Stored::Hash(map) = &mut entry.value {
                    map.extend(fields);
                }
                if let Some(t) = ttl {
                    entry.expires_at = Some(now + t);
                }
            },
            PipelineOp::SetAdd { key, member } => {
                let entry = entries.entry(key).or_insert_with(|| Entry {
                    value: Stored::Set(HashSet::new()),
                    expires_at: None,
                });
                if !entry.is_live(now) || !matches!(entry.value, Stored::Set(_)) {
                    entry.value = Stored::Set(HashSet::new());
                    entry.expires_at = None;
                }
                if let Stored::Set(set) = &mut entry.value {
                    set.insert(member);
                }
            },
            PipelineOp::SetRemove { key, member } => {
                if let Some(entry) = entries.get_mut(&key)
                    && let Stored::Set(set) = &mut entry.value
                {
                    set.remove(&member);
                }
            },
            PipelineOp::Delete { key } => {
                entries.remove(&key);
            },
            PipelineOp::Expire { key, ttl } => {
                if let Some(entry) = entries.get_mut(&key)
                    && entry.is_live(now)
                {
                    entry.expires_at = Some(now + ttl);
                }
            },
        }
    }
}

/// Anchored `*`-glob match, the same dialect the Redis `MATCH` option uses
/// for the patterns this crate produces.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(idx) => pos = pos + idx + part.len(),
            None => return false,
        }
    }

    last.is_empty() || text[pos..].ends_with(last)
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get_string(&self, key: &str) -> EphemeralResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some(entry) if !entry.is_live(now) => {
                entries.remove(key);
                Ok(None)
            },
            Some(entry) => match &entry.value {
                Stored::Text(value) => Ok(Some(value.clone())),
                other => Err(Self::wrong_type(key, other.kind(), "string")),
            },
            None => Ok(None),
        }
    }

    async fn set_string(&self, key: &str, value: &str, opts: SetOptions) -> EphemeralResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let existing_live = entries.get(key).is_some_and(|e| e.is_live(now));

        if opts.create_only_if_absent && existing_live {
            return Ok(false);
        }

        let expires_at = match opts.ttl {
            Some(ttl) => Some(now + ttl),
            None if existing_live => entries.get(key).and_then(|e| e.expires_at),
            None => None,
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn hash_get(&self, key: &str, field: &str) -> EphemeralResult<Option<String>> {
        Ok(self.hash_get_all(key).await?.remove(field))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> EphemeralResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Self::apply(
            &mut entries,
            PipelineOp::HashSet {
                key: key.to_string(),
                fields: vec![(field.to_string(), value.to_string())],
                ttl: None,
            },
            now,
        );
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> EphemeralResult<HashMap<String, String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some(entry) if !entry.is_live(now) => {
                entries.remove(key);
                Ok(HashMap::new())
            },
            Some(entry) => match &entry.value {
                Stored::Hash(map) => Ok(map.clone()),
                other => Err(Self::wrong_type(key, other.kind(), "hash")),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> EphemeralResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Self::apply(
            &mut entries,
            PipelineOp::SetAdd {
                key: key.to_string(),
                member: member.to_string(),
            },
            now,
        );
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> EphemeralResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Self::apply(
            &mut entries,
            PipelineOp::SetRemove {
                key: key.to_string(),
                member: member.to_string(),
            },
            now,
        );
        Ok(())
    }

    async fn set_members(&self, key: &str) -> EphemeralResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some(entry) if !entry.is_live(now) => {
                entries.remove(key);
                Ok(Vec::new())
            },
            Some(entry) => match &entry.value {
                Stored::Set(set) => Ok(set.iter().cloned().collect()),
                other => Err(Self::wrong_type(key, other.kind(), "set")),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn keys_matching(&self, pattern: &str) -> EphemeralResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        // Prune lapsed entries while scanning; the scan is the natural
        // sweep point for this store.
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> EphemeralResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        for op in ops {
            Self::apply(&mut entries, op, now);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> EphemeralResult<()> {
        let targets: Vec<mpsc::Sender<PubSubMessage>> = {
            let mut subscribers = self.subscribers.lock().expect("store mutex poisoned");
            subscribers.retain(|s| !s.sender.is_closed());
            subscribers
                .iter()
                .filter(|s| glob_match(&s.pattern, channel))
                .map(|s| s.sender.clone())
                .collect()
        };

        let message = PubSubMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        for sender in targets {
            // A full subscriber drops the message; clients reconcile with
            // the next snapshot fetch.
            if sender.try_send(message.clone()).is_err() {
                warn!(channel, "subscriber buffer full, message dropped");
            }
        }
        Ok(())
    }

    async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> EphemeralResult<mpsc::Receiver<PubSubMessage>> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .expect("store mutex poisoned")
            .push(Subscriber {
                pattern: pattern.to_string(),
                sender,
            });
        Ok(receiver)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> EphemeralResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Self::apply(
            &mut entries,
            PipelineOp::Expire {
                key: key.to_string(),
                ttl,
            },
            now,
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> EphemeralResult<()> {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> EphemeralResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        match entries.get(key) {
            Some(entry) if !entry.is_live(now) => {
                entries.remove(key);
                Ok(false)
            },
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn ping(&self) -> EphemeralResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("canvas:*:events", "canvas:c1:events"));
        assert!(!glob_match("canvas:*:events", "canvas:c1:presence"));
        assert!(glob_match(
            "canvas:c1:conversation:*:focus:u1",
            "canvas:c1:conversation:v1:focus:u1"
        ));
        assert!(!glob_match(
            "canvas:c1:conversation:*:focus:u1",
            "canvas:c1:conversation:v1:focus:u2"
        ));
        // The set key must not match a record pattern.
        assert!(!glob_match("canvas:c1:presence:*", "canvas:c1:presence"));
        // Exact patterns degrade to equality.
        assert!(glob_match("throttle:cursor:u1", "throttle:cursor:u1"));
        // Two wildcards.
        assert!(glob_match(
            "canvas:c1:conversation:*:node:*:lock",
            "canvas:c1:conversation:v1:node:n9:lock"
        ));
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store
            .set_string("k", "v", SetOptions::default())
            .await
            .unwrap();
        assert_eq!(store.get_string("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_ttl_lapses() {
        let store = MemoryStore::new();
        store
            .set_string("k", "v", SetOptions::with_ttl(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get_string("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_conditional_create() {
        let store = MemoryStore::new();
        let ttl = SetOptions::create_with_ttl(Duration::from_secs(30));
        assert!(store.set_string("lock", "a", ttl).await.unwrap());
        assert!(!store.set_string("lock", "b", ttl).await.unwrap());
        // Loser must not have overwritten.
        assert_eq!(store.get_string("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_conditional_create_after_expiry() {
        let store = MemoryStore::new();
        let short = SetOptions::create_with_ttl(Duration::from_millis(30));
        assert!(store.set_string("lock", "a", short).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.set_string("lock", "b", short).await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_and_set_ops() {
        let store = MemoryStore::new();
        store.hash_set("h", "name", "Ada").await.unwrap();
        store.hash_set("h", "email", "ada@example.com").await.unwrap();
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            store.hash_get("h", "name").await.unwrap().as_deref(),
            Some("Ada")
        );

        store.set_add("s", "u1").await.unwrap();
        store.set_add("s", "u2").await.unwrap();
        store.set_remove("s", "u1").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["u2".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_matching_skips_lapsed() {
        let store = MemoryStore::new();
        store
            .set_string("canvas:c1:activity:u1", "1", SetOptions::with_ttl(Duration::from_millis(30)))
            .await
            .unwrap();
        store
            .set_string("canvas:c1:activity:u2", "2", SetOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let keys = store.keys_matching("canvas:c1:activity:*").await.unwrap();
        assert_eq!(keys, vec!["canvas:c1:activity:u2".to_string()]);
    }

    #[tokio::test]
    async fn test_pipeline_applies_all_ops() {
        let store = MemoryStore::new();
        store
            .pipeline(vec![
                PipelineOp::HashSet {
                    key: "h".into(),
                    fields: vec![("a".into(), "1".into())],
                    ttl: Some(Duration::from_secs(60)),
                },
                PipelineOp::SetAdd {
                    key: "s".into(),
                    member: "m".into(),
                },
                PipelineOp::SetString {
                    key: "t".into(),
                    value: "x".into(),
                    ttl: None,
                },
            ])
            .await
            .unwrap();
        assert_eq!(store.hash_get("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.set_members("s").await.unwrap(), vec!["m".to_string()]);
        assert!(store.exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_pattern_pubsub() {
        let store = MemoryStore::new();
        let mut rx = store.pattern_subscribe("canvas:*:events").await.unwrap();

        store.publish("canvas:c1:events", "hello").await.unwrap();
        store.publish("canvas:c1:presence", "ignored").await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "canvas:c1:events");
        assert_eq!(msg.payload, "hello");
        assert!(rx.try_recv().is_err());
    }
}
