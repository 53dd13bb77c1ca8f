//! Key layout for the key-value store and an in-memory driver.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::traits::KeyValueStore;

/// Top-level key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    User,
    Session,
    System,
    Workspace,
    Entry,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::User => "user",
            Namespace::Session => "session",
            Namespace::System => "system",
            Namespace::Workspace => "workspace",
            Namespace::Entry => "entry",
        }
    }
}

/// A `namespace:collection:meta` key.
///
/// Always build keys through the constructors so the layout stays uniform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    namespace: Namespace,
    collection: &'static str,
    meta: String,
}

impl Key {
    pub fn new(namespace: Namespace, collection: &'static str, meta: impl Into<String>) -> Self {
        Self {
            namespace,
            collection,
            meta: meta.into(),
        }
    }

    /// Cached OpenGraph metadata for a URL.
    pub fn link_metadata(url: &str) -> Self {
        Self::new(Namespace::Entry, "url_metadata", slugify(url))
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn collection(&self) -> &str {
        self.collection
    }

    pub fn meta(&self) -> &str {
        &self.meta
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace.as_str(), self.collection, self.meta)
    }
}

/// Snapshot key of the rate limiter for a scope.
pub fn rate_limiter_key(scope: &str) -> String {
    format!("ratelimiter:{scope}")
}

/// Lowercase, collapse every run of non-alphanumerics into one hyphen, and
/// trim hyphens from both ends.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_hyphen = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    out
}

struct MemoryValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local key-value store.
///
/// Expired values are dropped lazily on access.
#[derive(Default)]
pub struct MemoryKvStore {
    values: RwLock<HashMap<String, MemoryValue>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let now = Instant::now();
        {
            let values = self.values.read().await;
            match values.get(key) {
                Some(v) if v.is_live(now) => return Ok(v.bytes.clone()),
                None => return Err(Error::KeyNotFound(key.to_string())),
                Some(_) => {}
            }
        }
        self.values.write().await.remove(key);
        Err(Error::KeyNotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values.write().await.insert(
            key.to_string(),
            MemoryValue {
                bytes: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.values.write().await.insert(
            key.to_string(),
            MemoryValue {
                bytes: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .values
            .read()
            .await
            .get(key)
            .is_some_and(|v| v.is_live(now)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::KeyValueStoreExt;

    #[test]
    fn test_key_layout() {
        let key = Key::new(Namespace::User, "verification_token", "100");
        assert_eq!(key.to_string(), "user:verification_token:100");
        assert_eq!(key.collection(), "verification_token");
        assert_eq!(key.meta(), "100");
    }

    #[test]
    fn test_link_metadata_key_is_slugged() {
        let key = Key::link_metadata("https://trulyao.dev/posts/Update-001");
        assert_eq!(
            key.to_string(),
            "entry:url_metadata:https-trulyao-dev-posts-update-001"
        );
    }

    #[test]
    fn test_rate_limiter_key() {
        assert_eq!(rate_limiter_key("app"), "ratelimiter:app");
    }

    #[test]
    fn test_slugify_edges() {
        assert_eq!(slugify("--Hello,  World!--"), "hello-world");
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }

    #[tokio::test]
    async fn test_memory_store_missing_key() {
        let store = MemoryKvStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_set_get_delete() {
        let store = MemoryKvStore::new();
        store.set("a", b"1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), b"1");
        assert!(store.exists("a").await.unwrap());
        store.delete("a").await.unwrap();
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_ttl_expires() {
        let store = MemoryKvStore::new();
        store
            .set_with_ttl("t", b"x", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.exists("t").await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("t").await.unwrap());
        assert!(store.get("t").await.is_err());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryKvStore::new();
        store.set_json("j", &vec![1, 2, 3]).await.unwrap();
        let v: Vec<i32> = store.get_json("j").await.unwrap();
        assert_eq!(v, vec![1, 2, 3]);

        store.set("bad", b"{not json").await.unwrap();
        let err = store.get_json::<Vec<i32>>("bad").await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
