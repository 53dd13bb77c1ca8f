//! In-memory request counters with interval reset and KV snapshots.
//!
//! Keys are either a bare action (`auth.sign-in`) or an action with an
//! identifier appended after [`KEY_SEPARATOR`]. Limits are looked up by the
//! action alone, falling back to the `*` wildcard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::defaults;
use crate::error::{Error, Result};
use crate::kv::rate_limiter_key;
use crate::traits::{KeyValueStore, KeyValueStoreExt};

/// Separator between an action key and its identifier.
pub const KEY_SEPARATOR: &str = ":_:";

/// Maximum requests allowed per interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max_requests: u32,
    pub interval: Duration,
}

impl Limit {
    pub const fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_requests,
            interval,
        }
    }
}

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub counter: u32,
    pub last_hit: DateTime<Utc>,
}

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Append an identifier to an action key.
pub fn with_identifier(key: &str, identifier: &str) -> String {
    format!("{key}{KEY_SEPARATOR}{identifier}")
}

/// Split a key into `(action, identifier)`; the identifier is empty when the
/// key has no separator.
pub fn extract_key_parts(key: &str) -> (&str, &str) {
    match key.rfind(KEY_SEPARATOR) {
        Some(idx) => (&key[..idx], &key[idx + KEY_SEPARATOR.len()..]),
        None => (key, ""),
    }
}

/// Limits applied to RPC procedures.
pub fn default_limits() -> HashMap<String, Limit> {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    [
        (
            defaults::RATE_LIMIT_WILDCARD,
            Limit::new(
                defaults::RATE_LIMIT_DEFAULT_MAX,
                defaults::RATE_LIMIT_DEFAULT_INTERVAL,
            ),
        ),
        ("workspace.entries.all", Limit::new(100, Duration::from_secs(MINUTE))),
        ("collection.entries.all", Limit::new(100, Duration::from_secs(MINUTE))),
        ("auth.sign-in", Limit::new(10, Duration::from_secs(HOUR))),
        ("auth.sign-up", Limit::new(25, Duration::from_secs(30 * MINUTE))),
        ("auth.verify-email", Limit::new(10, Duration::from_secs(HOUR))),
        ("auth.change-password", Limit::new(10, Duration::from_secs(HOUR))),
        ("auth.request-password-reset", Limit::new(5, Duration::from_secs(HOUR))),
        ("mfa.initiate-auth-session", Limit::new(10, Duration::from_secs(HOUR))),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Per-key request counter.
pub struct RateLimiter {
    scope: String,
    store: Option<Arc<dyn KeyValueStore>>,
    limits: RwLock<HashMap<String, Limit>>,
    state: RwLock<HashMap<String, State>>,
    clock: Clock,
}

impl RateLimiter {
    /// Create a limiter and load its last snapshot from `store`.
    ///
    /// A missing or unreadable snapshot starts from an empty state.
    pub async fn new(
        store: Option<Arc<dyn KeyValueStore>>,
        limits: HashMap<String, Limit>,
        scope: Option<&str>,
    ) -> Self {
        let scope = scope
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults::RATE_LIMIT_SCOPE)
            .to_string();

        let mut state = HashMap::new();
        if let Some(store) = &store {
            info!(
                subsystem = "core",
                component = "ratelimiter",
                scope = %scope,
                "Loading rate limiter state from store"
            );
            match store
                .get_json::<HashMap<String, State>>(&rate_limiter_key(&scope))
                .await
            {
                Ok(loaded) => state = loaded,
                Err(Error::KeyNotFound(_)) => {}
                Err(e) => error!(
                    subsystem = "core",
                    component = "ratelimiter",
                    error = %e,
                    "Failed to load rate limiter state from KV store"
                ),
            }
        }

        Self {
            scope,
            store,
            limits: RwLock::new(limits),
            state: RwLock::new(state),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub async fn set_limits(&self, limits: HashMap<String, Limit>) {
        *self.limits.write().await = limits;
    }

    /// Limit for a key's action, or the wildcard limit.
    pub async fn get_limit(&self, key: &str) -> Result<Limit> {
        let limits = self.limits.read().await;
        Self::lookup_limit(&limits, key)
    }

    fn lookup_limit(limits: &HashMap<String, Limit>, key: &str) -> Result<Limit> {
        let (action, _) = extract_key_parts(key);
        limits
            .get(action)
            .or_else(|| limits.get(defaults::RATE_LIMIT_WILDCARD))
            .copied()
            .ok_or_else(|| Error::RateLimit("rate limit not found".to_string()))
    }

    /// Bump the counter for `key`, returning the new count.
    pub async fn increment(&self, key: &str) -> Result<u32> {
        self.get_limit(key).await?;

        let now = (self.clock)();
        let mut state = self.state.write().await;
        let entry = state.entry(key.to_string()).or_insert(State {
            counter: 0,
            last_hit: now,
        });
        entry.counter = entry.counter.saturating_add(1);
        entry.last_hit = now;
        Ok(entry.counter)
    }

    pub async fn get_state(&self, key: &str) -> Result<State> {
        self.state
            .read()
            .await
            .get(key)
            .copied()
            .ok_or_else(|| Error::RateLimit(format!("state not found for key: {key}")))
    }

    /// When the counter for `key` resets.
    pub async fn get_reset_time(&self, key: &str) -> Result<DateTime<Utc>> {
        let state = self.get_state(key).await?;
        let limit = self.get_limit(key).await?;
        let interval = chrono::Duration::from_std(limit.interval)
            .map_err(|e| Error::RateLimit(format!("interval out of range: {e}")))?;
        Ok(state.last_hit + interval)
    }

    /// True when the counter is at the limit and the interval has not passed.
    ///
    /// A counter whose interval has elapsed is reset to zero.
    pub async fn has_reached_limit(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(current) = state.get_mut(key) else {
            return Ok(false);
        };

        let limit = {
            let limits = self.limits.read().await;
            Self::lookup_limit(&limits, key)?
        };

        let elapsed = ((self.clock)() - current.last_hit)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let within_interval = elapsed < limit.interval;

        if current.counter >= limit.max_requests && within_interval {
            return Ok(true);
        }
        if !within_interval {
            current.counter = 0;
        }
        Ok(false)
    }

    pub async fn reset(&self, key: &str) {
        self.state.write().await.remove(key);
    }

    /// Write the full state map under `ratelimiter:<scope>`.
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        info!(
            subsystem = "core",
            component = "ratelimiter",
            op = "persist",
            scope = %self.scope,
            "Persisting rate limiter state"
        );
        let state = self.state.read().await;
        store
            .set_json(&rate_limiter_key(&self.scope), &*state)
            .await
    }

    pub async fn close(&self) -> Result<()> {
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use std::sync::Mutex;

    const TEST_PROC: &str = "TestProc";

    fn limits() -> HashMap<String, Limit> {
        HashMap::from([(
            TEST_PROC.to_string(),
            Limit::new(20, Duration::from_secs(3)),
        )])
    }

    fn manual_clock() -> (Arc<Mutex<DateTime<Utc>>>, Clock) {
        let now = Arc::new(Mutex::new(Utc::now()));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (now, clock)
    }

    #[test]
    fn test_key_parts() {
        let key = with_identifier("procedure", "identifier");
        assert_eq!(key, "procedure:_:identifier");
        assert_eq!(extract_key_parts(&key), ("procedure", "identifier"));
        assert_eq!(extract_key_parts("bare"), ("bare", ""));
    }

    #[tokio::test]
    async fn test_not_reached_before_increment() {
        let limiter = RateLimiter::new(None, limits(), Some("test")).await;
        assert!(!limiter.has_reached_limit(TEST_PROC).await.unwrap());
        assert!(!limiter.has_reached_limit("never-seen").await.unwrap());
    }

    #[tokio::test]
    async fn test_limit_reached_then_reset_after_interval() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::new(None, limits(), Some("test"))
            .await
            .with_clock(clock);

        for _ in 0..20 {
            limiter.increment(TEST_PROC).await.unwrap();
        }
        assert_eq!(limiter.get_state(TEST_PROC).await.unwrap().counter, 20);
        assert!(limiter.has_reached_limit(TEST_PROC).await.unwrap());

        *now.lock().unwrap() += chrono::Duration::seconds(3);

        assert!(!limiter.has_reached_limit(TEST_PROC).await.unwrap());
        assert_eq!(limiter.get_state(TEST_PROC).await.unwrap().counter, 0);
    }

    #[tokio::test]
    async fn test_unknown_action_without_wildcard() {
        let limiter = RateLimiter::new(None, limits(), None).await;
        let err = limiter.increment("unknownProc").await.unwrap_err();
        assert!(err.to_string().contains("rate limit not found"));
    }

    #[tokio::test]
    async fn test_wildcard_fallback() {
        let limiter = RateLimiter::new(None, default_limits(), None).await;
        let limit = limiter.get_limit("some.procedure").await.unwrap();
        assert_eq!(limit.max_requests, 75);
        let limit = limiter
            .get_limit(&with_identifier("auth.sign-in", "127.0.0.1"))
            .await
            .unwrap();
        assert_eq!(limit.max_requests, 10);
    }

    #[tokio::test]
    async fn test_identifier_keys_count_separately() {
        let limiter = RateLimiter::new(None, limits(), None).await;
        let a = with_identifier(TEST_PROC, "a");
        let b = with_identifier(TEST_PROC, "b");
        limiter.increment(&a).await.unwrap();
        limiter.increment(&a).await.unwrap();
        limiter.increment(&b).await.unwrap();
        assert_eq!(limiter.get_state(&a).await.unwrap().counter, 2);
        assert_eq!(limiter.get_state(&b).await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn test_reset_time_and_reset() {
        let (now, clock) = manual_clock();
        let limiter = RateLimiter::new(None, limits(), None)
            .await
            .with_clock(clock);
        limiter.increment(TEST_PROC).await.unwrap();
        let hit = *now.lock().unwrap();
        assert_eq!(
            limiter.get_reset_time(TEST_PROC).await.unwrap(),
            hit + chrono::Duration::seconds(3)
        );
        limiter.reset(TEST_PROC).await;
        assert!(limiter.get_state(TEST_PROC).await.is_err());
    }

    #[tokio::test]
    async fn test_persist_and_reload_snapshot() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let limiter = RateLimiter::new(Some(store.clone()), limits(), Some("test")).await;
        limiter.increment(TEST_PROC).await.unwrap();
        limiter.close().await.unwrap();

        assert!(store.exists("ratelimiter:test").await.unwrap());

        let reloaded = RateLimiter::new(Some(store), limits(), Some("test")).await;
        assert_eq!(reloaded.get_state(TEST_PROC).await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn test_increment_saturates_counter() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let full = HashMap::from([(
            TEST_PROC.to_string(),
            State {
                counter: u32::MAX,
                last_hit: Utc::now(),
            },
        )]);
        store.set_json("ratelimiter:test", &full).await.unwrap();

        let limiter = RateLimiter::new(Some(store), limits(), Some("test")).await;
        assert_eq!(limiter.increment(TEST_PROC).await.unwrap(), u32::MAX);
        assert!(limiter.has_reached_limit(TEST_PROC).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        store.set("ratelimiter:app", b"[1,2").await.unwrap();
        let limiter = RateLimiter::new(Some(store), limits(), None).await;
        assert!(limiter.get_state(TEST_PROC).await.is_err());
    }
}
