//! Per-plugin key/value store with key and identifier validation.

use std::sync::Arc;

use hubble_core::{Error, PluginStoreRepository, Result, StorePair};

/// Validated access to the plugin store repository.
#[derive(Clone)]
pub struct PluginStore {
    repo: Arc<dyn PluginStoreRepository>,
}

/// Keys are lowercase ASCII letters, digits, `_` and `.`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'.')
}

/// Plugin identifiers are 32 lowercase hex characters.
pub fn is_valid_identifier(identifier: &str) -> bool {
    identifier.len() == 32
        && identifier
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn check_identifier(identifier: &str) -> Result<()> {
    if is_valid_identifier(identifier) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid identifier: {identifier:?}")))
    }
}

fn check(identifier: &str, key: &str) -> Result<()> {
    if !is_valid_key(key) {
        return Err(Error::InvalidInput(format!("invalid key: {key:?}")));
    }
    check_identifier(identifier)
}

impl PluginStore {
    pub fn new(repo: Arc<dyn PluginStoreRepository>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, identifier: &str, key: &str) -> Result<Option<String>> {
        check(identifier, key)?;
        self.repo.get(identifier, key).await
    }

    /// Upsert `key` and return the stored value.
    pub async fn set(&self, identifier: &str, key: &str, value: &str) -> Result<String> {
        check(identifier, key)?;
        self.repo.set(identifier, key, value).await
    }

    pub async fn delete(&self, identifier: &str, key: &str) -> Result<()> {
        check(identifier, key)?;
        self.repo.delete(identifier, key).await
    }

    pub async fn all(&self, identifier: &str) -> Result<Vec<StorePair>> {
        check_identifier(identifier)?;
        self.repo.all(identifier).await
    }

    pub async fn clear(&self, identifier: &str) -> Result<()> {
        check_identifier(identifier)?;
        self.repo.clear(identifier).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    /// In-memory repository keyed by `(identifier, key)`.
    #[derive(Default)]
    pub(crate) struct FakeStoreRepo {
        pub(crate) data: Mutex<BTreeMap<(String, String), String>>,
    }

    #[async_trait]
    impl PluginStoreRepository for FakeStoreRepo {
        async fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>> {
            let data = self.data.lock().await;
            Ok(data.get(&(plugin_id.to_string(), key.to_string())).cloned())
        }

        async fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<String> {
            let mut data = self.data.lock().await;
            data.insert((plugin_id.to_string(), key.to_string()), value.to_string());
            Ok(value.to_string())
        }

        async fn delete(&self, plugin_id: &str, key: &str) -> Result<()> {
            let mut data = self.data.lock().await;
            data.remove(&(plugin_id.to_string(), key.to_string()));
            Ok(())
        }

        async fn all(&self, plugin_id: &str) -> Result<Vec<StorePair>> {
            let data = self.data.lock().await;
            Ok(data
                .iter()
                .filter(|((id, _), _)| id == plugin_id)
                .map(|((_, key), value)| StorePair {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect())
        }

        async fn clear(&self, plugin_id: &str) -> Result<()> {
            let mut data = self.data.lock().await;
            data.retain(|(id, _), _| id != plugin_id);
            Ok(())
        }
    }

    const ID: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_key_validation() {
        for key in ["a", "last_run", "feed.etag", "v2"] {
            assert!(is_valid_key(key), "{key}");
        }
        for key in ["", "Upper", "with space", "dash-ed", "slash/", "ünï"] {
            assert!(!is_valid_key(key), "{key}");
        }
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier(ID));
        assert!(!is_valid_identifier("0123456789ABCDEF0123456789abcdef"));
        assert!(!is_valid_identifier("0123456789abcdef"));
        assert!(!is_valid_identifier("../../../../etc/passwd/aaaaaaaaaa"));
    }

    #[tokio::test]
    async fn test_store_operations() {
        let store = PluginStore::new(Arc::new(FakeStoreRepo::default()));
        assert_eq!(store.get(ID, "cursor").await.unwrap(), None);
        assert_eq!(store.set(ID, "cursor", "42").await.unwrap(), "42");
        assert_eq!(store.get(ID, "cursor").await.unwrap().as_deref(), Some("42"));
        assert_eq!(store.all(ID).await.unwrap().len(), 1);

        store.delete(ID, "cursor").await.unwrap();
        assert_eq!(store.get(ID, "cursor").await.unwrap(), None);

        store.set(ID, "a", "1").await.unwrap();
        store.clear(ID).await.unwrap();
        assert!(store.all(ID).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_input() {
        let store = PluginStore::new(Arc::new(FakeStoreRepo::default()));
        assert!(matches!(
            store.set(ID, "Bad Key", "x").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.all("not-an-identifier").await,
            Err(Error::InvalidInput(_))
        ));
    }
}
