//! Link metadata cached in the key-value store.

use std::sync::Arc;

use tracing::{debug, warn};

use hubble_core::defaults::LINK_METADATA_TTL;
use hubble_core::{is_key_not_found, Error, Key, KeyValueStore, KeyValueStoreExt, LinkMetadata, Result};

use crate::extractor::MetadataExtractor;

/// OpenGraph results keyed by the slug of the requested URL.
#[derive(Clone)]
pub struct LinkMetadataCache {
    store: Arc<dyn KeyValueStore>,
}

impl LinkMetadataCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cached metadata for `url`, if any.
    ///
    /// An unreadable value is removed and reported as a miss.
    pub async fn get(&self, url: &str) -> Result<Option<LinkMetadata>> {
        let key = Key::link_metadata(url).to_string();
        match self.store.get_json::<LinkMetadata>(&key).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if is_key_not_found(&e) => Ok(None),
            Err(Error::Serialization(reason)) => {
                warn!(
                    subsystem = "ograph",
                    component = "cache",
                    key = %key,
                    error = %reason,
                    "Dropping undecodable link metadata"
                );
                self.store.delete(&key).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, url: &str, metadata: &LinkMetadata) -> Result<()> {
        let key = Key::link_metadata(url).to_string();
        self.store
            .set_json_with_ttl(&key, metadata, LINK_METADATA_TTL)
            .await
    }
}

impl MetadataExtractor {
    /// [`MetadataExtractor::extract`] behind the link metadata cache.
    ///
    /// Cache failures are logged and never fail the extraction.
    pub async fn extract_cached(&self, cache: &LinkMetadataCache, url: &str) -> Result<LinkMetadata> {
        match cache.get(url).await {
            Ok(Some(metadata)) => {
                debug!(subsystem = "ograph", component = "cache", url, "Link metadata cache hit");
                return Ok(metadata);
            }
            Ok(None) => {}
            Err(e) => warn!(
                subsystem = "ograph",
                component = "cache",
                url,
                error = %e,
                "Link metadata cache lookup failed"
            ),
        }

        let metadata = self.extract(url).await?;
        if let Err(e) = cache.put(url, &metadata).await {
            warn!(
                subsystem = "ograph",
                component = "cache",
                url,
                error = %e,
                "Failed to cache link metadata"
            );
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubble_core::MemoryKvStore;

    fn sample() -> LinkMetadata {
        LinkMetadata {
            title: "Example".into(),
            site_type: "website".into(),
            domain: "https://example.com".into(),
            link: "https://example.com/".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = LinkMetadataCache::new(Arc::new(MemoryKvStore::new()));
        assert_eq!(cache.get("https://example.com/").await.unwrap(), None);

        cache.put("https://example.com/", &sample()).await.unwrap();
        assert_eq!(cache.get("https://example.com/").await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_deleted() {
        let store = Arc::new(MemoryKvStore::new());
        let key = Key::link_metadata("https://example.com/").to_string();
        store.set(&key, b"not json").await.unwrap();

        let cache = LinkMetadataCache::new(store.clone());
        assert_eq!(cache.get("https://example.com/").await.unwrap(), None);
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_a_day() {
        let cache = LinkMetadataCache::new(Arc::new(MemoryKvStore::new()));
        cache.put("https://example.com/", &sample()).await.unwrap();

        tokio::time::advance(LINK_METADATA_TTL + std::time::Duration::from_secs(1)).await;
        assert_eq!(cache.get("https://example.com/").await.unwrap(), None);
    }
}
