//! The entry record handed to plugins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hubble_core::defaults::PRESIGNED_URL_EXPIRY;
use hubble_core::{Entry, EntryType, Error, ObjectStore, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadCollection {
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadOwner {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadQueue {
    /// Unix seconds.
    pub queued_at: i64,
    pub status: u16,
}

/// JSON form of an entry as plugins see it. Field order is part of the ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPayload {
    pub id: String,
    pub name: String,
    pub markdown: String,
    pub plain_text: String,
    pub version: u32,
    #[serde(rename = "type")]
    pub entry_type: u16,
    pub collection: PayloadCollection,
    pub owner: PayloadOwner,
    pub queue: PayloadQueue,
    /// Unix seconds.
    pub created_at: i64,
    pub filesize_bytes: u64,
    pub url: String,
}

impl EntryPayload {
    pub fn new(entry: &Entry, url: impl Into<String>) -> Self {
        Self {
            id: entry.public_id.to_string(),
            name: entry.name.clone(),
            markdown: entry.content.clone().unwrap_or_default(),
            plain_text: entry.text_content.clone().unwrap_or_default(),
            version: u32::try_from(entry.version).unwrap_or_default(),
            entry_type: entry.entry_type.code(),
            collection: PayloadCollection {
                id: entry.collection.id.to_string(),
                name: entry.collection.name.clone(),
                slug: entry.collection.slug.clone(),
            },
            owner: PayloadOwner {
                first_name: entry.added_by.first_name.clone(),
                last_name: entry.added_by.last_name.clone(),
                username: entry.added_by.username.clone(),
            },
            queue: PayloadQueue {
                queued_at: entry.queued_at.timestamp(),
                status: entry.status.code(),
            },
            created_at: entry.created_at.timestamp(),
            filesize_bytes: u64::try_from(entry.filesize_bytes).unwrap_or_default(),
            url: url.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Arguments of an `on_create` call.
#[derive(Debug, Clone, Copy)]
pub struct OnCreateArgs<'a> {
    pub entry: &'a Entry,
    /// Where the plugin can fetch the entry's content.
    pub url: &'a str,
}

/// External URL of an entry's content.
///
/// Links resolve to their stored OpenGraph link, empty when none was saved.
/// Entries backed by an object resolve to a presigned GET URL valid for five
/// minutes; anything else has no URL.
pub async fn resolve_entry_url(
    entry: &Entry,
    objects: Option<&Arc<dyn ObjectStore>>,
) -> Result<String> {
    if entry.entry_type == EntryType::Link {
        let link = entry.metadata.as_ref().and_then(|m| m.link()).unwrap_or_default();
        return Ok(link.to_string());
    }

    let Some(file_id) = entry.file_id.as_deref().filter(|id| !id.is_empty()) else {
        return Ok(String::new());
    };
    let objects =
        objects.ok_or_else(|| Error::Config("no object store configured".to_string()))?;
    objects.presigned_get_url(file_id, PRESIGNED_URL_EXPIRY).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hubble_core::{EntryMetadata, EntryOwner, EntryRelation, EntryStatus, LinkMetadata};
    use uuid::Uuid;

    pub(crate) fn sample_entry(entry_type: EntryType) -> Entry {
        Entry {
            id: 7,
            public_id: Uuid::parse_str("0190b3a4-5c6d-7e8f-9a0b-1c2d3e4f5a6b").unwrap(),
            name: "Robin release notes".into(),
            content: Some("# Robin".into()),
            text_content: None,
            version: 2,
            entry_type,
            file_id: None,
            filesize_bytes: 2048,
            status: EntryStatus::Queued,
            queued_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            created_at: Utc.timestamp_opt(1_699_999_000, 0).unwrap(),
            added_by: EntryOwner {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                username: "ada".into(),
            },
            collection: EntryRelation {
                id: Uuid::nil(),
                name: "Reading".into(),
                slug: "reading".into(),
            },
            workspace: EntryRelation {
                id: Uuid::nil(),
                name: "Home".into(),
                slug: "home".into(),
            },
            metadata: None,
        }
    }

    #[test]
    fn test_payload_field_order_and_names() {
        let entry = sample_entry(EntryType::Link);
        let json = String::from_utf8(EntryPayload::new(&entry, "https://x.dev").encode().unwrap()).unwrap();

        let keys = [
            "\"id\"", "\"name\"", "\"markdown\"", "\"plainText\"", "\"version\"", "\"type\"",
            "\"collection\"", "\"owner\"", "\"queue\"", "\"createdAt\"", "\"filesizeBytes\"", "\"url\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");
        assert!(json.contains("\"firstName\":\"Ada\""));
        assert!(json.contains("\"queuedAt\":1700000000"));
    }

    #[test]
    fn test_payload_values() {
        let entry = sample_entry(EntryType::Pdf);
        let payload = EntryPayload::new(&entry, "");
        assert_eq!(payload.plain_text, "");
        assert_eq!(payload.version, 2);
        assert_eq!(payload.entry_type, EntryType::Pdf.code());
        assert_eq!(payload.queue.status, EntryStatus::Queued.code());
        assert_eq!(payload.filesize_bytes, 2048);
    }

    #[tokio::test]
    async fn test_resolve_link_entry_url() {
        let mut entry = sample_entry(EntryType::Link);
        assert_eq!(resolve_entry_url(&entry, None).await.unwrap(), "");

        entry.metadata = Some(EntryMetadata::Link(LinkMetadata {
            link: "https://trulyao.dev/posts/update-001-robin".into(),
            ..Default::default()
        }));
        assert_eq!(
            resolve_entry_url(&entry, None).await.unwrap(),
            "https://trulyao.dev/posts/update-001-robin"
        );
    }

    #[tokio::test]
    async fn test_resolve_file_entry_needs_object_store() {
        let mut entry = sample_entry(EntryType::Pdf);
        entry.file_id = Some("0190b3a4.pdf".into());
        assert!(matches!(resolve_entry_url(&entry, None).await, Err(Error::Config(_))));

        entry.file_id = None;
        assert_eq!(resolve_entry_url(&entry, None).await.unwrap(), "");
    }
}
