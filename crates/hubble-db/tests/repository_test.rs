//! Integration tests for the entry, chunk, plugin store and KV repositories.
//!
//! **IMPORTANT**: These tests require a fully migrated PostgreSQL database.
//! Run migrations first: `sqlx migrate run`, then
//! `cargo test -p hubble-db -- --ignored`.

use std::time::Duration;

use hubble_db::test_fixtures::TestDatabase;
use hubble_db::{
    ChunkEmbeddingUpdate, ChunkRepository, EntryRepository, EntryStatus, Error, KeyValueStore,
    NewChunk, PluginStoreRepository, UpdateEntry,
};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_entry_status_and_update() {
    let mut test_db = TestDatabase::new().await;
    let seed = test_db.seed_workspace().await;
    let (id, public_id) = test_db.insert_entry(&seed, "Draft", "markdown").await;

    let queued = test_db.db.entries.find_queued_ids().await.unwrap();
    assert!(queued.contains(&id));

    test_db
        .db
        .entries
        .update_status(id, EntryStatus::Processing)
        .await
        .unwrap();
    test_db
        .db
        .entries
        .update_entry(UpdateEntry {
            id: public_id,
            name: "  Final  ".to_string(),
            markdown: "# Final".to_string(),
            plain_text: "Final".to_string(),
            checksum: "abc".to_string(),
        })
        .await
        .unwrap();

    let entry = test_db.db.entries.find_by_id(id).await.unwrap();
    assert_eq!(entry.name, "Final");
    assert_eq!(entry.status, EntryStatus::Processing);
    assert_eq!(entry.content.as_deref(), Some("# Final"));
    assert_eq!(entry.workspace.id, seed.workspace_public_id);

    let missing = test_db.db.entries.find_by_id(i32::MAX).await;
    assert!(matches!(missing, Err(Error::EntryNotFound(_))));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_chunk_lifecycle() {
    let mut test_db = TestDatabase::new().await;
    let seed = test_db.seed_workspace().await;
    let (_, public_id) = test_db.insert_entry(&seed, "Doc", "pdf").await;

    let chunks = vec![
        NewChunk {
            entry_id: public_id,
            index: 0,
            min_version: 0,
            content: "first".to_string(),
            language: "en".to_string(),
        },
        NewChunk {
            entry_id: public_id,
            index: 1,
            min_version: 1,
            content: "second".to_string(),
            language: "en".to_string(),
        },
        NewChunk {
            entry_id: Uuid::new_v4(),
            index: 0,
            min_version: 1,
            content: "orphan".to_string(),
            language: String::new(),
        },
    ];
    let created = test_db.db.chunks.create_chunks(chunks).await.unwrap();
    assert_eq!(created, 2);

    let unindexed = test_db
        .db
        .chunks
        .find_unindexed_entry_chunks(public_id)
        .await
        .unwrap();
    assert_eq!(unindexed.len(), 2);
    let first = unindexed[0].id;
    assert!(test_db.db.chunks.can_embed_chunk(first).await.unwrap());

    let empty = test_db
        .db
        .chunks
        .update_embedding_state(ChunkEmbeddingUpdate::done(first, Vec::new()))
        .await;
    assert!(matches!(empty, Err(Error::InvalidInput(_))));

    test_db
        .db
        .chunks
        .update_embedding_state(ChunkEmbeddingUpdate::done(first, vec![0.5; 768]))
        .await
        .unwrap();
    assert!(!test_db.db.chunks.can_embed_chunk(first).await.unwrap());

    let second = unindexed[1].id;
    test_db
        .db
        .chunks
        .update_embedding_state(ChunkEmbeddingUpdate::failed(second, "timeout"))
        .await
        .unwrap();
    // Failed chunks stay eligible for the reconcile cron.
    assert!(test_db.db.chunks.can_embed_chunk(second).await.unwrap());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_plugin_store_roundtrip() {
    let test_db = TestDatabase::new().await;
    let plugin = format!("plugin_{}", Uuid::new_v4().simple());
    let store = &test_db.db.plugin_store;

    assert_eq!(store.get(&plugin, "missing").await.unwrap(), None);
    assert_eq!(store.set(&plugin, "b.key", "1").await.unwrap(), "1");
    assert_eq!(store.set(&plugin, "b.key", "2").await.unwrap(), "2");
    store.set(&plugin, "a_key", "x").await.unwrap();

    let all = store.all(&plugin).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].key, "a_key");

    store.delete(&plugin, "a_key").await.unwrap();
    assert_eq!(store.all(&plugin).await.unwrap().len(), 1);
    store.clear(&plugin).await.unwrap();
    assert!(store.all(&plugin).await.unwrap().is_empty());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_pg_kv_store_expiry() {
    let test_db = TestDatabase::new().await;
    let kv = test_db.db.kv_store();
    let key = format!("test:kv:{}", Uuid::new_v4());

    assert!(matches!(kv.get(&key).await, Err(Error::KeyNotFound(_))));
    kv.set(&key, b"value").await.unwrap();
    assert_eq!(kv.get(&key).await.unwrap(), b"value");
    assert!(kv.exists(&key).await.unwrap());

    kv.set_with_ttl(&key, b"short", Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!kv.exists(&key).await.unwrap());
    assert!(matches!(kv.get(&key).await, Err(Error::KeyNotFound(_))));

    kv.delete(&key).await.unwrap();
    test_db.cleanup().await;
}
