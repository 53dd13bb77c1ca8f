//! Runtime tests with small WAT plugins written to a temporary plugins dir.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use hubble_core::{
    ChunkEmbeddingUpdate, ChunkRepository, Entry, EntryOwner, EntryRelation, EntryRepository,
    EntryStatus, EntryType, Error, InstalledPlugin, Job, JobSink, NewChunk, Perm,
    PluginStoreRepository, Result, StorePair, UnindexedChunk, UpdateEntry,
};
use hubble_plugin::{plugin_cache_dir, plugin_wasm_path, HostServices, OnCreateArgs, PluginRuntime, PluginStore};

const ID: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90";
const ENTRY_UUID: &str = "0190b3a4-5c6d-7e8f-9a0b-1c2d3e4f5a6b";

// ─── Fakes ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeEntries {
    updates: Mutex<Vec<UpdateEntry>>,
}

#[async_trait]
impl EntryRepository for FakeEntries {
    async fn find_by_id(&self, id: i32) -> Result<Entry> {
        Err(Error::EntryNotFound(id))
    }

    async fn find_by_public_id(&self, _public_id: Uuid) -> Result<Entry> {
        Ok(sample_entry())
    }

    async fn find_queued_ids(&self) -> Result<Vec<i32>> {
        Ok(Vec::new())
    }

    async fn update_status(&self, _id: i32, _status: EntryStatus) -> Result<()> {
        Ok(())
    }

    async fn update_entry(&self, update: UpdateEntry) -> Result<()> {
        self.updates.lock().await.push(update);
        Ok(())
    }
}

#[derive(Default)]
struct FakeChunks {
    created: Mutex<Vec<NewChunk>>,
}

#[async_trait]
impl ChunkRepository for FakeChunks {
    async fn find_unindexed_entry_chunks(&self, _entry_public_id: Uuid) -> Result<Vec<UnindexedChunk>> {
        Ok(Vec::new())
    }

    async fn find_unindexed_chunks(&self) -> Result<Vec<UnindexedChunk>> {
        Ok(Vec::new())
    }

    async fn can_embed_chunk(&self, _id: i32) -> Result<bool> {
        Ok(true)
    }

    async fn update_embedding_state(&self, _update: ChunkEmbeddingUpdate) -> Result<()> {
        Ok(())
    }

    async fn create_chunks(&self, chunks: Vec<NewChunk>) -> Result<u64> {
        let count = chunks.len() as u64;
        self.created.lock().await.extend(chunks);
        Ok(count)
    }
}

#[derive(Default)]
struct FakeStore {
    pairs: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl PluginStoreRepository for FakeStore {
    async fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>> {
        let pairs = self.pairs.lock().await;
        Ok(pairs
            .iter()
            .find(|(id, k, _)| id == plugin_id && k == key)
            .map(|(_, _, v)| v.clone()))
    }

    async fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<String> {
        let mut pairs = self.pairs.lock().await;
        pairs.retain(|(id, k, _)| !(id == plugin_id && k == key));
        pairs.push((plugin_id.into(), key.into(), value.into()));
        Ok(value.into())
    }

    async fn delete(&self, plugin_id: &str, key: &str) -> Result<()> {
        self.pairs
            .lock()
            .await
            .retain(|(id, k, _)| !(id == plugin_id && k == key));
        Ok(())
    }

    async fn all(&self, plugin_id: &str) -> Result<Vec<StorePair>> {
        let pairs = self.pairs.lock().await;
        Ok(pairs
            .iter()
            .filter(|(id, _, _)| id == plugin_id)
            .map(|(_, key, value)| StorePair {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn clear(&self, plugin_id: &str) -> Result<()> {
        self.pairs.lock().await.retain(|(id, _, _)| id != plugin_id);
        Ok(())
    }
}

#[derive(Default)]
struct FakeSink {
    jobs: Mutex<Vec<Job>>,
}

#[async_trait]
impl JobSink for FakeSink {
    async fn add(&self, job: Job) -> Result<()> {
        self.jobs.lock().await.push(job);
        Ok(())
    }
}

// ─── Helpers ───────────────────────────────────────────────────────────────

fn sample_entry() -> Entry {
    Entry {
        id: 7,
        public_id: Uuid::parse_str(ENTRY_UUID).unwrap(),
        name: "Robin release notes".into(),
        content: Some("# Robin".into()),
        text_content: Some("Robin".into()),
        version: 1,
        entry_type: EntryType::Markdown,
        file_id: None,
        filesize_bytes: 7,
        status: EntryStatus::Queued,
        queued_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
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

fn plugin(perms: &[Perm]) -> InstalledPlugin {
    InstalledPlugin {
        id: Uuid::nil(),
        identifier: ID.into(),
        name: "test plugin".into(),
        workspace_id: 1,
        version_sha: String::new(),
        privileges: perms.iter().copied().collect(),
    }
}

/// A module with a bump allocator, the given imports and definitions.
fn module(imports: &str, body: &str) -> String {
    format!(
        r#"(module
  {imports}
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 4096))
  (func (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
  {body})"#
    )
}

/// WAT string literal holding `text` at offset 0, and its length.
fn data(text: &str) -> (String, usize) {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    (format!(r#"(data (i32.const 0) "{escaped}")"#), text.len())
}

fn install(dir: &Path, wat: &str) {
    let path = plugin_wasm_path(dir, ID);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, wat).unwrap();
}

struct Harness {
    dir: tempfile::TempDir,
    entries: Arc<FakeEntries>,
    chunks: Arc<FakeChunks>,
    store: Arc<FakeStore>,
    runtime: PluginRuntime,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let entries = Arc::new(FakeEntries::default());
    let chunks = Arc::new(FakeChunks::default());
    let store = Arc::new(FakeStore::default());
    let services = HostServices::new(
        entries.clone(),
        chunks.clone(),
        PluginStore::new(store.clone()),
        None,
    )
    .unwrap();
    let runtime = PluginRuntime::new(dir.path(), services)
        .unwrap()
        .with_call_timeout(Duration::from_millis(300));
    Harness {
        dir,
        entries,
        chunks,
        store,
        runtime,
    }
}

async fn run(h: &Harness, perms: &[Perm]) -> Result<()> {
    let entry = sample_entry();
    let mut instance = h.runtime.load(&plugin(perms)).await?;
    let result = instance
        .on_create(OnCreateArgs {
            entry: &entry,
            url: "",
        })
        .await;
    instance.close();
    result
}

const RETURN_OK: &str = r#"(func (export "on_create") (param i32 i32) (result i64) (i64.const 0))"#;

// ─── Tests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_on_create_success_and_cache_artifact() {
    let h = harness();
    install(h.dir.path(), &module("", RETURN_OK));

    run(&h, &[]).await.unwrap();

    let artifacts: Vec<_> = std::fs::read_dir(plugin_cache_dir(h.dir.path(), ID))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "cwasm"))
        .collect();
    assert_eq!(artifacts.len(), 1);

    // A second load reuses the compiled module.
    run(&h, &[]).await.unwrap();
}

#[tokio::test]
async fn test_on_create_error_message_surfaces() {
    let h = harness();
    // pack(16, 4) points at "boom".
    let body = format!(
        r#"(data (i32.const 16) "boom")
  (func (export "on_create") (param i32 i32) (result i64) (i64.const {}))"#,
        (16i64 << 32) | 4
    );
    install(h.dir.path(), &module("", &body));

    match run(&h, &[]).await {
        Err(Error::Plugin { plugin_id, message }) => {
            assert_eq!(plugin_id, ID);
            assert_eq!(message, "boom");
        }
        other => panic!("expected plugin error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_on_create_receives_entry_payload() {
    let h = harness();
    // Echo the argument back as the error message.
    let body = r#"(func (export "on_create") (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len))))"#;
    install(h.dir.path(), &module("", body));

    let Err(Error::Plugin { message, .. }) = run(&h, &[]).await else {
        panic!("expected the echoed payload");
    };
    let payload: serde_json::Value = serde_json::from_str(&message).unwrap();
    assert_eq!(payload["id"], ENTRY_UUID);
    assert_eq!(payload["name"], "Robin release notes");
    assert_eq!(payload["plainText"], "Robin");
    assert_eq!(payload["owner"]["username"], "ada");
}

#[tokio::test]
async fn test_spinning_plugin_times_out_and_runtime_recovers() {
    let h = harness();
    let spin = r#"(func (export "on_create") (param i32 i32) (result i64)
    (loop $spin (br $spin))
    (i64.const 0))"#;
    install(h.dir.path(), &module("", spin));

    let err = run(&h, &[]).await.unwrap_err();
    assert!(matches!(err, Error::PluginTimeout(ref id) if id == ID), "{err:?}");

    install(h.dir.path(), &module("", RETURN_OK));
    run(&h, &[]).await.unwrap();
}

#[tokio::test]
async fn test_store_set_requires_privilege() {
    let (segment, len) = data(r#"{"key":"cursor","value":"42"}"#);
    let imports = r#"(import "env" "store_set" (func $store_set (param i32 i32) (result i64)))"#;
    let body = format!(
        r#"{segment}
  (func (export "on_create") (param i32 i32) (result i64)
    (call $store_set (i32.const 0) (i32.const {len})))"#
    );

    // Denied: the failure reaches the guest, which returns it as its own.
    let h = harness();
    install(h.dir.path(), &module(imports, &body));
    match run(&h, &[]).await {
        Err(Error::Plugin { message, .. }) => {
            assert_eq!(message, "permission denied: store_set requires store::set");
        }
        other => panic!("expected a denied call, got {other:?}"),
    }
    assert!(h.store.pairs.lock().await.is_empty());

    // Granted: the new value comes back packed, surfacing as the message.
    let h = harness();
    install(h.dir.path(), &module(imports, &body));
    match run(&h, &[Perm::StoreSet]).await {
        Err(Error::Plugin { message, .. }) => assert_eq!(message, "42"),
        other => panic!("expected the stored value, got {other:?}"),
    }
    let pairs = h.store.pairs.lock().await;
    assert_eq!(pairs.as_slice(), &[(ID.to_string(), "cursor".to_string(), "42".to_string())]);
}

#[tokio::test]
async fn test_denied_entry_update_is_visible_to_guest() {
    let json = format!(r#"{{"id":"{ENTRY_UUID}","name":"x","markdown":"","plain_text":"","checksum":""}}"#);
    let (segment, len) = data(&json);
    let imports = r#"(import "env" "entry_update" (func $update (param i32 i32) (result i64)))"#;
    // The guest checks for the permission code (bits 24..31 of the size
    // half) and hands the failure back as its own.
    let body = format!(
        r#"{segment}
  (func (export "on_create") (param i32 i32) (result i64)
    (local $ret i64)
    (local.set $ret (call $update (i32.const 0) (i32.const {len})))
    (if (i64.ne
          (i64.and (i64.shr_u (local.get $ret) (i64.const 24)) (i64.const 0xff))
          (i64.const 0x81))
      (then (unreachable)))
    (local.get $ret))"#
    );
    let h = harness();
    install(h.dir.path(), &module(imports, &body));

    match run(&h, &[Perm::EntriesRead]).await {
        Err(Error::Plugin { message, .. }) => {
            assert_eq!(message, "permission denied: entry_update requires entries::update")
        }
        other => panic!("expected the denial, got {other:?}"),
    }
    assert!(h.entries.updates.lock().await.is_empty());
}

#[tokio::test]
async fn test_oversized_read_is_rejected() {
    let imports = r#"(import "env" "store_get" (func $store_get (param i32 i32) (result i64)))"#;
    let body = r#"(func (export "on_create") (param i32 i32) (result i64)
    (call $store_get (i32.const 0) (i32.const 0x7fffffff)))"#;
    let h = harness();
    install(h.dir.path(), &module(imports, body));

    match run(&h, &[Perm::StoreGet]).await {
        Err(Error::Plugin { message, .. }) => assert!(message.contains("out of bounds"), "{message}"),
        other => panic!("expected a failed read, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_stops_running_plugin_and_refuses_loads() {
    let h = harness();
    let spin = r#"(func (export "on_create") (param i32 i32) (result i64)
    (loop $spin (br $spin))
    (i64.const 0))"#;
    install(h.dir.path(), &module("", spin));

    let entry = sample_entry();
    let mut instance = h.runtime.load(&plugin(&[])).await.unwrap();
    h.runtime.close();
    assert!(h.runtime.is_closed());

    let call = instance.on_create(OnCreateArgs {
        entry: &entry,
        url: "",
    });
    let result = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("a closed runtime must still stop a spinning guest");
    assert!(matches!(result, Err(Error::Closed(_))), "{result:?}");
    instance.close();

    assert!(matches!(h.runtime.load(&plugin(&[])).await, Err(Error::Closed(_))));
}

#[tokio::test]
async fn test_store_get_missing_key_sentinel() {
    let (segment, len) = data("missing");
    let imports = r#"(import "env" "store_get" (func $store_get (param i32 i32) (result i64)))"#;
    let body = format!(
        r#"{segment}
  (func (export "on_create") (param i32 i32) (result i64)
    (call $store_get (i32.const 0) (i32.const {len})))"#
    );
    let h = harness();
    install(h.dir.path(), &module(imports, &body));

    match run(&h, &[Perm::StoreGet]).await {
        Err(Error::Plugin { message, .. }) => assert_eq!(message, "__NOT_FOUND_0x0000__"),
        other => panic!("expected the not-found sentinel, got {other:?}"),
    }
}

#[tokio::test]
async fn test_entry_update_trims_name() {
    let json = format!(
        r##"{{"id":"{ENTRY_UUID}","name":"  Renamed  ","markdown":"# R","plain_text":"R","checksum":"abc"}}"##
    );
    let (segment, len) = data(&json);
    let imports = r#"(import "env" "entry_update" (func $update (param i32 i32) (result i64)))"#;
    let body = format!(
        r#"{segment}
  (func (export "on_create") (param i32 i32) (result i64)
    (call $update (i32.const 0) (i32.const {len})))"#
    );
    let h = harness();
    install(h.dir.path(), &module(imports, &body));

    run(&h, &[Perm::EntriesUpdate]).await.unwrap();
    let updates = h.entries.updates.lock().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].name, "Renamed");
    assert_eq!(updates[0].plain_text, "R");
}

#[tokio::test]
async fn test_create_chunks_normalizes_language_and_enqueues() {
    let json = format!(
        r#"{{"chunks":[{{"entry_id":"{ENTRY_UUID}","index":0,"content":"hello","language":"English"}},{{"entry_id":"{ENTRY_UUID}","index":1,"content":"world","language":"Klingon"}}]}}"#
    );
    let (segment, len) = data(&json);
    let imports =
        r#"(import "env" "entry_create_chunks" (func $chunks (param i32 i32) (result i64)))"#;
    let body = format!(
        r#"{segment}
  (func (export "on_create") (param i32 i32) (result i64)
    (drop (call $chunks (i32.const 0) (i32.const {len})))
    (i64.const 0))"#
    );
    let h = harness();
    let sink = Arc::new(FakeSink::default());
    let dyn_sink: Arc<dyn JobSink> = sink.clone();
    let weak: Weak<dyn JobSink> = Arc::downgrade(&dyn_sink);
    h.runtime.set_job_sink(weak);
    install(h.dir.path(), &module(imports, &body));

    run(&h, &[Perm::ChunksCreate]).await.unwrap();

    let created = h.chunks.created.lock().await.clone();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].language, "english");
    assert_eq!(created[1].language, "simple");

    // The follow-up job is submitted from a spawned task.
    let mut jobs = Vec::new();
    for _ in 0..50 {
        jobs = sink.jobs.lock().await.clone();
        if !jobs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match jobs.as_slice() {
        [Job::EntryChunkEmbedding(job)] => {
            assert_eq!(job.entries, vec![Uuid::parse_str(ENTRY_UUID).unwrap()]);
        }
        other => panic!("expected one fan-out job, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_import_traps_when_called() {
    let imports = r#"(import "env" "does_not_exist" (func $nope))"#;
    let body = r#"(func (export "on_create") (param i32 i32) (result i64)
    (call $nope)
    (i64.const 0))"#;
    let h = harness();
    install(h.dir.path(), &module(imports, body));

    match run(&h, &[]).await {
        Err(Error::Plugin { message, .. }) => assert!(message.contains("trapped"), "{message}"),
        other => panic!("expected a trap, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_binary_and_bad_identifier() {
    let h = harness();
    assert!(matches!(run(&h, &[]).await, Err(Error::Plugin { .. })));

    let mut bad = plugin(&[]);
    bad.identifier = "../escape".into();
    assert!(matches!(
        h.runtime.load(&bad).await,
        Err(Error::InvalidInput(_))
    ));
}
