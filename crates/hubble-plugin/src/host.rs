//! Host functions imported by plugins.
//!
//! Every import has the signature `(ptr: u32, len: u32) -> i64` in module
//! `env`. The privilege check happens before the input buffer is read. A
//! denied or failed call is logged, its message is written into guest memory
//! and the import returns a packed host error (see [`crate::abi`]).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use rand::RngCore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;
use wasmtime::{Caller, Linker};

use hubble_core::defaults::{CRYPTO_RAND_MAX_BYTES, PLUGIN_FETCH_TIMEOUT, STORE_NOT_FOUND};
use hubble_core::{
    ChunkRepository, EntryChunkEmbeddingJob, EntryRepository, Error, Job, JobSink, NewChunk,
    ObjectStore, Perm, Privileges, Result, StorePair, UpdateEntry,
};

use crate::abi::{pack_host_error, truncate_message, unpack, Guest, HostErrorCode};
use crate::chunking::{chunk_by_sentence, chunk_with_overlap, ChunkerConfig};
use crate::entry::{resolve_entry_url, EntryPayload};
use crate::markdown::{html_to_markdown, url_to_markdown};
use crate::store::PluginStore;

/// Text search configurations known to Postgres; anything else indexes as `simple`.
const FTS_LANGUAGES: [&str; 23] = [
    "simple",
    "english",
    "arabic",
    "danish",
    "dutch",
    "finnish",
    "french",
    "german",
    "greek",
    "hungarian",
    "indonesian",
    "irish",
    "italian",
    "lithuanian",
    "nepali",
    "norwegian",
    "portuguese",
    "romanian",
    "russian",
    "spanish",
    "swedish",
    "tamil",
    "turkish",
];

/// Map a chunk language onto a full-text search configuration.
pub fn normalize_language(language: &str) -> String {
    let language = language.trim().to_lowercase();
    if FTS_LANGUAGES.contains(&language.as_str()) {
        language
    } else {
        "simple".to_string()
    }
}

/// A function exposed to plugins under `env`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostImport {
    LogDebug,
    LogWarn,
    LogError,
    TransformHtmlToMarkdown,
    TransformUrlToMarkdown,
    ChunkWithOverlap,
    ChunkBySentence,
    NetworkRequest,
    EntryUpdate,
    EntryCreateChunks,
    EntryGet,
    EntryAttachmentUrl,
    EntryQueueEmbeddings,
    StoreSet,
    StoreGet,
    StoreDelete,
    StoreAll,
    StoreClear,
    CryptoRand,
}

impl HostImport {
    pub const ALL: [HostImport; 19] = [
        HostImport::LogDebug,
        HostImport::LogWarn,
        HostImport::LogError,
        HostImport::TransformHtmlToMarkdown,
        HostImport::TransformUrlToMarkdown,
        HostImport::ChunkWithOverlap,
        HostImport::ChunkBySentence,
        HostImport::NetworkRequest,
        HostImport::EntryUpdate,
        HostImport::EntryCreateChunks,
        HostImport::EntryGet,
        HostImport::EntryAttachmentUrl,
        HostImport::EntryQueueEmbeddings,
        HostImport::StoreSet,
        HostImport::StoreGet,
        HostImport::StoreDelete,
        HostImport::StoreAll,
        HostImport::StoreClear,
        HostImport::CryptoRand,
    ];

    /// Import name in the `env` module.
    pub fn name(self) -> &'static str {
        match self {
            HostImport::LogDebug => "log_debug",
            HostImport::LogWarn => "log_warn",
            HostImport::LogError => "log_error",
            HostImport::TransformHtmlToMarkdown => "transform_html_to_markdown",
            HostImport::TransformUrlToMarkdown => "transform_url_to_markdown",
            HostImport::ChunkWithOverlap => "chunk_with_overlap",
            HostImport::ChunkBySentence => "chunk_by_sentence",
            HostImport::NetworkRequest => "network_request",
            HostImport::EntryUpdate => "entry_update",
            HostImport::EntryCreateChunks => "entry_create_chunks",
            HostImport::EntryGet => "entry_get",
            HostImport::EntryAttachmentUrl => "entry_attachment_url",
            HostImport::EntryQueueEmbeddings => "entry_queue_embeddings",
            HostImport::StoreSet => "store_set",
            HostImport::StoreGet => "store_get",
            HostImport::StoreDelete => "store_delete",
            HostImport::StoreAll => "store_all",
            HostImport::StoreClear => "store_clear",
            HostImport::CryptoRand => "crypto_rand",
        }
    }

    /// Privilege a plugin needs to call this import.
    pub fn perm(self) -> Perm {
        match self {
            HostImport::LogDebug => Perm::LogDebug,
            HostImport::LogWarn => Perm::LogWarn,
            HostImport::LogError => Perm::LogError,
            HostImport::TransformHtmlToMarkdown => Perm::TransformHtmlToMarkdown,
            HostImport::TransformUrlToMarkdown => Perm::TransformUrlToMarkdown,
            HostImport::ChunkWithOverlap => Perm::TransformChunkWithOverlap,
            HostImport::ChunkBySentence => Perm::TransformChunkBySentence,
            HostImport::NetworkRequest => Perm::NetworkRequest,
            HostImport::EntryUpdate => Perm::EntriesUpdate,
            HostImport::EntryCreateChunks | HostImport::EntryQueueEmbeddings => Perm::ChunksCreate,
            HostImport::EntryGet | HostImport::EntryAttachmentUrl => Perm::EntriesRead,
            HostImport::StoreSet => Perm::StoreSet,
            HostImport::StoreGet => Perm::StoreGet,
            HostImport::StoreDelete => Perm::StoreDelete,
            HostImport::StoreAll => Perm::StoreAll,
            HostImport::StoreClear => Perm::StoreClear,
            HostImport::CryptoRand => Perm::CryptoRand,
        }
    }

    /// Whether the guest's input buffer is handed back after reading.
    fn releases_input(self) -> bool {
        matches!(
            self,
            HostImport::NetworkRequest
                | HostImport::EntryUpdate
                | HostImport::EntryCreateChunks
                | HostImport::EntryGet
                | HostImport::EntryAttachmentUrl
                | HostImport::EntryQueueEmbeddings
        )
    }
}

/// Services shared by every plugin invocation.
#[derive(Clone)]
pub struct HostServices {
    pub entries: Arc<dyn EntryRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub store: PluginStore,
    pub objects: Option<Arc<dyn ObjectStore>>,
    /// Set once the job queue exists; weak so the queue can own the runtime.
    jobs: Arc<OnceLock<Weak<dyn JobSink>>>,
    http: Client,
}

impl HostServices {
    pub fn new(
        entries: Arc<dyn EntryRepository>,
        chunks: Arc<dyn ChunkRepository>,
        store: PluginStore,
        objects: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(PLUGIN_FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            entries,
            chunks,
            store,
            objects,
            jobs: Arc::new(OnceLock::new()),
            http,
        })
    }

    /// Connect follow-up job submission. Later calls are ignored.
    pub fn set_job_sink(&self, sink: Weak<dyn JobSink>) -> bool {
        self.jobs.set(sink).is_ok()
    }
}

/// The host as seen by one plugin: its identity, privileges and services.
pub struct BoundHost {
    pub plugin_id: String,
    pub plugin_name: String,
    pub privileges: Privileges,
    pub services: HostServices,
}

/// Store data of every plugin instance.
pub struct HostState {
    pub(crate) host: Arc<BoundHost>,
}

impl HostState {
    pub fn new(host: BoundHost) -> Self {
        Self {
            host: Arc::new(host),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NetworkHeader {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct NetworkRequest {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<NetworkHeader>,
    #[serde(default)]
    body: String,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Serialize)]
struct NetworkResponseHeader {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct NetworkResponse {
    status: u16,
    headers: Vec<NetworkResponseHeader>,
    body: String,
}

#[derive(Debug, Serialize)]
struct ChunkList {
    chunks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateChunks {
    chunks: Vec<NewChunk>,
}

#[derive(Debug, Serialize)]
struct StorePairs {
    pairs: Vec<StorePair>,
}

fn parse_json<T: for<'de> Deserialize<'de>>(import: HostImport, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidInput(format!("{}: malformed request: {e}", import.name())))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|e| Error::InvalidInput(format!("invalid entry id: {e}")))
}

impl BoundHost {
    fn plugin_log(&self, import: HostImport, message: &str) {
        match import {
            HostImport::LogDebug => debug!(
                source = "plugin",
                identifier = %self.plugin_id,
                plugin_name = %self.plugin_name,
                "{message}"
            ),
            HostImport::LogWarn => warn!(
                source = "plugin",
                identifier = %self.plugin_id,
                plugin_name = %self.plugin_name,
                "{message}"
            ),
            _ => error!(
                source = "plugin",
                identifier = %self.plugin_id,
                plugin_name = %self.plugin_name,
                "{message}"
            ),
        }
    }

    /// Submit a follow-up job without blocking the guest.
    fn enqueue(&self, job: Job) {
        let Some(sink) = self.services.jobs.get().and_then(Weak::upgrade) else {
            warn!(
                subsystem = "plugin",
                component = "host",
                plugin_id = %self.plugin_id,
                job = %job,
                "No job queue connected, dropping follow-up job"
            );
            return;
        };
        let plugin_id = self.plugin_id.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.add(job).await {
                error!(
                    source = "host_function",
                    plugin_id = %plugin_id,
                    error = %e,
                    "failed to queue entry chunk embedding job"
                );
            }
        });
    }

    async fn network_request(&self, request: NetworkRequest) -> Result<NetworkResponse> {
        if request.url.trim().is_empty() {
            return Err(Error::InvalidInput("empty URL".into()));
        }
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid method {:?}", request.method)))?;

        let mut builder = self.services.http.request(method, request.url.trim());
        for header in &request.headers {
            builder = builder.header(header.key.as_str(), header.value.as_str());
        }
        let response = builder.body(request.body).send().await?;

        let status = response.status().as_u16();
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            grouped
                .entry(name.to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let headers = grouped
            .into_iter()
            .map(|(key, values)| NetworkResponseHeader {
                key,
                value: values.join(","),
            })
            .collect();
        let body = response.bytes().await?;

        Ok(NetworkResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn create_chunks(&self, mut chunks: Vec<NewChunk>) -> Result<i64> {
        let mut entries = BTreeSet::new();
        for chunk in &mut chunks {
            chunk.language = normalize_language(&chunk.language);
            entries.insert(chunk.entry_id);
        }
        let created = self.services.chunks.create_chunks(chunks).await?;
        if !entries.is_empty() {
            self.enqueue(Job::EntryChunkEmbedding(EntryChunkEmbeddingJob {
                entries: entries.into_iter().collect(),
            }));
        }
        Ok(i64::try_from(created).unwrap_or(i64::MAX))
    }

    /// Run `import` for the guest. Returns the raw value handed back to it.
    async fn call(
        &self,
        caller: &mut Caller<'_, HostState>,
        import: HostImport,
        ptr: u32,
        len: u32,
    ) -> Result<i64> {
        let guest = Guest::from_caller(caller)?;
        let id = self.plugin_id.as_str();

        // Imports without an input buffer.
        match import {
            HostImport::StoreAll => {
                let pairs = self.services.store.all(id).await?;
                let bytes = serde_json::to_vec(&StorePairs { pairs })?;
                return guest.write(&mut *caller, &bytes).await;
            }
            HostImport::StoreClear => {
                self.services.store.clear(id).await?;
                return Ok(0);
            }
            HostImport::CryptoRand => {
                let size = ptr as usize;
                if size == 0 || size > CRYPTO_RAND_MAX_BYTES {
                    return Err(Error::InvalidInput(format!(
                        "crypto_rand size must be between 1 and {CRYPTO_RAND_MAX_BYTES}, got {size}"
                    )));
                }
                let mut bytes = vec![0u8; size];
                rand::thread_rng().fill_bytes(&mut bytes);
                return guest.write(&mut *caller, &bytes).await;
            }
            _ => {}
        }

        let input = guest.read(&*caller, ptr, len)?;
        if import.releases_input() {
            guest.release(&mut *caller, ptr, len).await?;
        }
        let text = || {
            String::from_utf8(input.clone())
                .map_err(|_| Error::InvalidInput("guest string is not UTF-8".into()))
        };

        match import {
            HostImport::LogDebug | HostImport::LogWarn | HostImport::LogError => {
                self.plugin_log(import, &String::from_utf8_lossy(&input));
                Ok(0)
            }
            HostImport::TransformHtmlToMarkdown => {
                let markdown = html_to_markdown(&text()?, None);
                guest.write(&mut *caller, markdown.as_bytes()).await
            }
            HostImport::TransformUrlToMarkdown => {
                let markdown = url_to_markdown(&self.services.http, &text()?).await?;
                guest.write(&mut *caller, markdown.as_bytes()).await
            }
            HostImport::ChunkWithOverlap | HostImport::ChunkBySentence => {
                let text = text()?;
                let chunks = if import == HostImport::ChunkWithOverlap {
                    chunk_with_overlap(&text, ChunkerConfig::default())
                } else {
                    chunk_by_sentence(&text, ChunkerConfig::default())
                };
                let bytes = serde_json::to_vec(&ChunkList { chunks })?;
                guest.write(&mut *caller, &bytes).await
            }
            HostImport::NetworkRequest => {
                let request: NetworkRequest = parse_json(import, &input)?;
                let response = self.network_request(request).await?;
                let bytes = serde_json::to_vec(&response)?;
                guest.write(&mut *caller, &bytes).await
            }
            HostImport::EntryUpdate => {
                let mut update: UpdateEntry = parse_json(import, &input)?;
                update.name = update.name.trim().to_string();
                self.services.entries.update_entry(update).await?;
                Ok(0)
            }
            HostImport::EntryCreateChunks => {
                let request: CreateChunks = parse_json(import, &input)?;
                self.create_chunks(request.chunks).await
            }
            HostImport::EntryGet => {
                let entry = self.services.entries.find_by_public_id(parse_uuid(&text()?)?).await?;
                let bytes = EntryPayload::new(&entry, "").encode()?;
                guest.write(&mut *caller, &bytes).await
            }
            HostImport::EntryAttachmentUrl => {
                let entry = self.services.entries.find_by_public_id(parse_uuid(&text()?)?).await?;
                let url = resolve_entry_url(&entry, self.services.objects.as_ref()).await?;
                guest.write(&mut *caller, url.as_bytes()).await
            }
            HostImport::EntryQueueEmbeddings => {
                let job: EntryChunkEmbeddingJob = parse_json(import, &input)?;
                if !job.entries.is_empty() {
                    self.enqueue(Job::EntryChunkEmbedding(job));
                }
                Ok(0)
            }
            HostImport::StoreSet => {
                let pair: StorePair = parse_json(import, &input)?;
                let value = self.services.store.set(id, &pair.key, &pair.value).await?;
                guest.write(&mut *caller, value.as_bytes()).await
            }
            HostImport::StoreGet => {
                let value = self.services.store.get(id, &text()?).await?;
                let value = value.unwrap_or_else(|| STORE_NOT_FOUND.to_string());
                guest.write(&mut *caller, value.as_bytes()).await
            }
            HostImport::StoreDelete => {
                let status = match self.services.store.delete(id, &text()?).await {
                    Ok(()) => "OK".to_string(),
                    Err(e) => {
                        error!(
                            source = "host_function",
                            perm = import.perm().as_str(),
                            plugin_id = %self.plugin_id,
                            error = %e,
                            "failed to delete value from store"
                        );
                        format!("ERR({e})")
                    }
                };
                guest.write(&mut *caller, status.as_bytes()).await
            }
            HostImport::StoreAll | HostImport::StoreClear | HostImport::CryptoRand => Ok(0),
        }
    }
}

/// Write `message` for the guest and build the failed return value.
async fn fail(caller: &mut Caller<'_, HostState>, code: HostErrorCode, message: &str) -> i64 {
    let message = truncate_message(message);
    let written = match Guest::from_caller(caller) {
        Ok(guest) => guest.write(&mut *caller, message.as_bytes()).await,
        Err(e) => Err(e),
    };
    match written {
        Ok(packed) => {
            let (ptr, len) = unpack(packed);
            pack_host_error(ptr, code, len)
        }
        Err(e) => {
            debug!(
                subsystem = "plugin",
                component = "host",
                code = code.as_str(),
                error = %e,
                "Could not hand error message to guest"
            );
            pack_host_error(0, code, 0)
        }
    }
}

/// Entry point of every import: privilege check, call, error reporting.
async fn dispatch(
    mut caller: Caller<'_, HostState>,
    import: HostImport,
    ptr: u32,
    len: u32,
) -> wasmtime::Result<i64> {
    let host = Arc::clone(&caller.data().host);
    let perm = import.perm();

    if !host.privileges.has(perm) {
        error!(
            source = "host_function",
            perm = perm.as_str(),
            plugin_id = %host.plugin_id,
            "attempt to call a privileged function without permission"
        );
        let message = format!(
            "permission denied: {} requires {}",
            import.name(),
            perm.as_str()
        );
        return Ok(fail(&mut caller, HostErrorCode::PermissionDenied, &message).await);
    }

    let start = Instant::now();
    match host.call(&mut caller, import, ptr, len).await {
        Ok(value) => {
            trace!(
                subsystem = "plugin",
                component = "host",
                plugin_id = %host.plugin_id,
                import = import.name(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Host function returned"
            );
            Ok(value)
        }
        Err(e) => {
            error!(
                source = "host_function",
                perm = perm.as_str(),
                plugin_id = %host.plugin_id,
                error = %e,
                "Host function failed"
            );
            let code = HostErrorCode::from_error(&e);
            Ok(fail(&mut caller, code, &e.to_string()).await)
        }
    }
}

/// Register every import on `linker`.
pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    for import in HostImport::ALL {
        linker
            .func_wrap_async(
                "env",
                import.name(),
                move |caller: Caller<'_, HostState>, (ptr, len): (u32, u32)| {
                    Box::new(dispatch(caller, import, ptr, len))
                },
            )
            .map_err(|e| Error::Internal(format!("failed to register {}: {e}", import.name())))?;
    }
    Ok(())
}
