//! Core data models for hubble.
//!
//! These types are shared across all hubble crates and represent the
//! entities the processing core reads and advances.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// ENTRY TYPES
// =============================================================================

/// Queue status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Canceled,
    Paused,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::Processing => "processing",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Canceled => "canceled",
            EntryStatus::Paused => "paused",
        }
    }

    /// Numeric code used in the plugin entry payload.
    pub fn code(&self) -> u16 {
        match self {
            EntryStatus::Queued => 0,
            EntryStatus::Processing => 1,
            EntryStatus::Completed => 2,
            EntryStatus::Failed => 3,
            EntryStatus::Canceled => 4,
            EntryStatus::Paused => 5,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(EntryStatus::Queued),
            "processing" => Ok(EntryStatus::Processing),
            "completed" => Ok(EntryStatus::Completed),
            "failed" => Ok(EntryStatus::Failed),
            "canceled" => Ok(EntryStatus::Canceled),
            "paused" => Ok(EntryStatus::Paused),
            other => Err(Error::InvalidInput(format!("unknown entry status: {other}"))),
        }
    }
}

/// Kind of content an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Link,
    Audio,
    Video,
    Image,
    Pdf,
    Interchange,
    Epub,
    WordDocument,
    Presentation,
    Spreadsheet,
    Html,
    Markdown,
    PlainText,
    Archive,
    Code,
    Comment,
    Other,
}

impl EntryType {
    const ALL: [EntryType; 17] = [
        EntryType::Link,
        EntryType::Audio,
        EntryType::Video,
        EntryType::Image,
        EntryType::Pdf,
        EntryType::Interchange,
        EntryType::Epub,
        EntryType::WordDocument,
        EntryType::Presentation,
        EntryType::Spreadsheet,
        EntryType::Html,
        EntryType::Markdown,
        EntryType::PlainText,
        EntryType::Archive,
        EntryType::Code,
        EntryType::Comment,
        EntryType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Link => "link",
            EntryType::Audio => "audio",
            EntryType::Video => "video",
            EntryType::Image => "image",
            EntryType::Pdf => "pdf",
            EntryType::Interchange => "interchange",
            EntryType::Epub => "epub",
            EntryType::WordDocument => "word_document",
            EntryType::Presentation => "presentation",
            EntryType::Spreadsheet => "spreadsheet",
            EntryType::Html => "html",
            EntryType::Markdown => "markdown",
            EntryType::PlainText => "plain_text",
            EntryType::Archive => "archive",
            EntryType::Code => "code",
            EntryType::Comment => "comment",
            EntryType::Other => "other",
        }
    }

    /// Numeric code used in the plugin entry payload (declaration order).
    pub fn code(&self) -> u16 {
        Self::ALL.iter().position(|t| t == self).unwrap_or(16) as u16
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entry type: {s}")))
    }
}

/// OpenGraph metadata extracted from a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub site_type: String,
    /// Scheme and host of the source page, e.g. `https://example.com`.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub link: String,
}

/// Metadata recorded for uploaded files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub extension: String,
    /// Unstructured data written by plugins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_metadata: Option<JsonValue>,
}

/// Type-tagged entry metadata: OpenGraph for links, file details otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryMetadata {
    Link(LinkMetadata),
    File(FileMetadata),
}

impl EntryMetadata {
    /// Decode the stored JSON column according to the entry type.
    pub fn from_json(value: JsonValue, entry_type: EntryType) -> Result<Self> {
        match entry_type {
            EntryType::Link => Ok(EntryMetadata::Link(serde_json::from_value(value)?)),
            _ => Ok(EntryMetadata::File(serde_json::from_value(value)?)),
        }
    }

    pub fn link(&self) -> Option<&str> {
        match self {
            EntryMetadata::Link(meta) => Some(meta.link.as_str()),
            EntryMetadata::File(_) => None,
        }
    }
}

/// User who added an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOwner {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// Collection or workspace an entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRelation {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

/// A fully loaded entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Internal monotonic id.
    pub id: i32,
    pub public_id: Uuid,
    pub name: String,
    /// Markdown content.
    pub content: Option<String>,
    /// Plain-text content.
    pub text_content: Option<String>,
    pub version: i32,
    pub entry_type: EntryType,
    /// Object key of the uploaded file, if any.
    pub file_id: Option<String>,
    pub filesize_bytes: i64,
    pub status: EntryStatus,
    pub queued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub added_by: EntryOwner,
    pub collection: EntryRelation,
    pub workspace: EntryRelation,
    pub metadata: Option<EntryMetadata>,
}

/// Fields a plugin may rewrite on an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub id: Uuid,
    pub name: String,
    pub markdown: String,
    pub plain_text: String,
    pub checksum: String,
}

// =============================================================================
// CHUNK TYPES
// =============================================================================

/// Embedding state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Processing => "processing",
            EmbeddingStatus::Done => "done",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk that still needs an embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnindexedChunk {
    pub id: i32,
    pub content: String,
}

/// Chunk produced by a plugin, keyed by the parent's public id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChunk {
    pub entry_id: Uuid,
    pub index: i32,
    /// Lowest entry version this chunk is valid for; 0 means 1.
    #[serde(default)]
    pub min_version: i32,
    pub content: String,
    #[serde(default)]
    pub language: String,
}

/// Write to a chunk's semantic vector state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEmbeddingUpdate {
    pub chunk_id: i32,
    pub status: EmbeddingStatus,
    pub vector: Vec<f32>,
    pub error: Option<String>,
}

impl ChunkEmbeddingUpdate {
    pub fn processing(chunk_id: i32) -> Self {
        Self {
            chunk_id,
            status: EmbeddingStatus::Processing,
            vector: Vec::new(),
            error: None,
        }
    }

    pub fn done(chunk_id: i32, vector: Vec<f32>) -> Self {
        Self {
            chunk_id,
            status: EmbeddingStatus::Done,
            vector,
            error: None,
        }
    }

    pub fn failed(chunk_id: i32, error: impl Into<String>) -> Self {
        Self {
            chunk_id,
            status: EmbeddingStatus::Failed,
            vector: Vec::new(),
            error: Some(error.into()),
        }
    }
}

// =============================================================================
// PLUGIN TYPES
// =============================================================================

/// Capabilities a plugin can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Perm {
    #[serde(rename = "noop")]
    Noop,
    #[serde(rename = "log::debug")]
    LogDebug,
    #[serde(rename = "log::error")]
    LogError,
    #[serde(rename = "log::warn")]
    LogWarn,
    #[serde(rename = "entries::read")]
    EntriesRead,
    #[serde(rename = "entries::update")]
    EntriesUpdate,
    #[serde(rename = "chunks::create")]
    ChunksCreate,
    #[serde(rename = "network::request")]
    NetworkRequest,
    #[serde(rename = "transform::chunk_with_overlap")]
    TransformChunkWithOverlap,
    #[serde(rename = "transform::chunk_by_sentence")]
    TransformChunkBySentence,
    #[serde(rename = "transform::url_to_markdown")]
    TransformUrlToMarkdown,
    #[serde(rename = "transform::html_to_markdown")]
    TransformHtmlToMarkdown,
    #[serde(rename = "store::get")]
    StoreGet,
    #[serde(rename = "store::set")]
    StoreSet,
    #[serde(rename = "store::delete")]
    StoreDelete,
    #[serde(rename = "store::all")]
    StoreAll,
    #[serde(rename = "store::clear")]
    StoreClear,
    #[serde(rename = "crypto::rand")]
    CryptoRand,
}

impl Perm {
    const ALL: [Perm; 18] = [
        Perm::Noop,
        Perm::LogDebug,
        Perm::LogError,
        Perm::LogWarn,
        Perm::EntriesRead,
        Perm::EntriesUpdate,
        Perm::ChunksCreate,
        Perm::NetworkRequest,
        Perm::TransformChunkWithOverlap,
        Perm::TransformChunkBySentence,
        Perm::TransformUrlToMarkdown,
        Perm::TransformHtmlToMarkdown,
        Perm::StoreGet,
        Perm::StoreSet,
        Perm::StoreDelete,
        Perm::StoreAll,
        Perm::StoreClear,
        Perm::CryptoRand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Perm::Noop => "noop",
            Perm::LogDebug => "log::debug",
            Perm::LogError => "log::error",
            Perm::LogWarn => "log::warn",
            Perm::EntriesRead => "entries::read",
            Perm::EntriesUpdate => "entries::update",
            Perm::ChunksCreate => "chunks::create",
            Perm::NetworkRequest => "network::request",
            Perm::TransformChunkWithOverlap => "transform::chunk_with_overlap",
            Perm::TransformChunkBySentence => "transform::chunk_by_sentence",
            Perm::TransformUrlToMarkdown => "transform::url_to_markdown",
            Perm::TransformHtmlToMarkdown => "transform::html_to_markdown",
            Perm::StoreGet => "store::get",
            Perm::StoreSet => "store::set",
            Perm::StoreDelete => "store::delete",
            Perm::StoreAll => "store::all",
            Perm::StoreClear => "store::clear",
            Perm::CryptoRand => "crypto::rand",
        }
    }
}

impl fmt::Display for Perm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Perm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown privilege: {s}")))
    }
}

/// A privilege together with the reason the plugin declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub identifier: Perm,
    #[serde(default)]
    pub description: String,
}

/// The set of privileges granted to an installed plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privileges(pub Vec<Privilege>);

impl Privileges {
    /// Build from stored `(identifier, description)` pairs, dropping
    /// identifiers this build does not know.
    pub fn from_stored<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let privileges = pairs
            .into_iter()
            .filter_map(|(identifier, description)| {
                identifier.as_ref().parse::<Perm>().ok().map(|perm| Privilege {
                    identifier: perm,
                    description: description.as_ref().to_string(),
                })
            })
            .collect();
        Privileges(privileges)
    }

    pub fn has(&self, perm: Perm) -> bool {
        self.0.iter().any(|p| p.identifier == perm)
    }

    pub fn add(&mut self, perm: Perm, description: impl Into<String>) {
        self.0.push(Privilege {
            identifier: perm,
            description: description.into(),
        });
    }

    pub fn remove(&mut self, perm: Perm) {
        self.0.retain(|p| p.identifier != perm);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Perm> for Privileges {
    fn from_iter<T: IntoIterator<Item = Perm>>(iter: T) -> Self {
        Privileges(
            iter.into_iter()
                .map(|identifier| Privilege {
                    identifier,
                    description: String::new(),
                })
                .collect(),
        )
    }
}

/// A plugin installed into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub id: Uuid,
    /// Filesystem-safe identifier; also names the plugin's directory.
    pub identifier: String,
    pub name: String,
    pub workspace_id: i32,
    /// SHA-256 of the installed wasm binary.
    pub version_sha: String,
    pub privileges: Privileges,
}

/// A key/value pair in a plugin's private store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePair {
    pub key: String,
    pub value: String,
}

// =============================================================================
// SECRETS
// =============================================================================

/// Encrypted TOTP secret material.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpSecret {
    pub id: i32,
    pub account_id: Uuid,
    /// `nonce || ciphertext` sealed with the key of `version`.
    pub hash: Vec<u8>,
    pub version: i16,
}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpSecret")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
