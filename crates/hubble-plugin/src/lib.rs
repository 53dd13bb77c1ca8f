//! # hubble-plugin
//!
//! WebAssembly plugin host for hubble.
//!
//! Plugins are wasm modules installed under `<plugins_dir>/installed/<id>/`.
//! For each entry the job queue asks the [`PluginRuntime`] for a fresh
//! [`Instance`] and calls its `on_create` export. Host capabilities are
//! imported from the `env` module and gated by the plugin's privileges.
//!
//! Compiled modules are kept in memory for the life of the process and
//! serialized to `<plugins_dir>/installed/<id>/cache/` so restarts skip compilation.

pub mod abi;
pub mod chunking;
pub mod entry;
pub mod host;
pub mod instance;
pub mod markdown;
pub mod runtime;
pub mod store;

pub use chunking::{chunk_by_sentence, chunk_with_overlap, ChunkerConfig};
pub use entry::{resolve_entry_url, EntryPayload, OnCreateArgs};
pub use host::{normalize_language, BoundHost, HostImport, HostServices, HostState};
pub use instance::Instance;
pub use markdown::{html_to_markdown, page_to_markdown, url_to_markdown};
pub use runtime::{plugin_cache_dir, plugin_wasm_path, PluginRuntime};
pub use store::PluginStore;
