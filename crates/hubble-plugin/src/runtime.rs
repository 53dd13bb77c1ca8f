//! Compiles plugin binaries and creates bound instances.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, Linker, Module, Store, UpdateDeadline};

use hubble_core::defaults::PLUGIN_CALL_TIMEOUT;
use hubble_core::{Error, InstalledPlugin, JobSink, Result};

use crate::host::{self, BoundHost, HostServices, HostState};
use crate::instance::Instance;
use crate::store::is_valid_identifier;

/// How often the engine epoch advances. Guests yield at every tick.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Component name carried by [`Error::Closed`] after [`PluginRuntime::close`].
pub(crate) const RUNTIME_CLOSED: &str = "plugin runtime";

/// Advances the engine epoch from a dedicated thread until dropped.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("plugin-epoch".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The epoch thread and the runtime's closed flag.
///
/// Every store holds a reference through its deadline callback, so ticks keep
/// coming until the runtime and its last instance are gone. Once closed, a
/// running guest traps at its next tick.
pub(crate) struct EpochClock {
    closed: AtomicBool,
    _ticker: EpochTicker,
}

impl EpochClock {
    fn start(engine: Engine) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            closed: AtomicBool::new(false),
            _ticker: EpochTicker::start(engine)?,
        }))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `false` if already closed.
    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Yield to the executor at every tick while open, trap once closed.
    fn attach(self: &Arc<Self>, store: &mut Store<HostState>) {
        let clock = Arc::clone(self);
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(move |_| {
            if clock.is_closed() {
                return Err(wasmtime::Error::msg(format!("{RUNTIME_CLOSED} is closed")));
            }
            Ok(UpdateDeadline::Yield(1))
        });
    }
}

/// Location of an installed plugin's binary.
pub fn plugin_wasm_path(plugins_dir: &Path, identifier: &str) -> PathBuf {
    plugins_dir
        .join("installed")
        .join(identifier)
        .join("plugin.wasm")
}

/// Compiled artifacts of an installed plugin.
pub fn plugin_cache_dir(plugins_dir: &Path, identifier: &str) -> PathBuf {
    plugins_dir.join("installed").join(identifier).join("cache")
}

fn wasm_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Internal(format!("{context}: {e}"))
}

/// Load a serialized module from the on-disk cache, compiling and caching
/// it on a miss. Blocking.
fn compile_cached(engine: &Engine, cache_dir: &Path, hash: &str, bytes: &[u8]) -> Result<Module> {
    let artifact = cache_dir.join(format!("{hash}.cwasm"));

    if artifact.is_file() {
        // SAFETY: artifacts in the cache directory are only ever written by
        // `Module::serialize` below and are keyed by the hash of their source.
        match unsafe { Module::deserialize_file(engine, &artifact) } {
            Ok(module) => {
                debug!(
                    subsystem = "plugin",
                    component = "runtime",
                    artifact = %artifact.display(),
                    "Loaded compiled plugin from cache"
                );
                return Ok(module);
            }
            Err(e) => warn!(
                subsystem = "plugin",
                component = "runtime",
                artifact = %artifact.display(),
                error = %e,
                "Discarding unusable compiled plugin"
            ),
        }
    }

    let module = Module::new(engine, bytes).map_err(|e| wasm_error("compile failed", e))?;

    let written = module
        .serialize()
        .map_err(|e| wasm_error("serialize failed", e))
        .and_then(|serialized| {
            std::fs::create_dir_all(cache_dir)?;
            std::fs::write(&artifact, serialized)?;
            Ok(())
        });
    if let Err(e) = written {
        warn!(
            subsystem = "plugin",
            component = "runtime",
            artifact = %artifact.display(),
            error = %e,
            "Failed to cache compiled plugin"
        );
    }
    Ok(module)
}

/// Owns the wasm engine and hands out one [`Instance`] per invocation.
pub struct PluginRuntime {
    engine: Engine,
    linker: Linker<HostState>,
    services: HostServices,
    plugins_dir: PathBuf,
    call_timeout: Duration,
    /// Compiled modules by source hash.
    modules: RwLock<HashMap<String, Module>>,
    clock: Arc<EpochClock>,
}

impl PluginRuntime {
    pub fn new(plugins_dir: impl Into<PathBuf>, services: HostServices) -> Result<Self> {
        let mut config = Config::new();
        config.async_support(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(|e| wasm_error("failed to create engine", e))?;

        let mut linker = Linker::new(&engine);
        host::register(&mut linker)?;

        let clock = EpochClock::start(engine.clone())?;
        let plugins_dir = plugins_dir.into();

        info!(
            subsystem = "plugin",
            component = "runtime",
            plugins_dir = %plugins_dir.display(),
            "Plugin runtime ready"
        );

        Ok(Self {
            engine,
            linker,
            services,
            plugins_dir,
            call_timeout: PLUGIN_CALL_TIMEOUT,
            modules: RwLock::new(HashMap::new()),
            clock,
        })
    }

    /// Override the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Connect the job queue used by the chunk imports.
    pub fn set_job_sink(&self, sink: Weak<dyn JobSink>) {
        if !self.services.set_job_sink(sink) {
            warn!(
                subsystem = "plugin",
                component = "runtime",
                "Job sink already connected"
            );
        }
    }

    async fn module_for(&self, identifier: &str) -> Result<Module> {
        let path = plugin_wasm_path(&self.plugins_dir, identifier);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            Error::plugin(identifier, format!("cannot read {}: {e}", path.display()))
        })?;
        let hash = hex::encode(Sha256::digest(&bytes));

        if let Some(module) = self.modules.read().await.get(&hash) {
            return Ok(module.clone());
        }

        let start = Instant::now();
        let engine = self.engine.clone();
        let cache_dir = plugin_cache_dir(&self.plugins_dir, identifier);
        let key = hash.clone();
        let module =
            tokio::task::spawn_blocking(move || compile_cached(&engine, &cache_dir, &key, &bytes))
                .await
                .map_err(|e| Error::Internal(format!("compile task failed: {e}")))?
                .map_err(|e| Error::plugin(identifier, e.to_string()))?;

        info!(
            subsystem = "plugin",
            component = "runtime",
            plugin_id = identifier,
            duration_ms = start.elapsed().as_millis() as u64,
            "Plugin compiled"
        );
        self.modules.write().await.insert(hash, module.clone());
        Ok(module)
    }

    /// Instantiate `plugin` with imports bound to its privileges.
    pub async fn load(&self, plugin: &InstalledPlugin) -> Result<Instance> {
        if self.clock.is_closed() {
            return Err(Error::Closed(RUNTIME_CLOSED.to_string()));
        }
        if !is_valid_identifier(&plugin.identifier) {
            return Err(Error::InvalidInput(format!(
                "invalid plugin identifier: {:?}",
                plugin.identifier
            )));
        }
        let module = self.module_for(&plugin.identifier).await?;

        let bound = BoundHost {
            plugin_id: plugin.identifier.clone(),
            plugin_name: plugin.name.clone(),
            privileges: plugin.privileges.clone(),
            services: self.services.clone(),
        };
        let mut store = Store::new(&self.engine, HostState::new(bound));
        self.clock.attach(&mut store);

        let mut linker = self.linker.clone();
        linker
            .define_unknown_imports_as_traps(&module)
            .map_err(|e| Error::plugin(&plugin.identifier, e.to_string()))?;

        let instantiate = linker.instantiate_async(&mut store, &module);
        let instance = match tokio::time::timeout(self.call_timeout, instantiate).await {
            Ok(result) => result.map_err(|e| {
                if self.clock.is_closed() {
                    Error::Closed(RUNTIME_CLOSED.to_string())
                } else {
                    Error::plugin(&plugin.identifier, format!("instantiation failed: {e}"))
                }
            })?,
            Err(_) => return Err(Error::PluginTimeout(plugin.identifier.clone())),
        };

        Ok(Instance::new(
            plugin.identifier.clone(),
            plugin.name.clone(),
            store,
            instance,
            self.call_timeout,
            Arc::clone(&self.clock),
        ))
    }

    /// Refuse new loads and trap guests that are still running. The epoch
    /// thread stops once the runtime and every instance are dropped.
    pub fn close(&self) {
        if self.clock.close() {
            info!(subsystem = "plugin", component = "runtime", "Plugin runtime closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.clock.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_wasm_path() {
        let path = plugin_wasm_path(Path::new("/srv/.plugins"), "0123456789abcdef0123456789abcdef");
        assert_eq!(
            path,
            PathBuf::from("/srv/.plugins/installed/0123456789abcdef0123456789abcdef/plugin.wasm")
        );
    }

    #[test]
    fn test_compile_cached_writes_and_reuses_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new();
        config.async_support(true);
        config.epoch_interruption(true);
        let engine = Engine::new(&config).unwrap();
        let wat = br#"(module (func (export "noop")))"#;

        compile_cached(&engine, dir.path(), "abc", wat).unwrap();
        let artifact = dir.path().join("abc.cwasm");
        assert!(artifact.is_file());

        let module = compile_cached(&engine, dir.path(), "abc", wat).unwrap();
        assert!(module.get_export("noop").is_some());
    }

    #[test]
    fn test_compile_cached_recovers_from_corrupt_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::default();
        std::fs::write(dir.path().join("bad.cwasm"), b"not a module").unwrap();

        let module = compile_cached(&engine, dir.path(), "bad", br#"(module (func (export "f")))"#);
        assert!(module.is_ok());
    }
}
