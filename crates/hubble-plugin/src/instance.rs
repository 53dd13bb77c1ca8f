//! A plugin module instantiated for a single invocation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wasmtime::Store;

use hubble_core::{Error, Result};

use crate::abi::{split_return, unpack, Guest};
use crate::entry::{EntryPayload, OnCreateArgs};
use crate::host::HostState;
use crate::runtime::{EpochClock, RUNTIME_CLOSED};

/// A live plugin instance. Not reused after a failed or timed out call.
pub struct Instance {
    plugin_id: String,
    plugin_name: String,
    store: Store<HostState>,
    instance: wasmtime::Instance,
    call_timeout: Duration,
    clock: Arc<EpochClock>,
}

impl Instance {
    pub(crate) fn new(
        plugin_id: String,
        plugin_name: String,
        store: Store<HostState>,
        instance: wasmtime::Instance,
        call_timeout: Duration,
        clock: Arc<EpochClock>,
    ) -> Self {
        Self {
            plugin_id,
            plugin_name,
            store,
            instance,
            call_timeout,
            clock,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Call the guest's `on_create` export with the serialized entry.
    ///
    /// A zero return is success. Anything else points at an error message in
    /// guest memory, surfaced as [`Error::Plugin`]. The call is abandoned with
    /// [`Error::PluginTimeout`] once the deadline passes, and fails with
    /// [`Error::Closed`] if the runtime closes while it runs.
    pub async fn on_create(&mut self, args: OnCreateArgs<'_>) -> Result<()> {
        let payload = EntryPayload::new(args.entry, args.url).encode()?;
        let deadline = self.call_timeout;
        let start = Instant::now();

        let outcome = tokio::time::timeout(deadline, self.call_on_create(&payload)).await;
        let result = match outcome {
            Ok(Err(_)) if self.clock.is_closed() => Err(Error::Closed(RUNTIME_CLOSED.to_string())),
            Ok(result) => result,
            Err(_) => {
                warn!(
                    subsystem = "plugin",
                    component = "instance",
                    op = "on_create",
                    plugin_id = %self.plugin_id,
                    entry_id = args.entry.id,
                    timeout_ms = deadline.as_millis() as u64,
                    "Plugin exceeded its execution deadline"
                );
                return Err(Error::PluginTimeout(self.plugin_id.clone()));
            }
        };

        debug!(
            subsystem = "plugin",
            component = "instance",
            op = "on_create",
            plugin_id = %self.plugin_id,
            entry_id = args.entry.id,
            ok = result.is_ok(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Plugin call finished"
        );
        result
    }

    async fn call_on_create(&mut self, payload: &[u8]) -> Result<()> {
        let guest = Guest::from_instance(&self.instance, &mut self.store)?;
        let on_create = self
            .instance
            .get_typed_func::<(u32, u32), i64>(&mut self.store, "on_create")
            .map_err(|e| Error::plugin(&self.plugin_id, format!("no usable on_create export: {e}")))?;

        let (ptr, size) = unpack(guest.write(&mut self.store, payload).await?);
        let returned = on_create
            .call_async(&mut self.store, (ptr, size))
            .await
            .map_err(|e| Error::plugin(&self.plugin_id, format!("on_create trapped: {e}")))?;
        if returned == 0 {
            return Ok(());
        }

        // A guest may hand a failed host import's value straight back.
        let (err_ptr, err_size, host_code) = split_return(returned);
        if err_size == 0 {
            let message = match host_code {
                Some(code) => format!("host call failed: {}", code.as_str()),
                None => "on_create failed without a message".to_string(),
            };
            return Err(Error::plugin(&self.plugin_id, message));
        }
        let message = guest.read(&self.store, err_ptr, err_size)?;
        if let Err(e) = guest.release(&mut self.store, err_ptr, err_size).await {
            debug!(
                subsystem = "plugin",
                component = "instance",
                plugin_id = %self.plugin_id,
                error = %e,
                "Could not release error buffer"
            );
        }
        Err(Error::plugin(
            &self.plugin_id,
            String::from_utf8_lossy(&message).into_owned(),
        ))
    }

    /// Release the instance and its store.
    pub fn close(self) {
        debug!(
            subsystem = "plugin",
            component = "instance",
            plugin_id = %self.plugin_id,
            "Plugin instance closed"
        );
    }
}
