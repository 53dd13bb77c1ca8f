//! Runs a new entry through its workspace's `on_create` plugins.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, warn};

use hubble_core::{
    EntryJob, EntryRepository, EntryStatus, Error, InstalledPlugin, ObjectStore, PluginRepository,
    Result,
};
use hubble_plugin::{resolve_entry_url, OnCreateArgs, PluginRuntime};

use crate::handler::{JobHandler, JobResult};

/// Runs a single plugin's `on_create` hook.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    async fn on_create(&self, plugin: &InstalledPlugin, args: OnCreateArgs<'_>) -> Result<()>;
}

#[async_trait]
impl PluginExecutor for PluginRuntime {
    async fn on_create(&self, plugin: &InstalledPlugin, args: OnCreateArgs<'_>) -> Result<()> {
        let mut instance = self.load(plugin).await?;
        let result = instance.on_create(args).await;
        instance.close();
        result
    }
}

/// Handler for [`EntryJob`].
pub struct EntryHandler {
    entries: Arc<dyn EntryRepository>,
    plugins: Arc<dyn PluginRepository>,
    executor: Arc<dyn PluginExecutor>,
    objects: Option<Arc<dyn ObjectStore>>,
}

impl EntryHandler {
    pub fn new(
        entries: Arc<dyn EntryRepository>,
        plugins: Arc<dyn PluginRepository>,
        executor: Arc<dyn PluginExecutor>,
        objects: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            entries,
            plugins,
            executor,
            objects,
        }
    }

    async fn set_status(&self, entry_id: i32, status: EntryStatus) {
        if let Err(e) = self.entries.update_status(entry_id, status).await {
            error!(
                subsystem = "jobs",
                component = "entry_handler",
                entry_id,
                status = ?status,
                error = %e,
                "Failed to update entry status"
            );
        }
    }
}

#[async_trait]
impl JobHandler<EntryJob> for EntryHandler {
    fn kind(&self) -> &'static str {
        "entry"
    }

    async fn execute(&self, job: &EntryJob) -> JobResult {
        let start = Instant::now();
        let entry_id = job.entry_id;

        let entry = match self.entries.find_by_id(entry_id).await {
            Ok(entry) => entry,
            Err(e) => return JobResult::from_error(&e),
        };

        let mut plugins = match self
            .plugins
            .find_on_create_plugins_for_entry(entry.id, entry.workspace.id)
            .await
        {
            Ok(plugins) => plugins,
            Err(e) => return JobResult::from_error(&e),
        };
        if plugins.is_empty() {
            info!(
                subsystem = "jobs",
                component = "entry_handler",
                entry_id,
                "No on_create plugins for entry"
            );
            return JobResult::Success;
        }
        plugins.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        self.set_status(entry_id, EntryStatus::Processing).await;

        let url = match resolve_entry_url(&entry, self.objects.as_ref()).await {
            Ok(url) => url,
            Err(e) => {
                self.set_status(entry_id, EntryStatus::Failed).await;
                return JobResult::from_error(&e);
            }
        };

        let mut succeeded = 0usize;
        for plugin in &plugins {
            let args = OnCreateArgs {
                entry: &entry,
                url: &url,
            };
            match self.executor.on_create(plugin, args).await {
                Ok(()) => succeeded += 1,
                Err(e @ Error::Closed(_)) => {
                    // Shutting down: hand the entry back to the next start.
                    warn!(
                        subsystem = "jobs",
                        component = "entry_handler",
                        entry_id,
                        plugin_id = %plugin.identifier,
                        "Plugin runtime closed, entry requeued"
                    );
                    self.set_status(entry_id, EntryStatus::Queued).await;
                    return JobResult::Retry(e.to_string());
                }
                Err(e) => warn!(
                    subsystem = "jobs",
                    component = "entry_handler",
                    entry_id,
                    plugin_id = %plugin.identifier,
                    plugin_name = %plugin.name,
                    error = %e,
                    "Plugin on_create failed"
                ),
            }
        }

        let status = if succeeded > 0 {
            EntryStatus::Completed
        } else {
            EntryStatus::Failed
        };
        self.set_status(entry_id, status).await;

        info!(
            subsystem = "jobs",
            component = "entry_handler",
            entry_id,
            plugins = plugins.len(),
            succeeded,
            duration_ms = start.elapsed().as_millis() as u64,
            "Entry processed"
        );
        JobResult::Success
    }
}
