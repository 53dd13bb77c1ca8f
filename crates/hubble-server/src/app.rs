//! Component wiring, start-up order and graceful shutdown.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{error, info, warn};

use hubble_core::config::KvDriver;
use hubble_core::ratelimit::default_limits;
use hubble_core::{
    ChunkEmbeddingJob, ChunkRepository, Config, EntryRepository, JobSink, KeyValueStore,
    MemoryKvStore, ObjectStore, RateLimiter,
};
use hubble_crypto::{Keyring, Scope, SecretRotator};
use hubble_db::{Database, PoolConfig, RedisKvStore, S3Presigner};
use hubble_inference::{EmbeddingClient, EmbeddingConfig};
use hubble_jobs::{
    EmbeddingHandler, EntryHandler, JobHandler, JobQueue, PluginExecutor, QueueConfig,
    ReconcileCron,
};
use hubble_plugin::{HostServices, PluginRuntime, PluginStore};

/// Every long-lived component of the processing core.
pub struct App {
    db: Database,
    kv: Arc<dyn KeyValueStore>,
    rate_limiter: Arc<RateLimiter>,
    objects: Option<Arc<dyn ObjectStore>>,
    plugins: Arc<PluginRuntime>,
    queue: Arc<JobQueue>,
    reconcile: Option<Arc<ReconcileCron>>,
}

async fn build_kv(config: &Config, db: &Database) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.kv_driver {
        KvDriver::Postgres => Arc::new(db.kv_store()),
        KvDriver::Redis => Arc::new(
            RedisKvStore::connect(&config.redis_url)
                .await
                .context("failed to connect to redis")?,
        ),
        KvDriver::Memory => Arc::new(MemoryKvStore::new()),
    };
    info!(
        subsystem = "server",
        driver = ?config.kv_driver,
        "Key-value store ready"
    );
    Ok(store)
}

fn build_object_store(config: &Config) -> anyhow::Result<Option<Arc<dyn ObjectStore>>> {
    if config.minio.endpoint.trim().is_empty() {
        warn!(
            subsystem = "server",
            "No object store endpoint configured, file entries cannot be handed to plugins"
        );
        return Ok(None);
    }
    let presigner =
        S3Presigner::from_config(&config.minio).context("invalid object store config")?;
    info!(subsystem = "server", endpoint = %config.minio.endpoint, "Object store ready");
    Ok(Some(Arc::new(presigner)))
}

fn build_embedding_handler(
    config: &Config,
    chunks: Arc<dyn ChunkRepository>,
) -> anyhow::Result<Option<Arc<dyn JobHandler<ChunkEmbeddingJob>>>> {
    if !config.embeddings_enabled() {
        info!(subsystem = "server", "Embeddings disabled");
        return Ok(None);
    }
    let Some(embedding_config) = EmbeddingConfig::from_llm(&config.llm) else {
        return Ok(None);
    };
    let model = embedding_config.model.clone();
    let client =
        EmbeddingClient::new(embedding_config).context("failed to build embedding client")?;
    info!(subsystem = "server", model = %model, "Embedding client ready");
    Ok(Some(Arc::new(EmbeddingHandler::new(chunks, Arc::new(client)))))
}

impl App {
    /// Bring the core up in dependency order. Any error here is fatal.
    pub async fn start(config: &Config) -> anyhow::Result<Self> {
        let start = Instant::now();

        info!(subsystem = "server", "Connecting to database...");
        let db = Database::connect_with_config(
            &config.postgres_dsn,
            PoolConfig::from_config(&config.database),
        )
        .await
        .context("failed to connect to database")?;
        db.migrate().await.context("failed to run migrations")?;
        info!(subsystem = "server", "Database connected");

        let kv = build_kv(config, &db).await?;

        let rate_limiter =
            Arc::new(RateLimiter::new(Some(Arc::clone(&kv)), default_limits(), None).await);

        let objects = build_object_store(config)?;

        let entries: Arc<dyn EntryRepository> = Arc::new(db.entries.clone());
        let chunks: Arc<dyn ChunkRepository> = Arc::new(db.chunks.clone());

        let services = HostServices::new(
            Arc::clone(&entries),
            Arc::clone(&chunks),
            PluginStore::new(Arc::new(db.plugin_store.clone())),
            objects.clone(),
        )?;
        let plugins = Arc::new(
            PluginRuntime::new(&config.plugins_dir, services)
                .context("failed to start plugin runtime")?,
        );

        let embedding_handler = build_embedding_handler(config, Arc::clone(&chunks))?;

        let executor: Arc<dyn PluginExecutor> = plugins.clone();
        let entry_handler = EntryHandler::new(
            Arc::clone(&entries),
            Arc::new(db.plugins.clone()),
            executor,
            objects.clone(),
        );
        let queue = Arc::new(JobQueue::new(
            QueueConfig::default(),
            Arc::new(entry_handler),
            embedding_handler,
            Arc::clone(&entries),
            Arc::clone(&chunks),
        ));
        let sink: Arc<dyn JobSink> = queue.clone();
        plugins.set_job_sink(Arc::downgrade(&sink));

        queue.load().await.context("failed to load pending jobs")?;
        queue.start();

        let reconcile = if queue.embeddings_enabled() {
            let cron = Arc::new(ReconcileCron::new(Arc::clone(&chunks), Arc::clone(&sink)));
            cron.start();
            Some(cron)
        } else {
            None
        };

        rotate_secrets(config, &db).await?;

        info!(
            subsystem = "server",
            duration_ms = start.elapsed().as_millis() as u64,
            "Processing core started"
        );

        Ok(Self {
            db,
            kv,
            rate_limiter,
            objects,
            plugins,
            queue,
            reconcile,
        })
    }

    /// Tear down in reverse dependency order. Failures are logged and the
    /// remaining steps still run.
    pub async fn shutdown(self) {
        info!(subsystem = "server", "Shutting down");

        self.plugins.close();

        if let Err(e) = self.rate_limiter.close().await {
            error!(subsystem = "server", error = %e, "Failed to persist rate limiter state");
        }

        if let Err(e) = self.kv.close().await {
            error!(subsystem = "server", error = %e, "Failed to close key-value store");
        }

        if let Some(objects) = &self.objects {
            if let Err(e) = objects.close().await {
                error!(subsystem = "server", error = %e, "Failed to close object store");
            }
        }

        self.queue.close().await;

        if let Some(cron) = &self.reconcile {
            cron.stop().await;
        }

        self.db.close().await;
        info!(subsystem = "server", "Shutdown complete");
    }
}

/// Re-seal TOTP secrets under the newest key.
async fn rotate_secrets(config: &Config, db: &Database) -> anyhow::Result<()> {
    let keyring = Keyring::from_config(config).context("invalid TOTP keys")?;
    let rotator = SecretRotator::new(Arc::new(db.totp.clone()), Arc::new(keyring));
    match rotator.rotate(Scope::Totp).await {
        Ok(summary) => info!(
            subsystem = "server",
            scope = Scope::Totp.as_str(),
            rotated = summary.rotated,
            failed = summary.failures.len(),
            "Secret rotation finished"
        ),
        Err(e) => error!(
            subsystem = "server",
            scope = Scope::Totp.as_str(),
            error = %e,
            "Secret rotation failed"
        ),
    }
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(subsystem = "server", error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(subsystem = "server", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(subsystem = "server", signal = "SIGINT", "Signal received"),
        _ = terminate => info!(subsystem = "server", signal = "SIGTERM", "Signal received"),
    }
}
