//! Re-encryption of stored secrets onto the newest key version.
//!
//! Outdated TOTP secrets are split into chunks that are re-sealed
//! concurrently, one task per chunk. Per-record failures flow through a
//! channel to a collector task and never abort the run; a chunk whose batch
//! write fails leaves its records at their old version for the next run.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use hubble_core::defaults::ROTATION_CHUNK_SIZE;
use hubble_core::{Error, Result, TotpRepository, TotpSecret};

use crate::keyring::Keyring;

/// Secret families that can be rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Totp,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Totp => "totp",
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "totp" => Ok(Scope::Totp),
            other => Err(Error::UnknownScope(other.to_string())),
        }
    }
}

/// A record left at its previous version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationFailure {
    pub id: i32,
    pub reason: String,
}

/// Outcome of one rotation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationSummary {
    pub outdated: usize,
    pub rotated: usize,
    pub skipped: usize,
    pub failed_chunks: usize,
    pub failures: Vec<RotationFailure>,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    rotated: usize,
    skipped: usize,
}

pub struct SecretRotator {
    repo: Arc<dyn TotpRepository>,
    keyring: Arc<Keyring>,
    chunk_size: usize,
}

impl SecretRotator {
    pub fn new(repo: Arc<dyn TotpRepository>, keyring: Arc<Keyring>) -> Self {
        Self {
            repo,
            keyring,
            chunk_size: ROTATION_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Rotate a scope given by name; unknown names are `Error::UnknownScope`.
    pub async fn rotate_scope(&self, scope: &str) -> Result<RotationSummary> {
        self.rotate(scope.parse()?).await
    }

    pub async fn rotate(&self, scope: Scope) -> Result<RotationSummary> {
        debug!(
            subsystem = "crypto",
            component = "rotator",
            scope = scope.as_str(),
            "Rotating secrets"
        );
        match scope {
            Scope::Totp => self.rotate_totp().await,
        }
    }

    async fn rotate_totp(&self) -> Result<RotationSummary> {
        let start = Instant::now();
        let latest = self.keyring.latest_version();
        let outdated = self.repo.find_outdated_secrets(latest).await?;

        if outdated.is_empty() {
            info!(
                subsystem = "crypto",
                component = "rotator",
                scope = "totp",
                "No outdated TOTP secrets found"
            );
            return Ok(RotationSummary::default());
        }

        let mut summary = RotationSummary {
            outdated: outdated.len(),
            ..Default::default()
        };
        let chunks: Vec<Vec<TotpSecret>> = outdated
            .chunks(self.chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let (failures_tx, mut failures_rx) = mpsc::channel::<RotationFailure>(chunks.len());
        let collector = tokio::spawn(async move {
            let mut failures = Vec::new();
            while let Some(failure) = failures_rx.recv().await {
                failures.push(failure);
            }
            failures
        });

        let mut workers = JoinSet::new();
        for chunk in chunks {
            let repo = Arc::clone(&self.repo);
            let keyring = Arc::clone(&self.keyring);
            let failures = failures_tx.clone();
            workers.spawn(async move { process_chunk(repo, keyring, latest, chunk, failures).await });
        }
        // Collector finishes once every worker's sender is gone.
        drop(failures_tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    summary.rotated += outcome.rotated;
                    summary.skipped += outcome.skipped;
                }
                Ok(Err(e)) => {
                    summary.failed_chunks += 1;
                    error!(
                        subsystem = "crypto",
                        component = "rotator",
                        error = %e,
                        "Failed to rotate TOTP secrets chunk"
                    );
                }
                Err(e) => {
                    summary.failed_chunks += 1;
                    error!(
                        subsystem = "crypto",
                        component = "rotator",
                        error = %e,
                        "TOTP rotation worker aborted"
                    );
                }
            }
        }

        summary.failures = collector.await.unwrap_or_else(|e| {
            warn!(
                subsystem = "crypto",
                component = "rotator",
                error = %e,
                "Failure collector aborted"
            );
            Vec::new()
        });
        for failure in &summary.failures {
            error!(
                subsystem = "crypto",
                component = "rotator",
                id = failure.id,
                error = %failure.reason,
                "Failed to rotate TOTP secret"
            );
        }

        info!(
            subsystem = "crypto",
            component = "rotator",
            scope = "totp",
            latest_version = latest,
            outdated = summary.outdated,
            rotated = summary.rotated,
            failed = summary.failures.len(),
            failed_chunks = summary.failed_chunks,
            duration_ms = start.elapsed().as_millis() as u64,
            "TOTP secret rotation complete"
        );
        Ok(summary)
    }
}

async fn process_chunk(
    repo: Arc<dyn TotpRepository>,
    keyring: Arc<Keyring>,
    latest: i16,
    chunk: Vec<TotpSecret>,
    failures: mpsc::Sender<RotationFailure>,
) -> Result<ChunkOutcome> {
    let mut outcome = ChunkOutcome::default();
    let mut batch = Vec::with_capacity(chunk.len());

    for mut secret in chunk {
        // Another instance may already have rotated this record.
        if secret.version == latest {
            debug!(
                subsystem = "crypto",
                component = "rotator",
                id = secret.id,
                "Skipping secret already on the latest version"
            );
            outcome.skipped += 1;
            continue;
        }

        let resealed = keyring
            .open(secret.version, &secret.hash)
            .and_then(|plaintext| keyring.seal(&plaintext));
        match resealed {
            Ok((version, hash)) => {
                secret.hash = hash;
                secret.version = version;
                debug!(
                    subsystem = "crypto",
                    component = "rotator",
                    id = secret.id,
                    "[pre-commit] rotated TOTP secret"
                );
                batch.push(secret);
            }
            Err(e) => {
                let _ = failures
                    .send(RotationFailure {
                        id: secret.id,
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
    }

    if !batch.is_empty() {
        repo.batch_update_secrets(&batch).await?;
        outcome.rotated = batch.len();
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hubble_core::TotpKey;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeTotpRepo {
        secrets: Mutex<Vec<TotpSecret>>,
        fail_batches: bool,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TotpRepository for FakeTotpRepo {
        async fn find_outdated_secrets(&self, latest_version: i16) -> Result<Vec<TotpSecret>> {
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.version < latest_version)
                .cloned()
                .collect())
        }

        async fn batch_update_secrets(&self, secrets: &[TotpSecret]) -> Result<()> {
            if self.fail_batches {
                return Err(Error::Internal("batch write failed".into()));
            }
            self.batches.lock().unwrap().push(secrets.len());
            let mut stored = self.secrets.lock().unwrap();
            for update in secrets {
                if let Some(s) = stored.iter_mut().find(|s| s.id == update.id) {
                    *s = update.clone();
                }
            }
            Ok(())
        }
    }

    fn keys(versions: &[i16]) -> Keyring {
        let keys: Vec<TotpKey> = versions
            .iter()
            .map(|v| TotpKey {
                version: *v,
                secret: format!("secret-material-v{v}"),
            })
            .collect();
        Keyring::new(keys.iter()).unwrap()
    }

    fn sealed_secret(keyring: &Keyring, id: i32, version: i16) -> TotpSecret {
        let key = keyring.get(version).unwrap();
        TotpSecret {
            id,
            account_id: Uuid::new_v4(),
            hash: crate::cipher::seal(key, format!("otp-{id}").as_bytes()).unwrap(),
            version,
        }
    }

    #[tokio::test]
    async fn test_rotates_all_outdated_in_chunks() {
        let keyring = Arc::new(keys(&[1, 2]));
        let repo = Arc::new(FakeTotpRepo::default());
        {
            let mut secrets = repo.secrets.lock().unwrap();
            for id in 1..=20 {
                secrets.push(sealed_secret(&keyring, id, 1));
            }
            secrets.push(sealed_secret(&keyring, 21, 2));
        }

        let rotator = SecretRotator::new(repo.clone(), keyring.clone());
        let summary = rotator.rotate(Scope::Totp).await.unwrap();

        assert_eq!(summary.outdated, 20);
        assert_eq!(summary.rotated, 20);
        assert!(summary.failures.is_empty());
        let mut batches = repo.batches.lock().unwrap().clone();
        batches.sort_unstable();
        assert_eq!(batches, vec![4, 8, 8]);

        for secret in repo.secrets.lock().unwrap().iter() {
            assert_eq!(secret.version, 2);
            let plain = keyring.open(2, &secret.hash).unwrap();
            assert_eq!(plain.as_slice(), format!("otp-{}", secret.id).as_bytes());
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_recorded_not_fatal() {
        let full = keys(&[1, 2, 3]);
        let repo = Arc::new(FakeTotpRepo::default());
        {
            let mut secrets = repo.secrets.lock().unwrap();
            secrets.push(sealed_secret(&full, 1, 1));
            secrets.push(sealed_secret(&full, 2, 2));
        }

        // Version 2's key has been retired from the configuration.
        let keyring = Arc::new(keys(&[1, 3]));
        let summary = SecretRotator::new(repo.clone(), keyring)
            .rotate_scope("totp")
            .await
            .unwrap();

        assert_eq!(summary.rotated, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].id, 2);
        assert_eq!(summary.failures[0].reason, "key not found for version 2");

        let stored = repo.secrets.lock().unwrap();
        assert_eq!(stored.iter().find(|s| s.id == 1).unwrap().version, 3);
        assert_eq!(stored.iter().find(|s| s.id == 2).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_undecryptable_secret_is_recorded() {
        let keyring = Arc::new(keys(&[1, 2]));
        let repo = Arc::new(FakeTotpRepo::default());
        repo.secrets.lock().unwrap().push(TotpSecret {
            id: 9,
            account_id: Uuid::new_v4(),
            hash: vec![0u8; 40],
            version: 1,
        });

        let summary = SecretRotator::new(repo, keyring)
            .rotate(Scope::Totp)
            .await
            .unwrap();
        assert_eq!(summary.rotated, 0);
        assert_eq!(summary.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_failure_leaves_versions_untouched() {
        let keyring = Arc::new(keys(&[1, 2]));
        let repo = Arc::new(FakeTotpRepo {
            fail_batches: true,
            ..Default::default()
        });
        {
            let mut secrets = repo.secrets.lock().unwrap();
            for id in 1..=10 {
                secrets.push(sealed_secret(&keyring, id, 1));
            }
        }

        let summary = SecretRotator::new(repo.clone(), keyring)
            .with_chunk_size(4)
            .rotate(Scope::Totp)
            .await
            .unwrap();

        assert_eq!(summary.failed_chunks, 3);
        assert_eq!(summary.rotated, 0);
        assert!(repo.secrets.lock().unwrap().iter().all(|s| s.version == 1));
    }

    #[tokio::test]
    async fn test_nothing_outdated() {
        let keyring = Arc::new(keys(&[1]));
        let repo = Arc::new(FakeTotpRepo::default());
        let summary = SecretRotator::new(repo, keyring)
            .rotate(Scope::Totp)
            .await
            .unwrap();
        assert_eq!(summary, RotationSummary::default());
    }

    #[tokio::test]
    async fn test_unknown_scope() {
        let rotator = SecretRotator::new(Arc::new(FakeTotpRepo::default()), Arc::new(keys(&[1])));
        let err = rotator.rotate_scope("api_keys").await.unwrap_err();
        assert!(matches!(err, Error::UnknownScope(s) if s == "api_keys"));
    }
}
