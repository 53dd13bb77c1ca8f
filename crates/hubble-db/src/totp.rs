//! Encrypted TOTP secret repository.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use hubble_core::{Error, Result, TotpRepository, TotpSecret};

/// PostgreSQL implementation of TotpRepository.
#[derive(Clone)]
pub struct PgTotpRepository {
    pool: Pool<Postgres>,
}

impl PgTotpRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TotpRepository for PgTotpRepository {
    async fn find_outdated_secrets(&self, latest_version: i16) -> Result<Vec<TotpSecret>> {
        if latest_version <= 0 {
            return Err(Error::InvalidInput(
                "invalid version, expected integer greater than 0".to_string(),
            ));
        }

        let rows = sqlx::query(
            "SELECT id, account_id, hash, version FROM totp_secrets WHERE version < $1 ORDER BY id",
        )
        .bind(latest_version)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| TotpSecret {
                id: row.get("id"),
                account_id: row.get("account_id"),
                hash: row.get("hash"),
                version: row.get("version"),
            })
            .collect())
    }

    async fn batch_update_secrets(&self, secrets: &[TotpSecret]) -> Result<()> {
        if secrets.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for secret in secrets {
            sqlx::query("UPDATE totp_secrets SET hash = $2, version = $3 WHERE id = $1")
                .bind(secret.id)
                .bind(&secret.hash)
                .bind(secret.version)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
