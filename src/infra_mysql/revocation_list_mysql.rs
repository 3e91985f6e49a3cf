use super::util::{deadline_for_column, store_err};
use crate::domain_port::*;
use chrono::Utc;
use sqlx::MySqlPool;
use std::time::Duration;

/// Shared denylist for multi-instance deployments. Rows outlive their
/// deadline until `cleanup_expired` runs; reads ignore them regardless.
pub struct MySqlRevocationList {
    pool: MySqlPool,
}

impl MySqlRevocationList {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlRevocationList { pool }
    }
}

#[async_trait::async_trait]
impl RevocationList for MySqlRevocationList {
    async fn invalidate(&self, identifier: &str, remaining: Duration) -> Result<(), StoreError> {
        if remaining.is_zero() {
            return Ok(());
        }
        let expires_at = deadline_for_column(Utc::now(), remaining);

        sqlx::query(
            r#"
INSERT INTO token_denylist (identifier, expires_at)
VALUES (?, ?)
ON DUPLICATE KEY UPDATE expires_at = GREATEST(expires_at, VALUES(expires_at))
"#,
        )
        .bind(identifier)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn is_revoked(&self, identifier: &str) -> Result<bool, StoreError> {
        let hit: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM token_denylist WHERE identifier = ? AND expires_at > ?",
        )
        .bind(identifier)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(hit.is_some())
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM token_denylist WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}
