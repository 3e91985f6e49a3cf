use super::util::{store_err, uid_as_bytes, uid_from_bytes, uuid_from_bytes};
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use std::net::IpAddr;
use uuid::Uuid;

/// Relational token store. `revoked_at IS NULL` guards every revoke so the
/// row count tells exactly one caller that it won.
pub struct MySqlTokenStore {
    pool: MySqlPool,
}

impl MySqlTokenStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlTokenStore { pool }
    }

    fn row_to_refresh(row: MySqlRow) -> Result<RefreshTokenRecord, StoreError> {
        let id: Vec<u8> = row.try_get("id").map_err(store_err)?;
        let user_id: Vec<u8> = row.try_get("user_id").map_err(store_err)?;
        let ip_address: Option<String> = row.try_get("ip_address").map_err(store_err)?;

        Ok(RefreshTokenRecord {
            id: uuid_from_bytes(&id)?,
            user_id: uid_from_bytes(&user_id)?,
            token_hash: row.try_get("token_hash").map_err(store_err)?,
            client: ClientContext {
                user_agent: row.try_get("user_agent").map_err(store_err)?,
                ip_address: ip_address.and_then(|ip| ip.parse::<IpAddr>().ok()),
            },
            issued_at: row.try_get("issued_at").map_err(store_err)?,
            expires_at: row.try_get("expires_at").map_err(store_err)?,
            revoked_at: row.try_get("revoked_at").map_err(store_err)?,
        })
    }

    fn row_to_reset(row: MySqlRow) -> Result<PasswordResetTokenRecord, StoreError> {
        let id: Vec<u8> = row.try_get("id").map_err(store_err)?;
        let user_id: Vec<u8> = row.try_get("user_id").map_err(store_err)?;

        Ok(PasswordResetTokenRecord {
            id: uuid_from_bytes(&id)?,
            user_id: uid_from_bytes(&user_id)?,
            token_hash: row.try_get("token_hash").map_err(store_err)?,
            expires_at: row.try_get("expires_at").map_err(store_err)?,
            used_at: row.try_get("used_at").map_err(store_err)?,
            created_at: row.try_get("created_at").map_err(store_err)?,
        })
    }
}

#[async_trait::async_trait]
impl TokenStore for MySqlTokenStore {
    async fn save_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            client: token.client,
            issued_at: Utc::now(),
            expires_at: token.expires_at,
            revoked_at: None,
        };

        sqlx::query(
            r#"
INSERT INTO refresh_token (id, user_id, token_hash, user_agent, ip_address, issued_at, expires_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(record.id.as_bytes() as &[u8])
        .bind(uid_as_bytes(&record.user_id))
        .bind(&record.token_hash)
        .bind(record.client.user_agent.as_deref())
        .bind(record.client.ip_address.map(|ip| ip.to_string()))
        .bind(record.issued_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(record)
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let row: Option<MySqlRow> = sqlx::query(
            r#"
SELECT id, user_id, token_hash, user_agent, ip_address, issued_at, expires_at, revoked_at
FROM refresh_token
WHERE token_hash = ?
"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::row_to_refresh)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET revoked_at = ?
WHERE token_hash = ? AND revoked_at IS NULL
"#,
        )
        .bind(Utc::now())
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_user_tokens(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET revoked_at = ?
WHERE user_id = ? AND revoked_at IS NULL
"#,
        )
        .bind(Utc::now())
        .bind(uid_as_bytes(&user_id))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }

    async fn save_password_reset_token(
        &self,
        token: NewPasswordResetToken,
    ) -> Result<PasswordResetTokenRecord, StoreError> {
        let record = PasswordResetTokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
INSERT INTO password_reset_token (id, user_id, token_hash, expires_at, created_at)
VALUES (?, ?, ?, ?, ?)
"#,
        )
        .bind(record.id.as_bytes() as &[u8])
        .bind(uid_as_bytes(&record.user_id))
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(record)
    }

    async fn find_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<PasswordResetTokenRecord, StoreError> {
        let row: Option<MySqlRow> = sqlx::query(
            r#"
SELECT id, user_id, token_hash, expires_at, used_at, created_at
FROM password_reset_token
WHERE token_hash = ?
"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::row_to_reset)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    async fn mark_password_reset_used(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE password_reset_token
SET used_at = ?
WHERE token_hash = ? AND used_at IS NULL
"#,
        )
        .bind(Utc::now())
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let refresh = sqlx::query("DELETE FROM refresh_token WHERE expires_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        let resets = sqlx::query("DELETE FROM password_reset_token WHERE expires_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(refresh.rows_affected() + resets.rows_affected())
    }
}
