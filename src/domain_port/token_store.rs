use super::StoreError;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

/// Hash-keyed persistence for refresh and password-reset tokens.
///
/// Raw tokens never reach an implementation; every lookup is by digest.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Assigns id and issue time. Fails with `Duplicate` on a known hash.
    async fn save_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_refresh_token(&self, token_hash: &str)
    -> Result<RefreshTokenRecord, StoreError>;

    /// Atomic "revoke if still active". Returns `true` only for the call that
    /// actually flipped the record; concurrent callers observe `false`.
    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError>;

    async fn revoke_all_user_tokens(&self, user_id: UserId) -> Result<u64, StoreError>;

    async fn save_password_reset_token(
        &self,
        token: NewPasswordResetToken,
    ) -> Result<PasswordResetTokenRecord, StoreError>;

    async fn find_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<PasswordResetTokenRecord, StoreError>;

    /// Sets `used_at` once. Never touches `expires_at`.
    async fn mark_password_reset_used(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Retention cleanup: deletes records that expired before `before`.
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
