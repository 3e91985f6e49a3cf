use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryTokenStore {
    refresh: DashMap<String, RefreshTokenRecord>,
    resets: DashMap<String, PasswordResetTokenRecord>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh.len()
    }

    pub fn active_refresh_tokens(&self, user_id: UserId) -> usize {
        self.refresh
            .iter()
            .filter(|r| r.user_id == user_id && r.is_active())
            .count()
    }
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn save_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        match self.refresh.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                let record = RefreshTokenRecord {
                    id: Uuid::new_v4(),
                    user_id: token.user_id,
                    token_hash: token.token_hash,
                    client: token.client,
                    issued_at: Utc::now(),
                    expires_at: token.expires_at,
                    revoked_at: None,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        self.refresh
            .get(token_hash)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        // The shard write lock held by `get_mut` makes check-and-set atomic.
        let Some(mut record) = self.refresh.get_mut(token_hash) else {
            return Ok(false);
        };
        if record.revoked_at.is_some() {
            return Ok(false);
        }
        record.revoked_at = Some(Utc::now());
        Ok(true)
    }

    async fn revoke_all_user_tokens(&self, user_id: UserId) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut revoked = 0;
        for mut record in self.refresh.iter_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn save_password_reset_token(
        &self,
        token: NewPasswordResetToken,
    ) -> Result<PasswordResetTokenRecord, StoreError> {
        match self.resets.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                let record = PasswordResetTokenRecord {
                    id: Uuid::new_v4(),
                    user_id: token.user_id,
                    token_hash: token.token_hash,
                    expires_at: token.expires_at,
                    used_at: None,
                    created_at: Utc::now(),
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<PasswordResetTokenRecord, StoreError> {
        self.resets
            .get(token_hash)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn mark_password_reset_used(&self, token_hash: &str) -> Result<bool, StoreError> {
        let Some(mut record) = self.resets.get_mut(token_hash) else {
            return Ok(false);
        };
        if record.used_at.is_some() {
            return Ok(false);
        }
        record.used_at = Some(Utc::now());
        Ok(true)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let start = self.refresh.len() + self.resets.len();
        self.refresh.retain(|_, r| r.expires_at >= before);
        self.resets.retain(|_, r| r.expires_at >= before);
        let end = self.refresh.len() + self.resets.len();
        Ok(start.saturating_sub(end) as u64)
    }
}
