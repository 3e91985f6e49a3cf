use super::StoreError;
use std::time::Duration;

/// Denylist of session identifiers, checked on the hot verification path.
#[async_trait::async_trait]
pub trait RevocationList: Send + Sync {
    /// Denies `identifier` until `now + remaining`. A zero `remaining` is a
    /// no-op; an existing entry keeps the later of the two deadlines.
    async fn invalidate(&self, identifier: &str, remaining: Duration) -> Result<(), StoreError>;

    /// `false` for unknown identifiers and for entries past their deadline,
    /// whether or not the backend has evicted them yet.
    async fn is_revoked(&self, identifier: &str) -> Result<bool, StoreError>;

    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}
