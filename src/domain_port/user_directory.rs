use super::StoreError;
use crate::domain_model::{Principal, UserId};

#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// `email` is already normalized by the caller.
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<Principal>, StoreError>;

    async fn update(&self, principal: &Principal) -> Result<(), StoreError>;
}
