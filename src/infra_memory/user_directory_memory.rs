use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<UserId, Principal>,
    by_email: DashMap<String, UserId>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a principal. The email is normalized on the way in.
    pub fn insert(&self, mut principal: Principal) {
        principal.email = normalize_email(&principal.email);
        if let Some(previous) = self.users.get(&principal.id).map(|p| p.email.clone()) {
            self.by_email.remove(&previous);
        }
        self.by_email.insert(principal.email.clone(), principal.id);
        self.users.insert(principal.id, principal);
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let Some(id) = self.by_email.get(email).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|p| p.clone()))
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<Principal>, StoreError> {
        Ok(self.users.get(&user_id).map(|p| p.clone()))
    }

    async fn update(&self, principal: &Principal) -> Result<(), StoreError> {
        if !self.users.contains_key(&principal.id) {
            return Err(StoreError::NotFound);
        }
        self.insert(principal.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_email_and_id() {
        let dir = InMemoryUserDirectory::new();
        let id = UserId::new_random();
        dir.insert(Principal::new(id, " U@X.com ", "hash"));

        let by_email = dir.find_by_email("u@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.email, "u@x.com");
        assert!(dir.find_by_id(id).await.unwrap().is_some());
        assert!(dir.find_by_email("v@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_hash() {
        let dir = InMemoryUserDirectory::new();
        let id = UserId::new_random();
        dir.insert(Principal::new(id, "u@x.com", "old"));

        let mut p = dir.find_by_id(id).await.unwrap().unwrap();
        p.set_password_hash("new");
        dir.update(&p).await.unwrap();

        let p = dir.find_by_email("u@x.com").await.unwrap().unwrap();
        assert_eq!(p.password_hash(), "new");
    }

    #[tokio::test]
    async fn test_update_unknown_fails() {
        let dir = InMemoryUserDirectory::new();
        let p = Principal::new(UserId::new_random(), "u@x.com", "h");
        assert!(matches!(dir.update(&p).await, Err(StoreError::NotFound)));
    }
}
