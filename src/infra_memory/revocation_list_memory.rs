use crate::domain_model::deadline_after;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

#[derive(Default)]
pub struct InMemoryRevocationList {
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemoryRevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl RevocationList for InMemoryRevocationList {
    async fn invalidate(&self, identifier: &str, remaining: Duration) -> Result<(), StoreError> {
        if remaining.is_zero() {
            return Ok(());
        }
        let deadline =
            deadline_after(Utc::now(), remaining).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .entry(identifier.to_string())
            .and_modify(|d| {
                if deadline > *d {
                    *d = deadline;
                }
            })
            .or_insert(deadline);
        Ok(())
    }

    async fn is_revoked(&self, identifier: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        Ok(self.entries.get(identifier).is_some_and(|d| *d > now))
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, d| *d > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
