use crate::domain_port::*;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

const DENYLIST_EXTEND: &str = include_str!("denylist_extend.lua");

/// Denylist backed by Redis key expiry. Entries vanish on their own, so
/// `cleanup_expired` has nothing to do.
pub struct RedisRevocationList {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRevocationList {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisRevocationList {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }
}

#[async_trait::async_trait]
impl RevocationList for RedisRevocationList {
    async fn invalidate(&self, identifier: &str, remaining: Duration) -> Result<(), StoreError> {
        // PX rejects zero, and a zero lifetime needs no entry anyway.
        let ttl_ms = u64::try_from(remaining.as_millis())
            .map_or(i64::MAX as u64, |ms| ms.min(i64::MAX as u64));
        if ttl_ms == 0 {
            return Ok(());
        }

        let key = self.key(identifier);
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(DENYLIST_EXTEND)
            .key(&key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn is_revoked(&self, identifier: &str) -> Result<bool, StoreError> {
        let key = self.key(identifier);
        let mut conn = self.conn.clone();
        let hit: bool = conn
            .exists(&key)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(hit)
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }
}
