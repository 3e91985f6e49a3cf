use crate::application_port::TokenError;
use crate::domain_port::KeySetFetcher;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// How long a fetched key set is served without refetching.
    pub ttl: Duration,
    /// Minimum spacing between refetches triggered by an unknown kid.
    pub miss_cooldown: Duration,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        JwksCacheConfig {
            ttl: Duration::from_secs(60 * 60),
            miss_cooldown: Duration::from_secs(30),
        }
    }
}

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

enum Lookup {
    Found(DecodingKey),
    /// The cache is fresh and recently refreshed, the kid is simply unknown.
    Unknown,
    NeedsFetch,
}

/// Remote key set with a TTL-bounded local copy.
///
/// Reads share an `RwLock`; refetches are serialised by a separate mutex so
/// a burst of misses produces a single request. A failed fetch keeps serving
/// the previous copy, and with no copy at all resolution fails. After a
/// failure no refetch is attempted until `miss_cooldown` has passed.
pub struct JwksCache {
    fetcher: Arc<dyn KeySetFetcher>,
    cfg: JwksCacheConfig,
    state: RwLock<Option<CachedKeySet>>,
    /// Held while fetching; remembers when the last fetch failed.
    refresh: Mutex<Option<Instant>>,
}

impl JwksCache {
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, cfg: JwksCacheConfig) -> Self {
        JwksCache {
            fetcher,
            cfg,
            state: RwLock::new(None),
            refresh: Mutex::new(None),
        }
    }

    /// Fetches the key set ahead of the first verification.
    pub async fn prime(&self) -> Result<usize, TokenError> {
        let mut last_failure = self.refresh.lock().await;
        let keys = self
            .fetcher
            .fetch()
            .await
            .map_err(|e| TokenError::KeyResolution(e.to_string()))?;
        let count = keys.keys.len();
        self.store(keys).await;
        *last_failure = None;
        Ok(count)
    }

    pub async fn resolve(&self, kid: &str) -> Result<DecodingKey, TokenError> {
        match self.lookup(kid).await? {
            Lookup::Found(key) => return Ok(key),
            Lookup::Unknown => return Err(TokenError::UnknownKey(kid.to_string())),
            Lookup::NeedsFetch => {}
        }

        let mut last_failure = self.refresh.lock().await;

        // Another task may have refreshed while we waited for the lock.
        match self.lookup(kid).await? {
            Lookup::Found(key) => return Ok(key),
            Lookup::Unknown => return Err(TokenError::UnknownKey(kid.to_string())),
            Lookup::NeedsFetch => {}
        }

        if let Some(failed_at) = *last_failure {
            if failed_at.elapsed() < self.cfg.miss_cooldown {
                return self.stale(kid).await.unwrap_or_else(|| {
                    Err(TokenError::KeyResolution(
                        "key set fetch failed recently".to_string(),
                    ))
                });
            }
        }

        debug!(kid, "fetching remote key set");
        match self.fetcher.fetch().await {
            Ok(keys) => {
                *last_failure = None;
                let found = find_key(&keys, kid)?;
                self.store(keys).await;
                found.ok_or_else(|| TokenError::UnknownKey(kid.to_string()))
            }
            Err(e) => {
                *last_failure = Some(Instant::now());
                match self.stale(kid).await {
                    Some(res) => {
                        warn!(error = %e, "key set fetch failed, serving cached copy");
                        res
                    }
                    None => Err(TokenError::KeyResolution(e.to_string())),
                }
            }
        }
    }

    /// Resolves against whatever copy is held, regardless of age.
    async fn stale(&self, kid: &str) -> Option<Result<DecodingKey, TokenError>> {
        let state = self.state.read().await;
        let cached = state.as_ref()?;
        Some(
            find_key(&cached.keys, kid)
                .and_then(|key| key.ok_or_else(|| TokenError::UnknownKey(kid.to_string()))),
        )
    }

    async fn lookup(&self, kid: &str) -> Result<Lookup, TokenError> {
        let state = self.state.read().await;
        let Some(cached) = state.as_ref() else {
            return Ok(Lookup::NeedsFetch);
        };
        let age = cached.fetched_at.elapsed();
        if age >= self.cfg.ttl {
            return Ok(Lookup::NeedsFetch);
        }
        if let Some(key) = find_key(&cached.keys, kid)? {
            return Ok(Lookup::Found(key));
        }
        if age < self.cfg.miss_cooldown {
            return Ok(Lookup::Unknown);
        }
        Ok(Lookup::NeedsFetch)
    }

    async fn store(&self, keys: JwkSet) {
        let mut state = self.state.write().await;
        *state = Some(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        });
    }
}

fn find_key(keys: &JwkSet, kid: &str) -> Result<Option<DecodingKey>, TokenError> {
    keys.find(kid)
        .map(|jwk| {
            DecodingKey::from_jwk(jwk)
                .map_err(|e| TokenError::KeyResolution(format!("unusable jwk {kid:?}: {e}")))
        })
        .transpose()
}
