use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_http::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::{Jwt, Settings};
use anyhow::{Context, anyhow};
use jsonwebtoken::Algorithm;
use sqlx::{MySql, Pool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Everything wired from settings: the codec, the backends, and the service
/// composed over them.
pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub token_codec: Arc<dyn TokenCodec>,
    retention: Duration,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let token_codec: Arc<dyn TokenCodec> = Arc::new(build_token_codec(&settings.jwt).await?);

        let pool = match &settings.mysql {
            Some(mysql) => Some(
                Pool::<MySql>::connect(&mysql.dsn)
                    .await
                    .context("connecting to mysql")?,
            ),
            None => None,
        };
        let mysql_pool = || {
            pool.clone()
                .ok_or_else(|| anyhow!("mysql backend selected but [mysql] is not configured"))
        };

        let token_store: Arc<dyn TokenStore> = match settings.auth.token_store.as_str() {
            "memory" => Arc::new(InMemoryTokenStore::new()),
            "mysql" => Arc::new(MySqlTokenStore::new(mysql_pool()?)),
            other => return Err(anyhow!("Unknown token store backend: {}", other)),
        };

        let revocation_list: Arc<dyn RevocationList> =
            match settings.auth.revocation_list.as_str() {
                "memory" => Arc::new(InMemoryRevocationList::new()),
                "mysql" => Arc::new(MySqlRevocationList::new(mysql_pool()?)),
                "redis" => {
                    let redis = settings.redis.as_ref().ok_or_else(|| {
                        anyhow!("redis backend selected but [redis] is not configured")
                    })?;
                    let redis_client = redis::Client::open(redis.dsn.as_str())?;
                    let redis_manager = redis_client.get_connection_manager().await?;
                    Arc::new(RedisRevocationList::new(redis_manager, redis.prefix.clone()))
                }
                other => return Err(anyhow!("Unknown revocation list backend: {}", other)),
            };

        let user_directory: Arc<dyn UserDirectory> = match settings.auth.user_directory.as_str() {
            "memory" => Arc::new(InMemoryUserDirectory::new()),
            "mysql" => Arc::new(MySqlUserDirectory::new(mysql_pool()?)),
            other => return Err(anyhow!("Unknown user directory backend: {}", other)),
        };

        let credential_hasher: Arc<dyn CredentialHasher> =
            Arc::new(Argon2PasswordHasher::default());
        let digest = TokenDigest::new(settings.auth.token_hash_key.as_bytes())?;

        let auth_service: Arc<dyn AuthService> = Arc::new(
            RealAuthService::try_new(
                user_directory,
                credential_hasher,
                token_codec.clone(),
                token_store,
                revocation_list,
                digest,
                AuthServiceConfig {
                    reset_token_ttl: Duration::from_secs(settings.auth.reset_token_ttl_secs),
                    reuse_policy: settings.auth.reuse_policy,
                },
            )
            .await?
            .with_logger(tracing::info_span!("auth")),
        );

        info!(
            token_store = %settings.auth.token_store,
            revocation_list = %settings.auth.revocation_list,
            user_directory = %settings.auth.user_directory,
            "server started"
        );

        Ok(Self {
            auth_service,
            token_codec,
            retention: Duration::from_secs(u64::from(settings.auth.retention_days) * SECS_PER_DAY),
            pool,
        })
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

/// Builds the codec described by `[jwt]`, reading key files and priming the
/// remote key set when one is configured.
pub async fn build_token_codec(jwt: &Jwt) -> anyhow::Result<JwtCodec> {
    let algorithm = Algorithm::from_str(&jwt.algorithm)
        .map_err(|e| anyhow!("unsupported jwt algorithm {:?}: {}", jwt.algorithm, e))?;

    let private_key_pem = match &jwt.private_key_path {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("reading private key {path}"))?,
        ),
        None => None,
    };

    let mut public_keys_pem = HashMap::with_capacity(jwt.public_key_paths.len());
    for (kid, path) in &jwt.public_key_paths {
        let pem = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading public key {path}"))?;
        public_keys_pem.insert(kid.clone(), pem);
    }

    let remote = match &jwt.jwks {
        Some(jwks) => {
            let fetcher = Arc::new(HttpKeySetFetcher::new(
                jwks.url.clone(),
                Duration::from_secs(jwks.timeout_secs),
            )?);
            let cache = Arc::new(JwksCache::new(
                fetcher,
                JwksCacheConfig {
                    ttl: Duration::from_secs(jwks.ttl_secs),
                    miss_cooldown: Duration::from_secs(jwks.miss_cooldown_secs),
                },
            ));
            match cache.prime().await {
                Ok(count) => info!(url = %jwks.url, keys = count, "remote key set loaded"),
                // Not fatal: resolution retries on first use.
                Err(e) => warn!(url = %jwks.url, error = %e, "remote key set unavailable"),
            }
            Some(cache)
        }
        None => None,
    };

    let codec = JwtCodec::new(JwtConfig {
        algorithm,
        issuer: jwt.issuer.clone(),
        audience: jwt.audience.clone(),
        access_ttl: Duration::from_secs(jwt.access_ttl_secs),
        refresh_ttl: Duration::from_secs(jwt.refresh_ttl_secs),
        keys: KeyMaterial {
            secret: jwt.secret.as_ref().map(|s| s.clone().into_bytes()),
            private_key_pem,
            signing_kid: jwt.signing_kid.clone(),
            public_keys_pem,
            remote,
        },
    })?;
    debug!(?codec, "token codec ready");
    Ok(codec)
}
