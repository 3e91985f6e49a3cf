use crate::application_port::ReusePolicy;
use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub jwt: Jwt,
    pub log: Log,
    pub mysql: Option<Mysql>,
    pub redis: Option<Redis>,
}

#[derive(Deserialize)]
pub struct Auth {
    pub token_store: String,     // "memory" or "mysql"
    pub revocation_list: String, // "memory", "mysql" or "redis"
    pub user_directory: String,  // "memory" or "mysql"
    #[serde(default)]
    pub reuse_policy: ReusePolicy,
    pub reset_token_ttl_secs: u64,
    pub retention_days: u32,
    pub token_hash_key: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("token_store", &self.token_store)
            .field("revocation_list", &self.revocation_list)
            .field("user_directory", &self.user_directory)
            .field("reuse_policy", &self.reuse_policy)
            .field("reset_token_ttl_secs", &self.reset_token_ttl_secs)
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
pub struct Jwt {
    pub algorithm: String, // e.g. "HS256", "ES256", "RS256"
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub secret: Option<String>,
    pub private_key_path: Option<String>,
    pub signing_kid: Option<String>,
    #[serde(default)]
    pub public_key_paths: HashMap<String, String>,
    pub jwks: Option<Jwks>,
}

impl fmt::Debug for Jwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwt")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("signing_kid", &self.signing_kid)
            .field("public_key_paths", &self.public_key_paths)
            .field("jwks", &self.jwks)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub url: String,
    pub ttl_secs: u64,
    pub miss_cooldown_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Deserialize)]
pub struct Mysql {
    pub dsn: String,
}

impl fmt::Debug for Mysql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mysql").finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
pub struct Redis {
    pub dsn: String,
    pub prefix: String,
}

impl fmt::Debug for Redis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redis")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

/// Secrets come from the environment, e.g. `COUNTERSIGN__JWT__SECRET`.
const ENV_PREFIX: &str = "COUNTERSIGN";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
