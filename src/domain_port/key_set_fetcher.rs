use jsonwebtoken::jwk::JwkSet;

/// Source of the published verification keys.
#[async_trait::async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<JwkSet>;
}
