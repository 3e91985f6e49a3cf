use crate::domain_port::KeySetFetcher;
use anyhow::Context;
use jsonwebtoken::jwk::JwkSet;
use std::time::Duration;

/// Fetches a JWKS document over HTTPS.
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySetFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building jwks http client")?;
        Ok(HttpKeySetFetcher {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self) -> anyhow::Result<JwkSet> {
        let keys = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.url))?
            .error_for_status()?
            .json::<JwkSet>()
            .await
            .context("decoding jwks document")?;
        Ok(keys)
    }
}
