use crate::domain_model::{AccessToken, Claims, RefreshToken, TokenKind, UserId};
use chrono::{DateTime, Utc};

/// Fine-grained codec failures.
///
/// These never cross the `AuthService` boundary as-is; they are collapsed
/// into the coarse `AuthError` taxonomy and only show up in diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid token type: expected {expected} token")]
    KindMismatch { expected: TokenKind, found: TokenKind },
    #[error("no verification key for kid {0:?}")]
    UnknownKey(String),
    #[error("key set unavailable: {0}")]
    KeyResolution(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("codec configuration error: {0}")]
    Configuration(String),
}

#[async_trait::async_trait]
pub trait TokenCodec: Send + Sync {
    async fn issue_access_token(
        &self,
        user: UserId,
        email: &str,
        jti: Option<String>,
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError>;

    async fn issue_refresh_token(
        &self,
        user: UserId,
        jti: String,
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError>;

    /// Signature, expiry, issuer and audience only. The kind is not checked.
    async fn verify(&self, token: &str) -> Result<Claims, TokenError>;

    async fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.verify(token).await?;
        expect_kind(claims, TokenKind::Access)
    }

    async fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.verify(token).await?;
        expect_kind(claims, TokenKind::Refresh)
    }

    /// Reads the expiry (`exp_ms`, else `exp`) without checking the signature.
    fn expiry_of(&self, token: &str) -> Result<DateTime<Utc>, TokenError>;

    fn is_expired(&self, token: &str) -> Result<bool, TokenError> {
        Ok(Utc::now() >= self.expiry_of(token)?)
    }
}

fn expect_kind(claims: Claims, expected: TokenKind) -> Result<Claims, TokenError> {
    if claims.kind != expected {
        return Err(TokenError::KindMismatch {
            expected,
            found: claims.kind,
        });
    }
    Ok(claims)
}
