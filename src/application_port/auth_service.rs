use super::{RequestContext, TokenError};
use crate::domain_model::{AuthTokens, Claims, TokenKind, UserId};
use crate::domain_port::StoreError;
use serde::Deserialize;
use std::time::Duration;

/// Errors visible to callers of `AuthService`.
///
/// Credential and token failures are deliberately coarse; the precise cause
/// is only reported to the diagnostic logger.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token malformed")]
    TokenMalformed,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token type: expected {expected} token")]
    TokenKindMismatch { expected: TokenKind },
    #[error("token revoked or reused")]
    TokenRevokedOrReused,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("key resolution error: {0}")]
    KeyResolution(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::KindMismatch { expected, .. } => AuthError::TokenKindMismatch { expected },
            TokenError::Malformed(_) | TokenError::InvalidSignature | TokenError::UnknownKey(_) => {
                AuthError::TokenMalformed
            }
            TokenError::KeyResolution(msg) => AuthError::KeyResolution(msg),
            TokenError::Configuration(msg) => AuthError::Configuration(msg),
            TokenError::Signing(msg) => AuthError::InternalError(msg),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AuthError::StorageUnavailable(msg),
            other => AuthError::InternalError(other.to_string()),
        }
    }
}

/// What to do when a refresh token that was already rotated or revoked is
/// presented again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReusePolicy {
    /// Revoke every refresh token of the user.
    #[default]
    RevokeAll,
    /// Only reject the call.
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub denylist_entries: u64,
    pub token_records: u64,
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, AuthError>;

    /// Rotates a refresh token. Each refresh token is accepted at most once.
    async fn refresh_token(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
    ) -> Result<AuthTokens, AuthError>;

    async fn logout(&self, ctx: &RequestContext, refresh_token: &str) -> Result<(), AuthError>;

    /// Returns `None` for unknown emails; the caller must treat both outcomes
    /// the same way towards the client.
    async fn request_password_reset(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Option<String>, AuthError>;

    async fn reset_password(
        &self,
        ctx: &RequestContext,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    /// Hot path for request authentication: access-kind check plus denylist.
    async fn authenticate(
        &self,
        ctx: &RequestContext,
        access_token: &str,
    ) -> Result<Claims, AuthError>;

    async fn revoke_all_sessions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<u64, AuthError>;

    async fn cleanup(
        &self,
        ctx: &RequestContext,
        retention: Duration,
    ) -> Result<CleanupReport, AuthError>;
}
