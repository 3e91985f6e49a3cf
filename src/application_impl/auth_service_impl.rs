use super::{TokenDigest, random_token};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Span, debug, warn};
use uuid::Uuid;

/// Password checked against when the email is unknown, so that a miss costs
/// the same hashing work as a wrong password.
const DUMMY_PASSWORD: &str = "countersign-timing-equalizer";

#[derive(Debug, Clone)]
pub struct AuthServiceConfig {
    pub reset_token_ttl: Duration,
    pub reuse_policy: ReusePolicy,
}

impl Default for AuthServiceConfig {
    fn default() -> Self {
        AuthServiceConfig {
            reset_token_ttl: Duration::from_secs(30 * 60),
            reuse_policy: ReusePolicy::RevokeAll,
        }
    }
}

pub struct RealAuthService {
    user_directory: Arc<dyn UserDirectory>,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    token_store: Arc<dyn TokenStore>,
    revocation_list: Arc<dyn RevocationList>,
    digest: TokenDigest,
    cfg: AuthServiceConfig,
    dummy_hash: String,
    diagnostics: Option<Span>,
}

/// Emits a diagnostic event under the attached span, if any.
macro_rules! diag {
    ($svc:expr, $($arg:tt)+) => {
        if let Some(span) = &$svc.diagnostics {
            warn!(parent: span, $($arg)+);
        }
    };
}

impl RealAuthService {
    /// Validates the configuration and hashes the timing-equalizer password
    /// up front, so no login ever pays for it.
    pub async fn try_new(
        user_directory: Arc<dyn UserDirectory>,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        token_store: Arc<dyn TokenStore>,
        revocation_list: Arc<dyn RevocationList>,
        digest: TokenDigest,
        cfg: AuthServiceConfig,
    ) -> Result<Self, AuthError> {
        if cfg.reset_token_ttl.is_zero() {
            return Err(AuthError::Configuration(
                "reset token ttl must be positive".to_string(),
            ));
        }
        if deadline_after(Utc::now(), cfg.reset_token_ttl).is_none() {
            return Err(AuthError::Configuration(
                "reset token ttl is out of range".to_string(),
            ));
        }
        let dummy_hash = credential_hasher.hash_password(DUMMY_PASSWORD).await?;

        Ok(Self {
            user_directory,
            credential_hasher,
            token_codec,
            token_store,
            revocation_list,
            digest,
            cfg,
            dummy_hash,
            diagnostics: None,
        })
    }

    /// Attaches structured diagnostics. Only error classification and
    /// non-secret context (user id, reason) are ever recorded.
    pub fn with_logger(mut self, span: Span) -> Self {
        self.diagnostics = Some(span);
        self
    }

    pub fn digest(&self) -> &TokenDigest {
        &self.digest
    }

    #[inline]
    fn new_jti() -> String {
        Uuid::new_v4().to_string()
    }

    /// Collapses a codec failure into the public taxonomy, logging the cause.
    fn token_failure(&self, op: &'static str, e: TokenError) -> AuthError {
        diag!(self, op, cause = %e, "token rejected");
        AuthError::from(e)
    }

    async fn equalize_timing(&self, password: &str) {
        let _ = self
            .credential_hasher
            .verify_password(password, &self.dummy_hash)
            .await;
    }

    async fn issue_pair(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
    ) -> Result<AuthTokens, AuthError> {
        let jti = Self::new_jti();

        let (access_token, access_exp) = self
            .token_codec
            .issue_access_token(principal.id, &principal.email, Some(jti.clone()))
            .await?;
        let (refresh_token, refresh_exp) = self
            .token_codec
            .issue_refresh_token(principal.id, jti)
            .await?;

        ctx.run(self.token_store.save_refresh_token(NewRefreshToken {
            user_id: principal.id,
            token_hash: self.digest.digest(&refresh_token.0),
            client: ctx.client.clone(),
            expires_at: refresh_exp,
        }))
        .await?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        })
    }

    /// A refresh token that was already consumed came back.
    async fn on_reuse(&self, ctx: &RequestContext, user_id: UserId) -> AuthError {
        diag!(self, %user_id, policy = ?self.cfg.reuse_policy, "refresh token reuse detected");
        if self.cfg.reuse_policy == ReusePolicy::RevokeAll {
            match ctx.run(self.token_store.revoke_all_user_tokens(user_id)).await {
                Ok(n) => debug!(%user_id, revoked = n, "revoked all sessions after reuse"),
                Err(e) => return e,
            }
        }
        AuthError::TokenRevokedOrReused
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, AuthError> {
        let email = normalize_email(email);

        let Some(principal) = ctx.run(self.user_directory.find_by_email(&email)).await? else {
            self.equalize_timing(password).await;
            diag!(self, reason = "unknown_user", "login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = match self
            .credential_hasher
            .verify_password(password, principal.password_hash())
            .await
        {
            Ok(ok) => ok,
            Err(e) => {
                diag!(self, user_id = %principal.id, cause = %e, "password verification failed");
                false
            }
        };
        if !ok {
            diag!(self, user_id = %principal.id, reason = "bad_password", "login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        self.issue_pair(ctx, &principal).await
    }

    async fn refresh_token(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
    ) -> Result<AuthTokens, AuthError> {
        let claims = ctx
            .guard(self.token_codec.verify_refresh(refresh_token))
            .await?
            .map_err(|e| self.token_failure("refresh", e))?;
        let user_id = claims.sub;

        if ctx.run(self.revocation_list.is_revoked(&claims.jti)).await? {
            diag!(self, %user_id, reason = "logged_out", "refresh rejected");
            return Err(AuthError::TokenRevokedOrReused);
        }

        let token_hash = self.digest.digest(refresh_token);
        let record = match ctx
            .guard(self.token_store.find_refresh_token(&token_hash))
            .await?
        {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                diag!(self, %user_id, reason = "unknown_token", "refresh rejected");
                return Err(AuthError::TokenRevokedOrReused);
            }
            Err(e) => return Err(e.into()),
        };
        if record.user_id != user_id {
            diag!(self, %user_id, reason = "owner_mismatch", "refresh rejected");
            return Err(AuthError::TokenRevokedOrReused);
        }
        if !record.is_active() {
            return Err(self.on_reuse(ctx, user_id).await);
        }

        let Some(principal) = ctx.run(self.user_directory.find_by_id(user_id)).await? else {
            diag!(self, %user_id, reason = "user_gone", "refresh rejected");
            return Err(AuthError::TokenRevokedOrReused);
        };

        // The successor is persisted before the old record is flipped, so a
        // concurrent revoke-all always sees it.
        let tokens = self.issue_pair(ctx, &principal).await?;

        // Rotation point: only one caller flips the record.
        let won = ctx
            .run(self.token_store.revoke_refresh_token(&token_hash))
            .await?;
        if !won {
            let successor = self.digest.digest(&tokens.refresh_token.0);
            ctx.run(self.token_store.revoke_refresh_token(&successor))
                .await?;
            return Err(self.on_reuse(ctx, user_id).await);
        }

        Ok(tokens)
    }

    async fn logout(&self, ctx: &RequestContext, refresh_token: &str) -> Result<(), AuthError> {
        let claims = match ctx
            .guard(self.token_codec.verify_refresh(refresh_token))
            .await?
        {
            Ok(claims) => claims,
            // Already dead; nothing left to revoke.
            Err(TokenError::Expired) => return Ok(()),
            Err(e) => return Err(self.token_failure("logout", e)),
        };

        let token_hash = self.digest.digest(refresh_token);
        let revoked = ctx
            .run(self.token_store.revoke_refresh_token(&token_hash))
            .await?;
        debug!(user_id = %claims.sub, revoked, "logout");

        let remaining = claims.remaining_lifetime(Utc::now());
        ctx.run(self.revocation_list.invalidate(&claims.jti, remaining))
            .await?;
        Ok(())
    }

    async fn request_password_reset(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        let Some(principal) = ctx.run(self.user_directory.find_by_email(&email)).await? else {
            diag!(self, reason = "unknown_user", "password reset not issued");
            return Ok(None);
        };

        let raw = random_token();
        let expires_at = deadline_after(Utc::now(), self.cfg.reset_token_ttl).ok_or_else(|| {
            AuthError::Configuration("reset token ttl is out of range".to_string())
        })?;
        ctx.run(
            self.token_store
                .save_password_reset_token(NewPasswordResetToken {
                    user_id: principal.id,
                    token_hash: self.digest.digest(&raw),
                    expires_at,
                }),
        )
        .await?;
        debug!(user_id = %principal.id, %expires_at, "password reset issued");

        Ok(Some(raw))
    }

    async fn reset_password(
        &self,
        ctx: &RequestContext,
        reset_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let token_hash = self.digest.digest(reset_token);
        let record = match ctx
            .guard(self.token_store.find_password_reset_token(&token_hash))
            .await?
        {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                diag!(self, reason = "unknown_reset_token", "password reset rejected");
                return Err(AuthError::TokenRevokedOrReused);
            }
            Err(e) => return Err(e.into()),
        };

        if record.used_at.is_some() {
            diag!(self, user_id = %record.user_id, reason = "used", "password reset rejected");
            return Err(AuthError::TokenRevokedOrReused);
        }
        if !record.is_usable_at(Utc::now()) {
            diag!(self, user_id = %record.user_id, reason = "expired", "password reset rejected");
            return Err(AuthError::TokenExpired);
        }

        let Some(mut principal) = ctx
            .run(self.user_directory.find_by_id(record.user_id))
            .await?
        else {
            return Err(AuthError::TokenRevokedOrReused);
        };
        // Hash before consuming the token so a hashing failure leaves it usable.
        let password_hash = ctx
            .run(self.credential_hasher.hash_password(new_password))
            .await?;

        if !ctx
            .run(self.token_store.mark_password_reset_used(&token_hash))
            .await?
        {
            return Err(AuthError::TokenRevokedOrReused);
        }

        principal.set_password_hash(password_hash);
        ctx.run(self.user_directory.update(&principal)).await?;

        let revoked = ctx
            .run(self.token_store.revoke_all_user_tokens(principal.id))
            .await?;
        debug!(user_id = %principal.id, revoked, "password reset completed");
        Ok(())
    }

    async fn authenticate(
        &self,
        ctx: &RequestContext,
        access_token: &str,
    ) -> Result<Claims, AuthError> {
        let claims = ctx
            .guard(self.token_codec.verify_access(access_token))
            .await?
            .map_err(|e| self.token_failure("authenticate", e))?;

        if ctx.run(self.revocation_list.is_revoked(&claims.jti)).await? {
            diag!(self, user_id = %claims.sub, reason = "denylisted", "access rejected");
            return Err(AuthError::TokenRevokedOrReused);
        }
        Ok(claims)
    }

    async fn revoke_all_sessions(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> Result<u64, AuthError> {
        let revoked = ctx
            .run(self.token_store.revoke_all_user_tokens(user_id))
            .await?;
        warn!(%user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    async fn cleanup(
        &self,
        ctx: &RequestContext,
        retention: Duration,
    ) -> Result<CleanupReport, AuthError> {
        let denylist_entries = ctx.run(self.revocation_list.cleanup_expired()).await?;
        let now = Utc::now();
        let before = TimeDelta::from_std(retention)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let token_records = ctx.run(self.token_store.purge_expired(before)).await?;
        Ok(CleanupReport {
            denylist_entries,
            token_records,
        })
    }
}
