use countersign::application_impl::*;
use countersign::application_port::*;
use chrono::{DateTime, Utc};
use countersign::domain_model::*;
use countersign::domain_port::{StoreError, TokenStore};
use countersign::infra_memory::*;
use jsonwebtoken::Algorithm;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "correct horse battery staple";

struct Harness {
    service: Arc<RealAuthService>,
    store: Arc<InMemoryTokenStore>,
    denylist: Arc<InMemoryRevocationList>,
    hasher: Arc<ObservedHasher>,
    user_id: UserId,
}

struct Options {
    access_ttl: Duration,
    refresh_ttl: Duration,
    reset_token_ttl: Duration,
    reuse_policy: ReusePolicy,
    save_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            access_ttl: Duration::from_secs(60),
            refresh_ttl: Duration::from_secs(3600),
            reset_token_ttl: Duration::from_secs(600),
            reuse_policy: ReusePolicy::RevokeAll,
            save_delay: Duration::ZERO,
        }
    }
}

/// Argon2 with a hash counter and a switch that makes hashing fail.
struct ObservedHasher {
    inner: Argon2PasswordHasher,
    hashes: AtomicUsize,
    fail_hash: AtomicBool,
}

impl ObservedHasher {
    fn new() -> Self {
        ObservedHasher {
            inner: Argon2PasswordHasher::with_params(8, 1, 1).unwrap(),
            hashes: AtomicUsize::new(0),
            fail_hash: AtomicBool::new(false),
        }
    }

    fn hashes(&self) -> usize {
        self.hashes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CredentialHasher for ObservedHasher {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        self.hashes.fetch_add(1, Ordering::SeqCst);
        if self.fail_hash.load(Ordering::SeqCst) {
            return Err(AuthError::InternalError("hasher unavailable".to_string()));
        }
        self.inner.hash_password(password).await
    }

    async fn verify_password(&self, password: &str, password_hash: &str) -> Result<bool, AuthError> {
        self.inner.verify_password(password, password_hash).await
    }
}

/// Memory store whose refresh-token saves take a while to land.
struct SlowSaveStore {
    inner: Arc<InMemoryTokenStore>,
    delay: Duration,
}

#[async_trait::async_trait]
impl TokenStore for SlowSaveStore {
    async fn save_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.save_refresh_token(token).await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        self.inner.find_refresh_token(token_hash).await
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        self.inner.revoke_refresh_token(token_hash).await
    }

    async fn revoke_all_user_tokens(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.inner.revoke_all_user_tokens(user_id).await
    }

    async fn save_password_reset_token(
        &self,
        token: NewPasswordResetToken,
    ) -> Result<PasswordResetTokenRecord, StoreError> {
        self.inner.save_password_reset_token(token).await
    }

    async fn find_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<PasswordResetTokenRecord, StoreError> {
        self.inner.find_password_reset_token(token_hash).await
    }

    async fn mark_password_reset_used(&self, token_hash: &str) -> Result<bool, StoreError> {
        self.inner.mark_password_reset_used(token_hash).await
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_expired(before).await
    }
}

async fn harness(opts: Options) -> Harness {
    let hasher = Arc::new(ObservedHasher::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    let user_id = UserId::new_random();
    let hash = hasher.hash_password(PASSWORD).await.unwrap();
    users.insert(Principal::new(user_id, EMAIL, hash));

    let codec = JwtCodec::new(JwtConfig {
        algorithm: Algorithm::HS256,
        issuer: "countersign.test".to_string(),
        audience: "test-client".to_string(),
        access_ttl: opts.access_ttl,
        refresh_ttl: opts.refresh_ttl,
        keys: KeyMaterial {
            secret: Some(b"integration-secret".to_vec()),
            ..Default::default()
        },
    })
    .unwrap();

    let store = Arc::new(InMemoryTokenStore::new());
    let denylist = Arc::new(InMemoryRevocationList::new());
    let service = RealAuthService::try_new(
        users,
        hasher.clone(),
        Arc::new(codec),
        Arc::new(SlowSaveStore {
            inner: store.clone(),
            delay: opts.save_delay,
        }),
        denylist.clone(),
        TokenDigest::new(b"integration-hash-key").unwrap(),
        AuthServiceConfig {
            reset_token_ttl: opts.reset_token_ttl,
            reuse_policy: opts.reuse_policy,
        },
    )
    .await
    .unwrap()
    .with_logger(tracing::info_span!("auth-test"));

    Harness {
        service: Arc::new(service),
        store,
        denylist,
        hasher,
        user_id,
    }
}

fn ctx() -> RequestContext {
    RequestContext::background()
}

#[tokio::test]
async fn test_login_issues_a_stored_pair() {
    let h = harness(Options::default()).await;

    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    assert!(tokens.access_token_expires_at < tokens.refresh_token_expires_at);
    assert_eq!(h.store.active_refresh_tokens(h.user_id), 1);
    let claims = h
        .service
        .authenticate(&ctx(), &tokens.access_token.0)
        .await
        .unwrap();
    assert_eq!(claims.sub, h.user_id);
    assert_eq!(claims.email.as_deref(), Some(EMAIL));
}

#[tokio::test]
async fn test_login_normalizes_email() {
    let h = harness(Options::default()).await;
    assert!(
        h.service
            .login(&ctx(), "  Alice@Example.COM ", PASSWORD)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_wrong_password_persists_nothing() {
    let h = harness(Options::default()).await;

    let err = h.service.login(&ctx(), EMAIL, "nope").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(h.store.refresh_token_count(), 0);
}

#[tokio::test]
async fn test_unknown_email_is_indistinguishable() {
    let h = harness(Options::default()).await;

    let unknown = h
        .service
        .login(&ctx(), "mallory@example.com", PASSWORD)
        .await
        .unwrap_err();
    let wrong = h.service.login(&ctx(), EMAIL, "nope").await.unwrap_err();
    assert_eq!(unknown.to_string(), wrong.to_string());
}

#[tokio::test]
async fn test_refresh_rotates_and_old_token_is_single_use() {
    let h = harness(Options {
        reuse_policy: ReusePolicy::Reject,
        ..Default::default()
    })
    .await;
    let first = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let second = h
        .service
        .refresh_token(&ctx(), &first.refresh_token.0)
        .await
        .unwrap();
    assert_ne!(first.refresh_token, second.refresh_token);

    let err = h
        .service
        .refresh_token(&ctx(), &first.refresh_token.0)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenRevokedOrReused));

    // Reject policy leaves the newer session alone.
    assert!(
        h.service
            .refresh_token(&ctx(), &second.refresh_token.0)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_reuse_revokes_every_session() {
    let h = harness(Options::default()).await;
    let first = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();
    let second = h
        .service
        .refresh_token(&ctx(), &first.refresh_token.0)
        .await
        .unwrap();

    let err = h
        .service
        .refresh_token(&ctx(), &first.refresh_token.0)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenRevokedOrReused));
    assert_eq!(h.store.active_refresh_tokens(h.user_id), 0);

    let err = h
        .service
        .refresh_token(&ctx(), &second.refresh_token.0)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenRevokedOrReused));
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let h = harness(Options {
        reuse_policy: ReusePolicy::Reject,
        ..Default::default()
    })
    .await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        let refresh = tokens.refresh_token.0.clone();
        handles.push(tokio::spawn(async move {
            service.refresh_token(&RequestContext::background(), &refresh).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(matches!(e, AuthError::TokenRevokedOrReused)),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.store.active_refresh_tokens(h.user_id), 1);
}

#[tokio::test]
async fn test_concurrent_refresh_reuse_revokes_the_winner_too() {
    let h = harness(Options {
        save_delay: Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let service = h.service.clone();
        let refresh = tokens.refresh_token.0.clone();
        handles.push(tokio::spawn(async move {
            service.refresh_token(&RequestContext::background(), &refresh).await
        }));
    }

    let mut winner = None;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(rotated) => {
                assert!(winner.is_none());
                winner = Some(rotated);
            }
            Err(e) => assert!(matches!(e, AuthError::TokenRevokedOrReused)),
        }
    }
    let winner = winner.unwrap();

    assert_eq!(h.store.active_refresh_tokens(h.user_id), 0);
    let err = h
        .service
        .refresh_token(&ctx(), &winner.refresh_token.0)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenRevokedOrReused));
}

#[tokio::test]
async fn test_logout_blocks_refresh_and_access() {
    let h = harness(Options::default()).await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    h.service
        .logout(&ctx(), &tokens.refresh_token.0)
        .await
        .unwrap();

    assert_eq!(h.denylist.len(), 1);
    assert!(matches!(
        h.service
            .refresh_token(&ctx(), &tokens.refresh_token.0)
            .await,
        Err(AuthError::TokenRevokedOrReused)
    ));
    assert!(matches!(
        h.service.authenticate(&ctx(), &tokens.access_token.0).await,
        Err(AuthError::TokenRevokedOrReused)
    ));
}

#[tokio::test]
async fn test_logout_twice_is_harmless() {
    let h = harness(Options::default()).await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    h.service
        .logout(&ctx(), &tokens.refresh_token.0)
        .await
        .unwrap();
    h.service
        .logout(&ctx(), &tokens.refresh_token.0)
        .await
        .unwrap();
    assert_eq!(h.denylist.len(), 1);
}

#[tokio::test]
async fn test_logout_of_expired_token_succeeds() {
    let h = harness(Options {
        refresh_ttl: Duration::from_millis(500),
        ..Default::default()
    })
    .await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    h.service
        .logout(&ctx(), &tokens.refresh_token.0)
        .await
        .unwrap();
    assert!(h.denylist.is_empty());
}

#[tokio::test]
async fn test_expired_refresh_token_is_rejected() {
    let h = harness(Options {
        refresh_ttl: Duration::from_millis(500),
        ..Default::default()
    })
    .await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert!(matches!(
        h.service
            .refresh_token(&ctx(), &tokens.refresh_token.0)
            .await,
        Err(AuthError::TokenExpired)
    ));
}

#[tokio::test]
async fn test_token_kinds_are_not_interchangeable() {
    let h = harness(Options::default()).await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let err = h
        .service
        .authenticate(&ctx(), &tokens.refresh_token.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::TokenKindMismatch {
            expected: TokenKind::Access
        }
    ));

    let err = h
        .service
        .refresh_token(&ctx(), &tokens.access_token.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::TokenKindMismatch {
            expected: TokenKind::Refresh
        }
    ));
    assert_eq!(err.to_string(), "invalid token type: expected refresh token");
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let h = harness(Options::default()).await;

    assert!(matches!(
        h.service.refresh_token(&ctx(), "not-a-jwt").await,
        Err(AuthError::TokenMalformed)
    ));
    assert!(matches!(
        h.service.authenticate(&ctx(), "a.b.c").await,
        Err(AuthError::TokenMalformed)
    ));
}

#[tokio::test]
async fn test_password_reset_flow() {
    let h = harness(Options::default()).await;
    let session = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let reset = h
        .service
        .request_password_reset(&ctx(), EMAIL)
        .await
        .unwrap()
        .expect("known email gets a token");

    h.service
        .reset_password(&ctx(), &reset, "a brand new password")
        .await
        .unwrap();

    assert!(matches!(
        h.service.login(&ctx(), EMAIL, PASSWORD).await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(
        h.service
            .login(&ctx(), EMAIL, "a brand new password")
            .await
            .is_ok()
    );

    // Sessions from before the reset are gone.
    assert!(matches!(
        h.service
            .refresh_token(&ctx(), &session.refresh_token.0)
            .await,
        Err(AuthError::TokenRevokedOrReused)
    ));

    // Single use.
    assert!(matches!(
        h.service
            .reset_password(&ctx(), &reset, "another password")
            .await,
        Err(AuthError::TokenRevokedOrReused)
    ));
}

#[tokio::test]
async fn test_password_reset_for_unknown_email_issues_nothing() {
    let h = harness(Options::default()).await;
    let token = h
        .service
        .request_password_reset(&ctx(), "nobody@example.com")
        .await
        .unwrap();
    assert!(token.is_none());
}

#[tokio::test]
async fn test_expired_reset_token_is_rejected() {
    let h = harness(Options {
        reset_token_ttl: Duration::from_millis(10),
        ..Default::default()
    })
    .await;
    let reset = h
        .service
        .request_password_reset(&ctx(), EMAIL)
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        h.service.reset_password(&ctx(), &reset, "new password").await,
        Err(AuthError::TokenExpired)
    ));
    assert!(matches!(
        h.service.reset_password(&ctx(), "f00d", "new password").await,
        Err(AuthError::TokenRevokedOrReused)
    ));
}

#[tokio::test]
async fn test_revoke_all_sessions() {
    let h = harness(Options::default()).await;
    let a = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();
    let b = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let revoked = h
        .service
        .revoke_all_sessions(&ctx(), h.user_id)
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    for tokens in [a, b] {
        assert!(
            h.service
                .refresh_token(&ctx(), &tokens.refresh_token.0)
                .await
                .is_err()
        );
    }
}

#[tokio::test]
async fn test_cleanup_removes_only_dead_entries() {
    let h = harness(Options {
        refresh_ttl: Duration::from_millis(500),
        ..Default::default()
    })
    .await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();
    h.service
        .logout(&ctx(), &tokens.refresh_token.0)
        .await
        .unwrap();

    let report = h.service.cleanup(&ctx(), Duration::ZERO).await.unwrap();
    assert_eq!(report, CleanupReport::default());

    tokio::time::sleep(Duration::from_millis(1600)).await;

    let report = h.service.cleanup(&ctx(), Duration::ZERO).await.unwrap();
    assert_eq!(report.denylist_entries, 1);
    assert_eq!(report.token_records, 1);
    assert!(h.denylist.is_empty());
    assert_eq!(h.store.refresh_token_count(), 0);
}

#[tokio::test]
async fn test_cancelled_context_aborts() {
    let h = harness(Options::default()).await;
    let cancel = CancellationToken::new();
    let ctx = RequestContext::new(cancel.clone());
    cancel.cancel();

    assert!(matches!(
        h.service.login(&ctx, EMAIL, PASSWORD).await,
        Err(AuthError::Cancelled)
    ));
    assert_eq!(h.store.refresh_token_count(), 0);
}

#[tokio::test]
async fn test_elapsed_deadline_aborts() {
    let h = harness(Options::default()).await;
    let ctx = RequestContext::background().with_timeout(Duration::ZERO);

    assert!(matches!(
        h.service.request_password_reset(&ctx, EMAIL).await,
        Err(AuthError::Cancelled)
    ));
}

#[tokio::test]
async fn test_client_context_is_recorded() {
    let h = harness(Options::default()).await;
    let ctx = RequestContext::background().with_client(ClientContext {
        user_agent: Some("curl/8.0".to_string()),
        ip_address: Some("10.0.0.7".parse().unwrap()),
    });

    let tokens = h.service.login(&ctx, EMAIL, PASSWORD).await.unwrap();
    let hash = h.service.digest().digest(&tokens.refresh_token.0);
    let record = countersign::domain_port::TokenStore::find_refresh_token(&*h.store, &hash)
        .await
        .unwrap();
    assert_eq!(record.client, ctx.client);
    assert!(record.is_active());
}

#[tokio::test]
async fn test_reset_token_is_stored_by_digest() {
    let h = harness(Options::default()).await;

    let reset = h
        .service
        .request_password_reset(&ctx(), EMAIL)
        .await
        .unwrap()
        .unwrap();
    assert!(!reset.is_empty());

    let hash = h.service.digest().digest(&reset);
    let record = countersign::domain_port::TokenStore::find_password_reset_token(&*h.store, &hash)
        .await
        .unwrap();
    assert_eq!(record.user_id, h.user_id);
    assert_eq!(record.token_hash, hash);
    assert!(record.used_at.is_none());
}

#[tokio::test]
async fn test_failed_hash_leaves_reset_token_usable() {
    let h = harness(Options::default()).await;
    let tokens = h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();
    let reset = h
        .service
        .request_password_reset(&ctx(), EMAIL)
        .await
        .unwrap()
        .unwrap();

    h.hasher.fail_hash.store(true, Ordering::SeqCst);
    let err = h
        .service
        .reset_password(&ctx(), &reset, "a new password")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InternalError(_)));
    assert_eq!(h.store.active_refresh_tokens(h.user_id), 1);
    assert!(h.service.login(&ctx(), EMAIL, PASSWORD).await.is_ok());

    h.hasher.fail_hash.store(false, Ordering::SeqCst);
    h.service
        .reset_password(&ctx(), &reset, "a new password")
        .await
        .unwrap();
    assert!(h.service.login(&ctx(), EMAIL, "a new password").await.is_ok());
    assert!(
        h.service
            .refresh_token(&ctx(), &tokens.refresh_token.0)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_unknown_email_login_does_no_hashing() {
    let h = harness(Options::default()).await;
    // One for the seeded user, one for the timing equalizer at build time.
    assert_eq!(h.hasher.hashes(), 2);

    let err = h
        .service
        .login(&ctx(), "mallory@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(h.hasher.hashes(), 2);
}

#[tokio::test]
async fn test_out_of_range_reset_ttl_is_rejected_at_build() {
    let codec = JwtCodec::new(JwtConfig {
        algorithm: Algorithm::HS256,
        issuer: "countersign.test".to_string(),
        audience: "test-client".to_string(),
        access_ttl: Duration::from_secs(60),
        refresh_ttl: Duration::from_secs(3600),
        keys: KeyMaterial {
            secret: Some(b"integration-secret".to_vec()),
            ..Default::default()
        },
    })
    .unwrap();

    let res = RealAuthService::try_new(
        Arc::new(InMemoryUserDirectory::new()),
        Arc::new(ObservedHasher::new()),
        Arc::new(codec),
        Arc::new(InMemoryTokenStore::new()),
        Arc::new(InMemoryRevocationList::new()),
        TokenDigest::new(b"integration-hash-key").unwrap(),
        AuthServiceConfig {
            reset_token_ttl: Duration::from_secs(u64::MAX / 2),
            reuse_policy: ReusePolicy::RevokeAll,
        },
    )
    .await;
    assert!(matches!(res, Err(AuthError::Configuration(_))));
}

#[tokio::test]
async fn test_cleanup_with_unbounded_retention_keeps_everything() {
    let h = harness(Options::default()).await;
    h.service.login(&ctx(), EMAIL, PASSWORD).await.unwrap();

    let report = h.service.cleanup(&ctx(), Duration::MAX).await.unwrap();
    assert_eq!(report.token_records, 0);
    assert_eq!(h.store.refresh_token_count(), 1);
}
