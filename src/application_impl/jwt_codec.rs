use super::JwksCache;
use crate::application_port::{TokenCodec, TokenError};
use crate::domain_model::{AccessToken, Claims, RefreshToken, TokenKind, UserId, deadline_after};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub algorithm: Algorithm,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub keys: KeyMaterial,
}

/// Raw key material. Which fields are required depends on the algorithm
/// family; `JwtCodec::new` rejects incomplete combinations.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub secret: Option<Vec<u8>>,
    pub private_key_pem: Option<Vec<u8>>,
    pub signing_kid: Option<String>,
    pub public_keys_pem: HashMap<String, Vec<u8>>,
    pub remote: Option<Arc<JwksCache>>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .field("signing_kid", &self.signing_kid)
            .field("public_keys", &self.public_keys_pem.keys().collect::<Vec<_>>())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    fn of(alg: Algorithm) -> Self {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Ed,
        }
    }

    fn encoding_key(self, pem: &[u8]) -> Result<EncodingKey, TokenError> {
        let key = match self {
            KeyFamily::Rsa => EncodingKey::from_rsa_pem(pem),
            KeyFamily::Ec => EncodingKey::from_ec_pem(pem),
            KeyFamily::Ed => EncodingKey::from_ed_pem(pem),
            KeyFamily::Hmac => {
                return Err(TokenError::Configuration(
                    "hmac algorithms take a secret, not a pem".to_string(),
                ));
            }
        };
        key.map_err(|e| TokenError::Configuration(format!("invalid private key: {e}")))
    }

    fn decoding_key(self, pem: &[u8]) -> Result<DecodingKey, TokenError> {
        let key = match self {
            KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
            KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
            KeyFamily::Ed => DecodingKey::from_ed_pem(pem),
            KeyFamily::Hmac => {
                return Err(TokenError::Configuration(
                    "hmac algorithms take a secret, not a pem".to_string(),
                ));
            }
        };
        key.map_err(|e| TokenError::Configuration(format!("invalid public key: {e}")))
    }
}

struct Signer {
    kid: String,
    key: EncodingKey,
}

/// Verification keys by kid: local ones first, then the remote set.
struct KeyResolver {
    local: HashMap<String, DecodingKey>,
    remote: Option<Arc<JwksCache>>,
}

impl KeyResolver {
    async fn resolve(&self, kid: &str) -> Result<DecodingKey, TokenError> {
        if let Some(key) = self.local.get(kid) {
            return Ok(key.clone());
        }
        match &self.remote {
            Some(remote) => remote.resolve(kid).await,
            None => Err(TokenError::UnknownKey(kid.to_string())),
        }
    }
}

enum SigningStrategy {
    Hmac {
        encoding: EncodingKey,
        decoding: DecodingKey,
    },
    LocalKey {
        signer: Signer,
        verifiers: KeyResolver,
    },
    /// Verify-only deployment backed by a published key set.
    RemoteKeySet { verifiers: KeyResolver },
}

impl SigningStrategy {
    fn name(&self) -> &'static str {
        match self {
            SigningStrategy::Hmac { .. } => "hmac",
            SigningStrategy::LocalKey { .. } => "local-key",
            SigningStrategy::RemoteKeySet { .. } => "remote-key-set",
        }
    }
}

pub struct JwtCodec {
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    strategy: SigningStrategy,
}

impl fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &self.algorithm)
            .field("strategy", &self.strategy.name())
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl JwtCodec {
    /// Picks the signing strategy once. Missing or unparsable material is a
    /// configuration error and the codec is never built.
    pub fn new(cfg: JwtConfig) -> Result<Self, TokenError> {
        let now = Utc::now();
        for (kind, ttl) in [("access", cfg.access_ttl), ("refresh", cfg.refresh_ttl)] {
            if ttl.is_zero() {
                return Err(TokenError::Configuration(format!(
                    "{kind} token ttl must be positive"
                )));
            }
            if deadline_after(now, ttl).is_none() {
                return Err(TokenError::Configuration(format!(
                    "{kind} token ttl {ttl:?} is out of range"
                )));
            }
        }

        let family = KeyFamily::of(cfg.algorithm);
        let keys = cfg.keys;
        let strategy = match family {
            KeyFamily::Hmac => {
                let secret = keys
                    .secret
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        TokenError::Configuration(format!(
                            "{:?} requires a shared secret",
                            cfg.algorithm
                        ))
                    })?;
                SigningStrategy::Hmac {
                    encoding: EncodingKey::from_secret(&secret),
                    decoding: DecodingKey::from_secret(&secret),
                }
            }
            _ => {
                let mut local = HashMap::with_capacity(keys.public_keys_pem.len());
                for (kid, pem) in &keys.public_keys_pem {
                    local.insert(kid.clone(), family.decoding_key(pem)?);
                }
                let verifiers = KeyResolver {
                    local,
                    remote: keys.remote,
                };

                match keys.private_key_pem {
                    Some(pem) => {
                        let kid = keys.signing_kid.ok_or_else(|| {
                            TokenError::Configuration(
                                "asymmetric signing requires a key identifier".to_string(),
                            )
                        })?;
                        if !verifiers.local.contains_key(&kid) && verifiers.remote.is_none() {
                            return Err(TokenError::Configuration(format!(
                                "no verification key for signing kid {kid:?}"
                            )));
                        }
                        SigningStrategy::LocalKey {
                            signer: Signer {
                                kid,
                                key: family.encoding_key(&pem)?,
                            },
                            verifiers,
                        }
                    }
                    None if verifiers.remote.is_some() => {
                        SigningStrategy::RemoteKeySet { verifiers }
                    }
                    None => {
                        return Err(TokenError::Configuration(format!(
                            "{:?} requires a private key or a remote key set",
                            cfg.algorithm
                        )));
                    }
                }
            }
        };

        Ok(JwtCodec {
            algorithm: cfg.algorithm,
            issuer: cfg.issuer,
            audience: cfg.audience,
            access_ttl: cfg.access_ttl,
            refresh_ttl: cfg.refresh_ttl,
            strategy,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[inline]
    fn gen_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn encode_claims(
        &self,
        sub: UserId,
        email: Option<String>,
        kind: TokenKind,
        ttl: Duration,
        jti: String,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let (key, kid) = match &self.strategy {
            SigningStrategy::Hmac { encoding, .. } => (encoding, None),
            SigningStrategy::LocalKey { signer, .. } => (&signer.key, Some(signer.kid.clone())),
            SigningStrategy::RemoteKeySet { .. } => {
                return Err(TokenError::Configuration(
                    "verify-only codec cannot issue tokens".to_string(),
                ));
            }
        };

        let iat_dt = Utc::now();
        let exp_dt = expiry_after(iat_dt, ttl)?;
        let claims = Claims {
            sub,
            email,
            kind,
            iat: iat_dt.timestamp(),
            exp: ceil_seconds(exp_dt),
            jti,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kid: kid.clone(),
            exp_ms: Some(exp_dt.timestamp_millis()),
        };

        let mut header = Header::new(self.algorithm);
        header.kid = kid;
        let token =
            encode(&header, &claims, key).map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, exp_dt))
    }

    fn validation(&self) -> Validation {
        let mut v = Validation::new(self.algorithm);
        v.validate_exp = true;
        v.leeway = 0;
        v.set_audience(&[self.audience.as_str()]);
        v.set_issuer(&[self.issuer.as_str()]);
        v.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        v
    }
}

/// Expiry at millisecond precision, rounded up so a fresh token is never
/// expired on arrival.
fn expiry_after(iat: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, TokenError> {
    let exact = deadline_after(iat, ttl)
        .ok_or_else(|| TokenError::Signing("expiry out of range".to_string()))?;
    let mut ms = exact.timestamp_millis();
    if exact.timestamp_subsec_nanos() % 1_000_000 > 0 {
        ms += 1;
    }
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| TokenError::Signing("expiry out of range".to_string()))
}

/// Registered `exp` is whole seconds; it never undercuts `exp_ms`.
fn ceil_seconds(t: DateTime<Utc>) -> i64 {
    let secs = t.timestamp();
    if t.timestamp_subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        _ => TokenError::Malformed(e.to_string()),
    }
}

#[async_trait::async_trait]
impl TokenCodec for JwtCodec {
    async fn issue_access_token(
        &self,
        user: UserId,
        email: &str,
        jti: Option<String>,
    ) -> Result<(AccessToken, DateTime<Utc>), TokenError> {
        let jti = jti.unwrap_or_else(Self::gen_jti);
        let (token, exp_dt) = self.encode_claims(
            user,
            Some(email.to_string()),
            TokenKind::Access,
            self.access_ttl,
            jti,
        )?;
        Ok((AccessToken(token), exp_dt))
    }

    async fn issue_refresh_token(
        &self,
        user: UserId,
        jti: String,
    ) -> Result<(RefreshToken, DateTime<Utc>), TokenError> {
        let (token, exp_dt) =
            self.encode_claims(user, None, TokenKind::Refresh, self.refresh_ttl, jti)?;
        Ok((RefreshToken(token), exp_dt))
    }

    async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != self.algorithm {
            return Err(TokenError::Malformed(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }

        let key = match &self.strategy {
            SigningStrategy::Hmac { decoding, .. } => decoding.clone(),
            SigningStrategy::LocalKey { verifiers, .. }
            | SigningStrategy::RemoteKeySet { verifiers } => {
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or_else(|| TokenError::Malformed("missing kid".to_string()))?;
                verifiers.resolve(kid).await?
            }
        };

        let data = decode::<Claims>(token, &key, &self.validation()).map_err(map_decode_error)?;
        let claims = data.claims;
        if claims.kid != header.kid {
            return Err(TokenError::Malformed("kid mismatch".to_string()));
        }
        if claims.is_expired_at(Utc::now()) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn expiry_of(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let mut v = Validation::new(self.algorithm);
        v.insecure_disable_signature_validation();
        v.validate_exp = false;
        v.validate_aud = false;
        v.required_spec_claims.clear();
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &v)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        Ok(data.claims.expires_at())
    }
}
