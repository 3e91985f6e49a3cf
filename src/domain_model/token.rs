use super::UserId;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

/// Payload carried by every token this crate mints.
///
/// `jti` identifies the session: an access/refresh pair minted together
/// shares it, and the revocation list is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Millisecond expiry. `exp` is whole seconds rounded up, so this is
    /// the deadline actually enforced when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_ms: Option<i64>,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let exact = match self.exp_ms {
            Some(ms) => DateTime::from_timestamp_millis(ms),
            None => DateTime::from_timestamp(self.exp, 0),
        };
        exact.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at() - now).to_std().unwrap_or_default()
    }
}

/// `from + ttl`, or `None` when the result leaves the representable range.
pub fn deadline_after(from: DateTime<Utc>, ttl: std::time::Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken(pub String);

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RefreshToken(pub String);

// Token material must never end up in logs through a stray `{:?}`.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(..)")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}
