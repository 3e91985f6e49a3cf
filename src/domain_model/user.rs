use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new_random() -> Self {
        UserId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::from_str(s).map(UserId)
    }
}

/// A user as seen by the authentication core.
///
/// The directory owns the canonical row; the core only reads the email and
/// password hash, and writes the hash back after a password reset.
#[derive(Clone)]
pub struct Principal {
    pub id: UserId,
    pub email: String,
    password_hash: String,
}

impl Principal {
    pub fn new(id: UserId, email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Principal {
            id,
            email: email.into(),
            password_hash: password_hash.into(),
        }
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn set_password_hash(&mut self, password_hash: impl Into<String>) {
        self.password_hash = password_hash.into();
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Lowercased, trimmed email used as the directory lookup key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
