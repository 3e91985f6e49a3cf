use crate::application_port::AuthError;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

/// Keyed digest used as the storage key for refresh and reset tokens.
///
/// A leaked table alone is not enough to confirm a guessed token without the
/// server-side key.
#[derive(Clone)]
pub struct TokenDigest {
    mac: Hmac<Sha256>,
}

impl TokenDigest {
    pub fn new(key: &[u8]) -> Result<Self, AuthError> {
        if key.is_empty() {
            return Err(AuthError::Configuration(
                "token hash key must not be empty".to_string(),
            ));
        }
        let mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        Ok(TokenDigest { mac })
    }

    pub fn digest(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        let out = mac.finalize().into_bytes();
        hex::encode(out)
    }
}

/// 256 bits from the OS generator, hex encoded.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
