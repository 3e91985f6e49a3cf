mod argon2_hasher;
mod auth_service_impl;
mod jwks_cache;
mod jwt_codec;
mod token_digest;

pub use argon2_hasher::*;
pub use auth_service_impl::*;
pub use jwks_cache::*;
pub use jwt_codec::*;
pub use token_digest::*;
