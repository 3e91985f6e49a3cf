mod auth_service;
mod context;
mod credential_hasher;
mod token_codec;

pub use auth_service::*;
pub use context::*;
pub use credential_hasher::*;
pub use token_codec::*;
