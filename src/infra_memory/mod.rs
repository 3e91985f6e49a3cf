//! In-process backends. State is lost on restart, which is acceptable for
//! tests, single-instance deployments and the denylist (the token store
//! stays the system of record).

mod revocation_list_memory;
mod token_store_memory;
mod user_directory_memory;

pub use revocation_list_memory::*;
pub use token_store_memory::*;
pub use user_directory_memory::*;
