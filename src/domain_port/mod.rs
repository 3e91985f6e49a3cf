// store

mod revocation_list;
mod store_error;
mod token_store;

pub use revocation_list::*;
pub use store_error::*;
pub use token_store::*;

// collaborators

mod key_set_fetcher;
mod user_directory;

pub use key_set_fetcher::*;
pub use user_directory::*;
