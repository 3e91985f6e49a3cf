mod revocation_list_mysql;
mod token_store_mysql;
mod user_directory_mysql;

pub use revocation_list_mysql::*;
pub use token_store_mysql::*;
pub use user_directory_mysql::*;

mod util;
