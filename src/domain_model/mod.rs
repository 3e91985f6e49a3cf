mod record;
mod token;
mod user;

pub use record::*;
pub use token::*;
pub use user::*;
