use super::{Parser, Subcommand};
use crate::domain_model::UserId;

#[derive(Parser, Debug)]
#[command(name = "countersign", about = "Token administration")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Revoke every refresh token of a user.
    RevokeUser { user_id: UserId },
    /// Drop expired denylist entries and token records past retention.
    Cleanup {
        /// Overrides `auth.retention_days`.
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Verify a token and print its claims.
    Inspect { token: String },
}
