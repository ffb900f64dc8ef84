use clap::Subcommand;
use gamecafe_core::Config;

use super::{token_authority, CliResult};

#[derive(Subcommand)]
pub enum TokenAction {
    /// Issue a bearer token for a user, signed with `server.signing_secret`
    Issue {
        user: String,
        /// Print the token with its expiry as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: TokenAction, config: &Config) -> CliResult {
    match action {
        TokenAction::Issue { user, json } => {
            let issued = token_authority(config).issue(&user)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&issued)?);
            } else {
                println!("{}", issued.token);
            }
        }
    }
    Ok(())
}
