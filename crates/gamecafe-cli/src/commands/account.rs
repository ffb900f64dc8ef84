use clap::Subcommand;
use gamecafe_core::Config;

use super::{local_service, CliResult};

#[derive(Subcommand)]
pub enum AccountAction {
    /// Create a quota record with the registration bonus
    Register {
        user: String,
        /// Bonus minutes (defaults to `accounts.registration_bonus_minutes`)
        #[arg(long)]
        bonus: Option<u32>,
    },
    /// Show a user's quota record
    Show {
        user: String,
        /// Also list this many recent checkpoints
        #[arg(long, default_value = "0")]
        history: usize,
    },
    /// Start a new accounting window: used minutes back to zero
    ResetUsage { user: String },
}

pub fn run(action: AccountAction, config: &Config) -> CliResult {
    let service = local_service(config)?;
    match action {
        AccountAction::Register { user, bonus } => {
            let bonus = bonus.unwrap_or(config.accounts.registration_bonus_minutes);
            let quota = service.register(&user, bonus)?;
            let issued = service.authority().issue(&user)?;
            println!(
                "registered {user}: {} minutes available",
                quota.remaining_minutes()
            );
            println!("token: {}", issued.token);
        }
        AccountAction::Show { user, history } => {
            let quota = service.fetch(&user)?;
            println!("{}", serde_json::to_string_pretty(&quota)?);
            if history > 0 {
                for record in service.history(&user, history)? {
                    println!(
                        "{}  used={}",
                        record.reported_at.to_rfc3339(),
                        record.used_minutes
                    );
                }
            }
        }
        AccountAction::ResetUsage { user } => {
            let quota = service.reset_usage(&user)?;
            println!(
                "usage reset for {user}: {} of {} minutes available",
                quota.remaining_minutes(),
                quota.total_minutes
            );
        }
    }
    Ok(())
}
