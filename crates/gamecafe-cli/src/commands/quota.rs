use clap::Subcommand;
use gamecafe_core::{Config, Database, QuotaStore};

use super::{remote_store, saved_session, CliResult};

#[derive(Subcommand)]
pub enum QuotaAction {
    /// Print the saved user's quota as JSON
    Show,
    /// Record a completed purchase of minutes
    Buy { minutes: u32 },
}

pub async fn run(action: QuotaAction, config: &Config) -> CliResult {
    let db = Database::open()?;
    let mut session = saved_session(&db)?;
    let store = remote_store(config)?;

    let quota = match action {
        QuotaAction::Show => store.fetch(&session).await?,
        QuotaAction::Buy { minutes } => {
            let quota = store.add_minutes(&session, minutes).await?;
            println!("added {minutes} minutes");
            quota
        }
    };

    session.cached_quota_minutes = Some(quota.total_minutes);
    session.save(&db)?;

    let mut json = serde_json::to_value(&quota)?;
    json["remainingMinutes"] = quota.remaining_minutes().into();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
