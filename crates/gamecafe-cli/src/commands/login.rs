use clap::Args;
use gamecafe_core::{Config, Database, QuotaStore, SessionContext, SessionError};
use tracing::warn;

use super::{remote_store, CliResult};

#[derive(Args)]
pub struct LoginArgs {
    /// User id
    #[arg(long)]
    user: String,
    /// Bearer token (see `gamecafe token issue`)
    #[arg(long)]
    token: String,
}

/// Check the credentials against the store and save them.
pub async fn login(args: LoginArgs, config: &Config) -> CliResult {
    let mut session = SessionContext::new(args.user, args.token);
    if !session.is_authenticated() {
        return Err(SessionError::NotAuthenticated.into());
    }

    let store = remote_store(config)?;
    match store.fetch(&session).await {
        Ok(quota) => {
            session.cached_quota_minutes = Some(quota.total_minutes);
            println!(
                "logged in as {}: {} of {} minutes available",
                session.user_id,
                quota.remaining_minutes(),
                quota.total_minutes
            );
        }
        Err(e) if e.is_auth_failure() => return Err(SessionError::NotAuthenticated.into()),
        Err(e) => {
            warn!(error = %e, "could not verify credentials, saving anyway");
            println!("logged in as {} (store unreachable)", session.user_id);
        }
    }

    let db = Database::open()?;
    session.save(&db)?;
    Ok(())
}

pub fn logout() -> CliResult {
    let db = Database::open()?;
    if SessionContext::clear(&db)? {
        println!("logged out");
    } else {
        println!("not logged in");
    }
    Ok(())
}
