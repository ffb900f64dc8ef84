pub mod account;
pub mod config;
pub mod login;
pub mod quota;
pub mod serve;
pub mod session;
pub mod token;

use std::path::PathBuf;

use gamecafe_core::storage::data_dir;
use gamecafe_core::{
    Config, Database, HttpQuotaStore, QuotaLedger, QuotaService, SessionContext, SessionError,
    TokenAuthority,
};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Ledger file from `server.database`, relative paths resolved against the
/// data directory.
pub fn ledger_path(config: &Config) -> CliResult<PathBuf> {
    let path = PathBuf::from(&config.server.database);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(data_dir()?.join(path))
}

pub fn token_authority(config: &Config) -> TokenAuthority {
    TokenAuthority::new(&config.server.signing_secret, config.server.token_ttl())
}

/// The authoritative service over the configured ledger.
pub fn local_service(config: &Config) -> CliResult<QuotaService> {
    let ledger = QuotaLedger::open(&ledger_path(config)?)?;
    Ok(QuotaService::new(ledger, token_authority(config)))
}

pub fn remote_store(config: &Config) -> CliResult<HttpQuotaStore> {
    Ok(HttpQuotaStore::new(
        &config.store.base_url,
        config.store.request_timeout(),
    )?)
}

/// The session saved by `gamecafe login`.
pub fn saved_session(db: &Database) -> CliResult<SessionContext> {
    Ok(SessionContext::load(db)?.ok_or(SessionError::NotAuthenticated)?)
}

/// `MM:SS`.
pub fn format_secs(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
