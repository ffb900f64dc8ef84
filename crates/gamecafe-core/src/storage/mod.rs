mod config;
pub mod database;
pub mod migrations;

pub use config::{AccountsConfig, Config, LoggingConfig, ServerConfig, StoreConfig, TimerConfig};
pub use database::Database;

use std::path::PathBuf;

/// Returns `~/.config/gamecafe[-dev]/` based on GAMECAFE_ENV.
///
/// Set GAMECAFE_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("GAMECAFE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("gamecafe-dev")
    } else {
        base_dir.join("gamecafe")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
