mod config;

pub use config::{Config, IdentityConfig, LoggingConfig, SyncConfig};

use std::path::PathBuf;

/// Returns `~/.config/teamcollection[-dev]/` based on TEAMCOLLECTION_ENV.
///
/// Set TEAMCOLLECTION_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("TEAMCOLLECTION_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("teamcollection-dev")
    } else {
        base_dir.join("teamcollection")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
