use clap::Subcommand;
use std::path::PathBuf;
use teamcollection_core::{data_dir, Config};

use super::{identity_for, CliResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "identity.user", "sync.retry_ms")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Print where the config file lives
    Path,
    /// Show who checkouts will be attributed to
    Whoami {
        /// Apply this collection's impersonation file
        #[arg(long)]
        collection: Option<PathBuf>,
    },
    /// Reset sync and logging settings to defaults, keeping the identity
    Reset,
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config
                .get(&key)
                .ok_or_else(|| format!("unknown key: {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", data_dir()?.join("config.toml").display());
        }
        ConfigAction::Whoami { collection } => {
            let config = Config::load()?;
            let folder = collection.unwrap_or_else(|| PathBuf::from("."));
            let identity = identity_for(&folder, &config)?;
            if !identity.is_registered() {
                return Err(
                    "no user registered; run `config set identity.user <email>` first".into(),
                );
            }
            println!("{} <{}> on {}", identity.display_name(), identity.user, identity.machine);
        }
        ConfigAction::Reset => {
            let identity = Config::load_or_default().identity;
            let config = Config {
                identity,
                ..Config::default()
            };
            config.save()?;
            println!("sync and logging settings reset to defaults");
        }
    }
    Ok(())
}
