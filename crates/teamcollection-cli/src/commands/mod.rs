//! Subcommands. Each module exposes functions returning [`CliResult`].

pub mod book;
pub mod collection;
pub mod config;
pub mod watch;

use std::path::Path;
use teamcollection_core::{
    data_dir, open_collection, Config, Identity, ProgressKind, ProgressSink, TeamCollection,
};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// The user from the config, overridden by the collection's impersonation file.
pub fn identity_for(collection: &Path, config: &Config) -> Result<Identity, Box<dyn std::error::Error>> {
    let identity = Identity::from_config(&config.identity, &data_dir()?)?;
    Ok(identity.with_impersonation(collection)?)
}

/// Open the collection without a startup sync.
pub fn open(collection: &Path) -> Result<TeamCollection, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let identity = identity_for(collection, &config)?;
    Ok(open_collection(collection, identity, config.sync)?)
}

/// Prints startup progress as it happens.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn message(
        &mut self,
        kind: ProgressKind,
        _l10n_id: &str,
        template: &str,
        param0: Option<&str>,
        param1: Option<&str>,
    ) {
        let text = template
            .replace("{0}", param0.unwrap_or(""))
            .replace("{1}", param1.unwrap_or(""));
        match kind {
            ProgressKind::Progress => println!("{text}"),
            ProgressKind::Warning => eprintln!("warning: {text}"),
            ProgressKind::Error => eprintln!("problem: {text}"),
        }
    }
}
