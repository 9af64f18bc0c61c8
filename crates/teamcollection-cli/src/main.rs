use clap::{CommandFactory, Parser, Subcommand};
use teamcollection_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "teamcollection-cli", version, about = "Team Collection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a local collection by creating a Team Collection for it
    Create(commands::collection::CreateArgs),
    /// Join an existing Team Collection
    Join(commands::collection::JoinArgs),
    /// Bring the local collection up to date with the Team Collection
    Sync(commands::collection::SyncArgs),
    /// Show who has which book checked out
    Status(commands::collection::StatusArgs),
    /// Show the Team Collection message log
    Log(commands::collection::LogArgs),
    /// Check out a book so you can edit it
    Checkout(commands::book::BookArgs),
    /// Check in a book and release the checkout
    Checkin(commands::book::BookArgs),
    /// Release a checkout without checking in
    Unlock(commands::book::UnlockArgs),
    /// Throw away local changes and release the checkout
    Forget(commands::book::BookArgs),
    /// Rename a local book
    Rename(commands::book::RenameArgs),
    /// Delete a book from the local and Team Collections
    Delete(commands::book::BookArgs),
    /// Watch for teammates' changes until interrupted
    Watch(commands::watch::WatchArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_tracing() {
    let filter = std::env::var("TEAMCOLLECTION_LOG")
        .unwrap_or_else(|_| Config::load_or_default().logging.filter);
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    let result = match cli.command {
        Commands::Create(args) => commands::collection::create(args),
        Commands::Join(args) => commands::collection::join(args),
        Commands::Sync(args) => commands::collection::sync(args),
        Commands::Status(args) => commands::collection::status(args),
        Commands::Log(args) => commands::collection::log(args),
        Commands::Checkout(args) => commands::book::checkout(args),
        Commands::Checkin(args) => commands::book::checkin(args),
        Commands::Unlock(args) => commands::book::unlock(args),
        Commands::Forget(args) => commands::book::forget(args),
        Commands::Rename(args) => commands::book::rename(args),
        Commands::Delete(args) => commands::book::delete(args),
        Commands::Watch(args) => commands::watch::run(args),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "teamcollection-cli", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
