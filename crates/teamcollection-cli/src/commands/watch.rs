//! Long-running watch: sync at startup, then apply teammates' changes as
//! the file watchers report them, until Ctrl-C.

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use teamcollection_core::{
    open_and_sync, ChangeWatcher, CheckedOutBy, CollectionEvent, CollectionHandle, Config,
    RepoStore,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{identity_for, CliResult, ConsoleProgress};

#[derive(Args)]
pub struct WatchArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
}

pub fn run(args: WatchArgs) -> CliResult {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(watch(args))
}

async fn watch(args: WatchArgs) -> CliResult {
    let config = Config::load()?;
    let identity = identity_for(&args.collection, &config)?;
    let (tc, has_problems) =
        open_and_sync(&args.collection, identity, config.sync.clone(), &mut ConsoleProgress)?;
    if has_problems {
        eprintln!("startup sync found problems; see `log --errors`");
    }
    if tc.is_disconnected() {
        eprintln!("working disconnected; teammates' changes will not be seen");
    }

    let _watcher = ChangeWatcher::start(
        tc.repo().watch_root(),
        tc.local().root(),
        tc.repo().own_write_tracker(),
        &config.sync,
        tc.queue(),
    )?;
    let mut events = tc.subscribe();
    let handle = tc.into_handle();
    let mut idle = tokio::time::interval(Duration::from_millis(config.sync.idle_interval_ms.max(1)));
    println!("watching {} (Ctrl-C to stop)", args.collection.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("stopped");
                break;
            }
            _ = idle.tick() => {
                drain_pending(&handle)?;
            }
            event = events.recv() => {
                match event {
                    Ok(CollectionEvent::BookStatusChanged { book, checked_out_by }) => {
                        let state = match checked_out_by {
                            CheckedOutBy::Unlocked => "available",
                            CheckedOutBy::Me => "checked out here",
                            CheckedOutBy::Other => "checked out by a teammate",
                            CheckedOutBy::Deleted => "deleted",
                        };
                        println!("{book}: {state}");
                    }
                    Ok(CollectionEvent::StatusChanged) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(())
}

/// Handle the changes that are ready now; retries wait for the next tick.
fn drain_pending(handle: &CollectionHandle) -> CliResult {
    let mut tc = handle.lock().map_err(|_| "collection lock poisoned")?;
    tc.handle_ready_changes();
    Ok(())
}
