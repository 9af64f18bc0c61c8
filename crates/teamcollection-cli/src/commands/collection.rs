//! Collection-wide commands: create, join, sync, status and the message log.

use clap::Args;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use teamcollection_core::{
    create_team_collection, join_team_collection, CollectionStatus, Config, MessageKind,
    RepoStore, StatusRecord, TeamCollection,
};

use super::{identity_for, open, CliResult, ConsoleProgress};

#[derive(Args)]
pub struct CreateArgs {
    /// Local collection folder to share
    #[arg(long)]
    collection: PathBuf,
    /// Shared folder (e.g. in Dropbox) to create the Team Collection in
    repo_parent: PathBuf,
}

#[derive(Args)]
pub struct JoinArgs {
    /// The Team Collection folder (its name ends in " - TC")
    repo: PathBuf,
    /// Folder the local collection is created in
    #[arg(long)]
    into: PathBuf,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
    /// Check in local books that are not in the Team Collection yet
    #[arg(long)]
    first_join: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
    /// Only this book
    book: Option<String>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct LogArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
    /// Only errors not yet seen
    #[arg(long)]
    errors: bool,
    /// Only news since the last reload
    #[arg(long)]
    new_stuff: bool,
}

pub fn create(args: CreateArgs) -> CliResult {
    let config = Config::load()?;
    let identity = identity_for(&args.collection, &config)?;
    let tc = create_team_collection(&args.collection, &args.repo_parent, identity, config.sync)?;
    let books = tc.local().book_names()?;
    println!("Team Collection created at {}", tc.repo().description());
    println!("checked in {} book(s)", books.len());
    Ok(())
}

pub fn join(args: JoinArgs) -> CliResult {
    let config = Config::load()?;
    let identity = identity_for(&args.into, &config)?;
    let (tc, has_problems) = join_team_collection(
        &args.repo,
        &args.into,
        identity,
        config.sync,
        &mut ConsoleProgress,
    )?;
    println!("joined; local collection is {}", tc.local().root().display());
    if has_problems {
        print_problem_hint(&tc);
    }
    Ok(())
}

pub fn sync(args: SyncArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    if tc.is_disconnected() {
        return Err(format!("cannot reach {}", tc.repo().description()).into());
    }
    tc.sync_local_and_repo_collection_files(true)?;
    let has_problems = tc.sync_at_startup(&mut ConsoleProgress, args.first_join)?;
    if has_problems {
        print_problem_hint(&tc);
    } else {
        println!("up to date");
    }
    Ok(())
}

fn print_problem_hint(tc: &TeamCollection) {
    eprintln!(
        "{} problem(s) found; see `teamcollection-cli log --errors --collection {}`",
        tc.log().current_errors().len(),
        tc.local().root().display()
    );
}

#[derive(Serialize)]
struct BookRow {
    book: String,
    state: &'static str,
    holder: Option<String>,
    machine: Option<String>,
    since: Option<String>,
}

fn book_row(tc: &TeamCollection, book: &str, status: StatusRecord) -> BookRow {
    let state = if status.has_invalid_repo_data {
        "unreadable"
    } else if status.is_new_local_book() {
        "new"
    } else if status.is_checked_out_here_by(tc.identity()) {
        "checked-out-here"
    } else if status.is_checked_out() {
        "checked-out"
    } else if !tc.local().has_book(book) {
        "not-fetched"
    } else {
        "available"
    };
    let holder = (!status.is_new_local_book())
        .then(|| status.holder_display_name())
        .flatten();
    BookRow {
        book: book.to_string(),
        state,
        holder,
        machine: status.locked_where.filter(|_| state.starts_with("checked")),
        since: status.locked_when.map(|t| t.to_rfc3339()),
    }
}

pub fn status(args: StatusArgs) -> CliResult {
    let tc = open(&args.collection)?;
    let books: BTreeSet<String> = match &args.book {
        Some(book) => BTreeSet::from([book.clone()]),
        None => {
            let mut books: BTreeSet<String> = tc.local().book_names()?.into_iter().collect();
            if !tc.is_disconnected() {
                books.extend(tc.repo().book_names()?);
            }
            books
        }
    };
    let mut rows = Vec::new();
    for book in &books {
        rows.push(book_row(&tc, book, tc.get_status(book)?));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    let overall = match tc.log().team_collection_status() {
        CollectionStatus::Nominal => "ok",
        CollectionStatus::NewStuff => "teammates have made changes (sync to get them)",
        CollectionStatus::Error => "there are problems (see `log --errors`)",
        CollectionStatus::ClobberPending => "local work was overwritten (see `log`)",
    };
    println!("Team Collection: {} [{overall}]", tc.repo().description());
    for row in rows {
        match (&row.holder, &row.machine) {
            (Some(holder), Some(machine)) => {
                println!("  {:<30} {} by {holder} on {machine}", row.book, row.state)
            }
            _ => println!("  {:<30} {}", row.book, row.state),
        }
    }
    Ok(())
}

pub fn log(args: LogArgs) -> CliResult {
    let tc = open(&args.collection)?;
    let log = tc.log();
    if args.errors || args.new_stuff {
        let mut messages = Vec::new();
        if args.errors {
            messages.extend(log.current_errors());
        }
        if args.new_stuff {
            messages.extend(log.current_new_stuff());
        }
        messages.sort_by_key(|m| m.when);
        for message in messages {
            println!("{}", message.formatted());
        }
        return Ok(());
    }
    for (kind, text) in log.pretty_print_messages() {
        let label = match kind {
            MessageKind::Error | MessageKind::ErrorNoReload => "error",
            MessageKind::NewStuff => "new",
            MessageKind::ClobberPending | MessageKind::ShowedClobbered => "conflict",
            _ => "",
        };
        if label.is_empty() {
            println!("{text}");
        } else {
            println!("[{label}] {text}");
        }
    }
    Ok(())
}
