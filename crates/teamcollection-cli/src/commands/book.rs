//! Per-book commands: checkout, checkin, unlock, forget, rename, delete.

use clap::Args;
use std::path::PathBuf;
use teamcollection_core::book_checksum;

use super::{open, CliResult};

#[derive(Args)]
pub struct BookArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
    /// Book name (its folder name)
    book: String,
}

#[derive(Args)]
pub struct UnlockArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
    /// Book name
    book: String,
    /// Clear the checkout even if someone else holds it
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
pub struct RenameArgs {
    /// Local collection folder
    #[arg(long)]
    collection: PathBuf,
    /// Current book name
    old: String,
    /// New book name
    new: String,
}

pub fn checkout(args: BookArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    tc.checkout(&args.book)?;
    println!("checked out {}", args.book);
    Ok(())
}

pub fn checkin(args: BookArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    let status = tc.checkin(&args.book)?;
    println!(
        "checked in {} ({})",
        args.book,
        status.checksum.as_deref().unwrap_or("no checksum")
    );
    Ok(())
}

pub fn unlock(args: UnlockArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    if args.force {
        tc.force_unlock(&args.book)?;
        println!("unlocked {}", args.book);
        return Ok(());
    }
    if !tc.is_checked_out_here(&args.book)? {
        return Err(format!(
            "{} is not checked out here (use --force to clear someone else's checkout)",
            args.book
        )
        .into());
    }
    let local = tc.get_local_status(&args.book)?;
    let current = book_checksum(&tc.local().book_folder(&args.book))?;
    if local.old_name.is_some() || local.checksum.as_deref() != Some(current.as_str()) {
        return Err(format!(
            "{} has local changes; check it in or use `forget` to discard them",
            args.book
        )
        .into());
    }
    tc.unlock(&args.book)?;
    println!("unlocked {}", args.book);
    Ok(())
}

pub fn forget(args: BookArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    let changed = tc.forget_changes_checkin(&args.book)?;
    println!("restored {} from the Team Collection", args.book);
    for path in changed {
        println!("  {}", path.display());
    }
    Ok(())
}

pub fn rename(args: RenameArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    tc.rename_local_book(&args.old, &args.new)?;
    println!("renamed {} to {}", args.old, args.new);
    Ok(())
}

pub fn delete(args: BookArgs) -> CliResult {
    let mut tc = open(&args.collection)?;
    tc.delete_book(&args.book)?;
    println!("deleted {}", args.book);
    Ok(())
}
