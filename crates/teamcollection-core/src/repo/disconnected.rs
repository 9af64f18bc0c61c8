use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::RepoStore;
use crate::error::{RepoError, Result};
use crate::local::LocalStore;
use crate::status::StatusRecord;

/// Stand-in used while the shared folder cannot be reached.
///
/// Status reads come from the local sidecars, so the collection still shows
/// who had what checked out when we last knew. Every write fails with
/// [`RepoError::Disconnected`].
#[derive(Debug, Clone)]
pub struct DisconnectedRepo {
    local: LocalStore,
    repo_path: Option<PathBuf>,
}

impl DisconnectedRepo {
    pub fn new(local: LocalStore, repo_path: Option<PathBuf>) -> Self {
        Self { local, repo_path }
    }

    fn refuse<T>(&self) -> Result<T> {
        Err(RepoError::Disconnected.into())
    }
}

impl RepoStore for DisconnectedRepo {
    fn description(&self) -> String {
        match &self.repo_path {
            Some(path) => format!("{} (disconnected)", path.display()),
            None => "disconnected".to_string(),
        }
    }

    fn is_disconnected(&self) -> bool {
        true
    }

    fn book_names(&self) -> Result<Vec<String>> {
        Ok(self
            .local
            .book_names()?
            .into_iter()
            .filter(|book| self.is_book_present(book))
            .collect())
    }

    /// Books we have a synced status for are assumed to still be in the repo.
    fn is_book_present(&self, book: &str) -> bool {
        matches!(self.local.read_status(book), Ok(Some(status)) if !status.is_new_local_book())
    }

    fn package_path(&self, book: &str) -> PathBuf {
        self.local.book_folder(book)
    }

    fn read_status(&self, book: &str) -> Result<Option<StatusRecord>> {
        Ok(self
            .local
            .read_status(book)?
            .map(|status| status.for_repo()))
    }

    fn write_status(&self, _book: &str, _status: &StatusRecord) -> Result<()> {
        self.refuse()
    }

    fn put_book(&self, _folder: &Path, _status: &StatusRecord, _in_lost_and_found: bool) -> Result<()> {
        self.refuse()
    }

    fn fetch_book(&self, _book: &str, _dest_collection: &Path) -> Result<()> {
        self.refuse()
    }

    fn delete_book(&self, _book: &str, _make_tombstone: bool) -> Result<()> {
        self.refuse()
    }

    fn rename_book(&self, _old: &str, _new: &str) -> Result<()> {
        self.refuse()
    }

    fn move_to_lost_and_found(&self, _book: &str) -> Result<()> {
        self.refuse()
    }

    fn has_tombstone(&self, _book_id: &str) -> bool {
        false
    }

    fn read_book_file(&self, book: &str, name: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.local.book_folder(book).join(name)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn canonical_book_name(&self, book: &str) -> Option<String> {
        self.local.find_book_ignoring_case(book).ok().flatten()
    }

    fn put_collection_files(&self, _files: &[(String, PathBuf)]) -> Result<()> {
        self.refuse()
    }

    fn fetch_collection_files(&self, _local: &Path) -> Result<()> {
        self.refuse()
    }

    fn last_collection_files_change(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn check_connection(&self) -> Result<()> {
        self.refuse()
    }
}
