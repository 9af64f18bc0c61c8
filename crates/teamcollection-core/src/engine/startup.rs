//! Startup reconciliation of the local collection against the repo.
//!
//! Pass one looks at local books that have no package in the repo and
//! decides whether each is new, renamed, deleted or conflicting. Pass two
//! walks the repo packages and brings the local copies up to date, saving
//! any local work that would be overwritten to Lost and Found first.

use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

use super::TeamCollection;
use crate::error::{CoreError, Result};
use crate::local::{book_id_from_meta, META_FILE_NAME};
use crate::message_log::MessageKind;

/// Substrings sync programs put in the names of conflicting copies.
const CONFLICT_MARKERS: &[&str] = &[
    "conflicted copy",
    "copie en conflit",
    "cópia em conflito",
    "конфликтующая копия",
    "冲突副本",
    "衝突複本",
];

const SOMETHING_WENT_WRONG: &str =
    "Something went wrong trying to sync with the book {0} in your Team Collection.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Progress,
    Warning,
    Error,
}

/// Receives startup progress as it happens, for a progress display.
pub trait ProgressSink {
    fn message(
        &mut self,
        kind: ProgressKind,
        l10n_id: &str,
        template: &str,
        param0: Option<&str>,
        param1: Option<&str>,
    );
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn message(&mut self, _: ProgressKind, _: &str, _: &str, _: Option<&str>, _: Option<&str>) {}
}

/// Where a repo book stands, keyed by book id.
#[derive(Debug, Clone)]
struct RepoBook {
    name: String,
    has_local_folder: bool,
}

struct StartupState<'p> {
    progress: &'p mut dyn ProgressSink,
    first_time_join: bool,
    repo_books_by_id: HashMap<String, RepoBook>,
    /// Repo names of books checked out here and renamed locally.
    old_names: HashSet<String>,
    /// New names of books a teammate renamed, already reported.
    renamed: HashSet<String>,
    has_problems: bool,
}

pub(crate) fn is_conflicted_copy(book: &str) -> bool {
    let lower = book.to_lowercase();
    CONFLICT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl TeamCollection {
    /// Reconcile the local collection with the repo. Returns true if any
    /// problem was reported, in which case the log has been shown.
    pub fn sync_at_startup(
        &mut self,
        progress: &mut dyn ProgressSink,
        first_time_join: bool,
    ) -> Result<bool> {
        self.log.write_milestone(MessageKind::Reloaded);
        let repo_books = self.repo.book_names()?;
        let mut state = StartupState {
            progress,
            first_time_join,
            repo_books_by_id: self.repo_books_by_id(&repo_books),
            old_names: HashSet::new(),
            renamed: HashSet::new(),
            has_problems: false,
        };
        self.remotely_renamed.clear();
        info!(first_time_join, repo_books = repo_books.len(), "syncing at startup");

        for book in self.local.book_names()? {
            if let Err(e) = self.sync_local_only_book(&book, &mut state) {
                self.report_sync_failure(&book, &e, &mut state);
            }
        }
        for book in &repo_books {
            if let Err(e) = self.sync_repo_book(book, &mut state) {
                self.report_sync_failure(book, &e, &mut state);
            }
        }

        if state.has_problems {
            self.log.write_milestone(MessageKind::LogDisplayed);
        }
        Ok(state.has_problems)
    }

    fn repo_books_by_id(&self, repo_books: &[String]) -> HashMap<String, RepoBook> {
        let mut by_id = HashMap::new();
        for book in repo_books {
            let meta = match self.repo.read_book_file(book, META_FILE_NAME) {
                Ok(Some(meta)) => meta,
                Ok(None) => continue,
                Err(e) => {
                    debug!(book = %book, "no id for repo book: {e}");
                    continue;
                }
            };
            if let Some(id) = book_id_from_meta(&meta) {
                by_id.insert(
                    id,
                    RepoBook {
                        name: book.clone(),
                        has_local_folder: self.local.book_folder(book).exists(),
                    },
                );
            }
        }
        by_id
    }

    /// Send a message to the progress sink and the message log.
    fn report(
        &mut self,
        state: &mut StartupState<'_>,
        kind: ProgressKind,
        id_suffix: &str,
        template: &str,
        param0: Option<&str>,
        param1: Option<&str>,
    ) {
        let l10n_id = if id_suffix.is_empty() {
            String::new()
        } else {
            format!("TeamCollection.{id_suffix}")
        };
        state.progress.message(kind, &l10n_id, template, param0, param1);
        let log_kind = match kind {
            ProgressKind::Progress => MessageKind::History,
            ProgressKind::Warning | ProgressKind::Error => MessageKind::ErrorNoReload,
        };
        self.log.write_message(log_kind, &l10n_id, template, param0, param1);
    }

    fn report_sync_failure(&mut self, book: &str, e: &CoreError, state: &mut StartupState<'_>) {
        error!(book, "sync failed: {e}");
        self.report(
            state,
            ProgressKind::Error,
            "SomethingWentWrong",
            SOMETHING_WENT_WRONG,
            Some(book),
            None,
        );
        let detail = e.to_string();
        self.report(state, ProgressKind::Error, "", &detail, None, None);
        state.has_problems = true;
    }

    /// Fetch `book` and its status. Failures are reported and make the
    /// sync problematic; `on_success` runs only when the fetch worked.
    fn fetch_and_report(
        &mut self,
        book: &str,
        state: &mut StartupState<'_>,
        on_success: impl FnOnce(&mut Self, &mut StartupState<'_>),
    ) -> bool {
        match self.copy_book_from_repo_to_local(book) {
            Ok(()) => {
                on_success(self, state);
                true
            }
            Err(e) => {
                let message = if e.is_bad_package() {
                    self.get_bad_zip_file_message(book)
                } else {
                    e.to_string()
                };
                warn!(book, "could not fetch: {e}");
                self.report(state, ProgressKind::Error, "", &message, None, None);
                state.has_problems = true;
                false
            }
        }
    }

    fn updating(this: &mut Self, book: &str, state: &mut StartupState<'_>) {
        this.report(
            state,
            ProgressKind::Progress,
            "Updating",
            "Updating '{0}' to match the Team Collection",
            Some(book),
            None,
        );
    }

    fn sync_local_only_book(&mut self, book: &str, state: &mut StartupState<'_>) -> Result<()> {
        let repo_status_valid = match self.repo.read_status(book) {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => true,
            Err(e) if e.is_bad_package() => false,
            Err(e) => return Err(e),
        };
        let folder = self.local.book_folder(book);
        let id = self.local.book_id(book);
        let repo_book = id
            .as_ref()
            .and_then(|id| state.repo_books_by_id.get(id))
            .cloned();

        if state.first_time_join && repo_status_valid {
            let renamed_remotely = repo_book.as_ref().is_some_and(|b| !b.has_local_folder);
            if !renamed_remotely && !self.known_to_have_been_deleted(book) {
                debug!(book, "checking in local book on join");
                self.put_book(&folder, true, false)?;
                return Ok(());
            }
        }

        let Some(local_status) = self.local.read_status(book)? else {
            if let Some(repo_book) = repo_book {
                // Same id as a differently named repo book: keep theirs.
                self.put_book(&folder, false, true)?;
                self.local.delete_book(book)?;
                state.has_problems = true;
                self.report(
                    state,
                    ProgressKind::Error,
                    "ConflictingIdMove",
                    "The book \"{0}\" was moved to Lost and Found, since it has the same ID as \
                     the book \"{1}\" in the team collection.",
                    Some(book),
                    Some(&repo_book.name),
                );
            }
            return Ok(());
        };

        if local_status.collection_id.as_deref() != Some(self.collection_id.as_str()) {
            // Copied in from some other collection; it is a new book here.
            self.local.delete_status(book)?;
            return Ok(());
        }
        if !repo_status_valid {
            return Ok(());
        }
        if local_status.is_checked_out_here_by(&self.identity) {
            match local_status.old_name {
                Some(old_name) => {
                    state.old_names.insert(old_name);
                }
                None => self.local.delete_status(book)?,
            }
            return Ok(());
        }
        if let Some(repo_book) = repo_book.filter(|b| !b.has_local_folder) {
            self.report(
                state,
                ProgressKind::Progress,
                "RenameFromRemote",
                "The book \"{0}\" has been renamed to \"{1}\" by a teammate.",
                Some(book),
                Some(&repo_book.name),
            );
            state.renamed.insert(repo_book.name);
            self.local.delete_book(book)?;
            return Ok(());
        }
        if self.known_to_have_been_deleted(book) {
            self.report(
                state,
                ProgressKind::Warning,
                "DeleteLocal",
                "Deleting '{0}' from your local collection as it was deleted in the Team Collection.",
                Some(book),
                None,
            );
            self.local.delete_book(book)?;
            return Ok(());
        }
        self.put_book(&folder, false, true)?;
        self.report(
            state,
            ProgressKind::Warning,
            "DeletedRemotely",
            "Deleting '{0}' from local folder as it is no longer in the Team Collection",
            Some(book),
            None,
        );
        self.local.delete_book(book)?;
        Ok(())
    }

    fn sync_repo_book(&mut self, book: &str, state: &mut StartupState<'_>) -> Result<()> {
        let folder = self.local.book_folder(book);
        if !folder.exists() {
            return self.sync_repo_book_without_local_copy(book, state);
        }

        let repo_status = self.get_status(book)?;
        if repo_status.has_invalid_repo_data {
            // Leave the local copy alone until someone repairs the package.
            let message = self.get_bad_zip_file_message(book);
            self.report(state, ProgressKind::Error, "BadBookZip", &message, None, None);
            state.has_problems = true;
            return Ok(());
        }
        let Some(local_status) = self.local.read_status(book)? else {
            let current = self.current_checksum(book)?;
            if repo_status.checksum.as_deref() == Some(current.as_str()) {
                self.write_local_status(book, &repo_status)?;
            } else if state.first_time_join {
                self.put_book(&folder, false, true)?;
                state.has_problems = true;
                self.fetch_and_report(book, state, |this, state| {
                    this.report(
                        state,
                        ProgressKind::Error,
                        "ConflictingCheckout",
                        "Found different versions of '{0}' in the local and team collections. The \
                         team version has been copied to the local collection, and the old local \
                         version to Lost and Found",
                        Some(book),
                        None,
                    );
                });
            } else {
                let moved_to = self.local.move_to_available_name(book)?;
                info!(book, moved_to = %moved_to, "renamed local book out of the way");
                self.report(
                    state,
                    ProgressKind::Warning,
                    "RenamingBook",
                    "Renaming the local book '{0}' because there is a new one with the same name \
                     from the Team Collection",
                    Some(book),
                    None,
                );
                self.fetch_and_report(book, state, |_, _| {});
            }
            return Ok(());
        };

        if !local_status.is_checked_out_here_by(&self.identity) {
            if local_status.checksum != repo_status.checksum {
                let current = self.current_checksum(book)?;
                let edited_here = local_status.checksum.as_deref() != Some(current.as_str())
                    && repo_status.checksum.as_deref() != Some(current.as_str());
                if !edited_here {
                    self.fetch_and_report(book, state, |this, state| {
                        Self::updating(this, book, state)
                    });
                    self.ensure_consistent_casing(book)?;
                    return Ok(());
                }
                // Edited without a checkout; the repo still wins but the edit is kept.
                self.put_book(&folder, false, true)?;
                state.has_problems = true;
                self.fetch_and_report(book, state, |this, state| {
                    this.report(
                        state,
                        ProgressKind::Error,
                        "ConflictingEdit",
                        "The book '{0}' was modified on this computer without being checked out, \
                         and was also modified in the Team Collection by someone else. Local \
                         changes have been overwritten, but are saved to Lost-and-found.",
                        Some(book),
                        None,
                    );
                });
            } else if !local_status.same_sync_state(&repo_status) {
                self.write_local_status(book, &repo_status)?;
            }
            self.ensure_consistent_casing(book)?;
            return Ok(());
        }

        let checksums_match = local_status.checksum == repo_status.checksum;
        if repo_status.is_checked_out_here_by(&self.identity) && checksums_match {
            return Ok(());
        }
        if checksums_match {
            if !repo_status.is_checked_out() {
                // Someone started a checkout and gave up without edits; restore ours.
                self.write_book_status(book, &local_status)?;
                return Ok(());
            }
            let current = self.current_checksum(book)?;
            if local_status.checksum.as_deref() != Some(current.as_str()) {
                self.put_book(&folder, false, true)?;
                state.has_problems = true;
                self.fetch_and_report(book, state, |this, state| {
                    this.report(
                        state,
                        ProgressKind::Error,
                        "ConflictingCheckout",
                        "The book '{0}', which was checked out and edited, was checked out to \
                         someone else in the Team Collection. Local changes have been overwritten, \
                         but are saved to Lost-and-found.",
                        Some(book),
                        None,
                    );
                });
            } else {
                self.write_book_status(book, &repo_status)?;
            }
            return Ok(());
        }

        // Content changed in the repo.
        let current = self.current_checksum(book)?;
        if local_status.checksum.as_deref() == Some(current.as_str()) {
            let fetched =
                self.fetch_and_report(book, state, |this, state| Self::updating(this, book, state));
            if fetched {
                let checksum = repo_status.checksum.clone().unwrap_or_default();
                self.write_book_status(book, &local_status.with_checksum(checksum))?;
            }
            return Ok(());
        }
        if repo_status.checksum.as_deref() == Some(current.as_str()) {
            // Both sides made the same edit; nothing to save.
            debug!(book, "local and repo edits converged");
            self.write_local_status(book, &repo_status)?;
            return Ok(());
        }
        self.put_book(&folder, false, true)?;
        state.has_problems = true;
        self.fetch_and_report(book, state, |this, state| {
            this.report(
                state,
                ProgressKind::Error,
                "ConflictingEdit",
                "The book '{0}', which was checked out and edited on this computer, was modified \
                 in the Team Collection by someone else. Local changes have been overwritten, but \
                 are saved to Lost-and-found.",
                Some(book),
                None,
            );
        });
        Ok(())
    }

    fn sync_repo_book_without_local_copy(
        &mut self,
        book: &str,
        state: &mut StartupState<'_>,
    ) -> Result<()> {
        if state.old_names.contains(book) {
            // Renamed here and not checked in yet.
            return Ok(());
        }
        if is_conflicted_copy(book) {
            self.report(
                state,
                ProgressKind::Error,
                "ResolvedDropboxConflict",
                "Two members of your team had a book checked out at the same time, so the Team \
                 Collection got two different versions of it. The program has moved \"{0}\" to \
                 the Lost & Found.",
                Some(book),
                None,
            );
            self.repo.move_to_lost_and_found(book)?;
            state.has_problems = true;
            return Ok(());
        }
        let already_reported = state.renamed.contains(book);
        self.fetch_and_report(book, state, |this, state| {
            if !already_reported {
                this.report(
                    state,
                    ProgressKind::Progress,
                    "FetchedNewBook",
                    "Fetching a new book '{0}' from the Team Collection",
                    Some(book),
                    None,
                );
            }
        });
        Ok(())
    }

    /// Rename the local folder when the repo spells the name with different case.
    fn ensure_consistent_casing(&self, book: &str) -> Result<()> {
        let Some(repo_name) = self.repo.canonical_book_name(book) else {
            return Ok(());
        };
        let local_name = self.local.find_book_ignoring_case(book)?;
        match local_name {
            Some(local_name) if local_name != repo_name => {
                info!(from = %local_name, to = %repo_name, "matching repo name case");
                self.local.rename_book(&local_name, &repo_name)
            }
            _ => Ok(()),
        }
    }
}
