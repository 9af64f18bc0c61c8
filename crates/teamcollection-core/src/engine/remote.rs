//! Handling changes teammates made to the repo while the collection is open.
//!
//! The watchers only enqueue. [`TeamCollection::handle_remote_book_changes_on_idle`]
//! takes one ready change at a time and deals with it completely.

use tracing::{debug, error, info, warn};

use super::TeamCollection;
use crate::error::Result;
use crate::local::{book_id_from_meta, META_FILE_NAME};
use crate::message_log::MessageKind;
use crate::watcher::{ChangeKind, PendingChange};

impl TeamCollection {
    /// Handle the next ready change, if any. Returns whether one was taken.
    pub fn handle_remote_book_changes_on_idle(&mut self) -> Result<bool> {
        let Some(change) = self.queue.pop_ready() else {
            return Ok(false);
        };
        debug!(kind = ?change.kind, book = %change.book, attempts = change.attempts, "handling change");
        match change.kind {
            ChangeKind::NewBook => self.handle_new_book(change)?,
            ChangeKind::BookChanged => self.handle_modified_file(change)?,
            ChangeKind::BookDeleted => self.handle_deleted_repo_file(&change.book)?,
            ChangeKind::CollectionFilesChanged => self.handle_collection_settings_change(),
            ChangeKind::LocalCollectionFilesChanged => {
                if self.repo.check_connection().is_ok() {
                    self.sync_local_and_repo_collection_files(false)?;
                }
            }
        }
        Ok(true)
    }

    /// Handle the changes that were ready when the call started. Anything
    /// requeued for a retry waits for the next call, even with a zero retry
    /// delay. A failing change is logged and dropped. Returns how many ran.
    pub fn handle_ready_changes(&mut self) -> usize {
        let budget = self.queue.len();
        let mut handled = 0;
        while handled < budget {
            match self.handle_remote_book_changes_on_idle() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => error!("failed to handle change: {e}"),
            }
            handled += 1;
        }
        handled
    }

    /// Local edits to a checked-out book that the repo now contradicts,
    /// either in content or in who holds the checkout.
    pub fn has_local_changes_that_must_be_clobbered(&self, book: &str) -> Result<bool> {
        let local = self.get_local_status(book)?;
        if !local.is_checked_out_here_by(&self.identity) {
            return Ok(false);
        }
        let repo = self.get_status(book)?;
        let current = self.current_checksum(book)?;
        if repo.checksum.as_deref() == Some(current.as_str()) {
            return Ok(false);
        }
        Ok(!repo.is_checked_out_here_by(&self.identity) || repo.checksum != local.checksum)
    }

    /// We think we hold the checkout but the repo says otherwise.
    pub fn has_checkout_conflict(&self, book: &str) -> Result<bool> {
        Ok(self
            .get_local_status(book)?
            .is_checked_out_here_by(&self.identity)
            && !self.get_status(book)?.is_checked_out_here_by(&self.identity))
    }

    pub fn has_clobber_problem(&self, book: &str) -> Result<bool> {
        Ok(self.has_local_changes_that_must_be_clobbered(book)? || self.has_checkout_conflict(book)?)
    }

    /// Whether the repo copy differs from what we last synced. A case-only
    /// rename counts unless we hold the book, since local edits can rename it.
    pub fn has_been_changed_remotely(&self, book: &str) -> Result<bool> {
        if self.remotely_renamed.contains(book) {
            return Ok(true);
        }
        let local = self.get_local_status(book)?;
        if local.checksum != self.get_status(book)?.checksum {
            return Ok(true);
        }
        Ok(self.names_differ_only_by_case(book) && !local.is_checked_out_here_by(&self.identity))
    }

    /// True when the repo package for `book` is spelled with different case.
    pub fn names_differ_only_by_case(&self, book: &str) -> bool {
        self.repo
            .canonical_book_name(book)
            .is_some_and(|repo_name| repo_name != book)
    }

    fn retry_later(&self, change: PendingChange) {
        debug!(book = %change.book, attempts = change.attempts, "status unreadable, retrying");
        self.queue.requeue(change, self.sync.retry());
    }

    pub(crate) fn handle_new_book(&mut self, change: PendingChange) -> Result<()> {
        let book = change.book.clone();
        if !self.repo.is_book_present(&book) {
            return Ok(());
        }
        if self.repo.read_status(&book).is_err() {
            self.retry_later(change);
            return Ok(());
        }
        // A checkin or checkout elsewhere can look like a new file.
        if !self.local.status_path(&book).exists() && !self.handle_possible_rename(&book)? {
            info!(book = %book, "new book from a teammate");
            self.log.write_message(
                MessageKind::NewStuff,
                "TeamCollection.NewBookArrived",
                "A new book called '{0}' was added by a teammate.",
                Some(&book),
                None,
            );
        }
        self.update_book_status(&book, true)
    }

    pub(crate) fn handle_modified_file(&mut self, change: PendingChange) -> Result<()> {
        let book = change.book.clone();
        if self.repo.read_status(&book).is_err() {
            self.retry_later(change);
            return Ok(());
        }
        if !self.repo.is_book_present(&book) {
            return Ok(());
        }

        if self.has_local_changes_that_must_be_clobbered(&book)? {
            warn!(book = %book, "edited book changed remotely");
            self.log.write_message(
                MessageKind::Error,
                "TeamCollection.EditedFileChangedRemotely",
                "One of your teammates has modified or checked out the book '{0}', which you have \
                 edited but not checked in. You need to reload the collection to sort things out.",
                Some(&book),
                None,
            );
        } else if self.has_checkout_conflict(&book)? {
            warn!(book = %book, "checkout taken remotely");
            self.log.write_message(
                MessageKind::Error,
                "TeamCollection.ConflictingCheckout",
                "One of your teammates has checked out the book '{0}'. This undoes your checkout.",
                Some(&book),
                None,
            );
        } else if !self.local.book_folder(&book).exists() {
            // Either a rename, or a new book whose NewBook change is on its way.
            self.handle_possible_rename(&book)?;
            return Ok(());
        } else if self.has_been_changed_remotely(&book)? {
            self.log.write_message(
                MessageKind::NewStuff,
                "TeamCollection.BookModifiedRemotely",
                "One of your teammates has made changes to the book '{0}'",
                Some(&book),
                None,
            );
        }
        self.update_book_status(&book, true)
    }

    /// If `new_book` is a teammate's rename of one of our books, report it.
    fn handle_possible_rename(&mut self, new_book: &str) -> Result<bool> {
        let Some(old_name) = self.new_book_renamed_from(new_book)? else {
            return Ok(false);
        };
        info!(old = %old_name, new = new_book, "book renamed by a teammate");
        self.remotely_renamed.insert(old_name.clone());
        self.log.write_message(
            MessageKind::NewStuff,
            "TeamCollection.RenameFromRemote",
            "The book \"{0}\" has been renamed to \"{1}\" by a teammate.",
            Some(&old_name),
            Some(new_book),
        );
        self.update_book_status(&old_name, true)?;
        Ok(true)
    }

    /// The local book with the same id as repo book `new_book` and no
    /// package of its own, if there is one.
    fn new_book_renamed_from(&self, new_book: &str) -> Result<Option<String>> {
        let meta = match self.repo.read_book_file(new_book, META_FILE_NAME) {
            Ok(Some(meta)) => meta,
            Ok(None) | Err(_) => return Ok(None),
        };
        let Some(id) = book_id_from_meta(&meta) else {
            return Ok(None);
        };
        for book in self.local.book_names()? {
            if book == new_book || self.repo.is_book_present(&book) {
                continue;
            }
            if self.local.book_id(&book).as_deref() == Some(id.as_str()) {
                return Ok(Some(book));
            }
        }
        Ok(None)
    }

    /// A package disappeared. Only a tombstone makes it a real delete.
    pub(crate) fn handle_deleted_repo_file(&mut self, book: &str) -> Result<()> {
        if self.repo.is_book_present(book) {
            debug!(book, "package is back, not a delete");
            return Ok(());
        }
        if !self.known_to_have_been_deleted(book) {
            return Ok(());
        }
        if self
            .get_local_status(book)?
            .is_checked_out_here_by(&self.identity)
        {
            self.log.write_message(
                MessageKind::ErrorNoReload,
                "TeamCollection.RemoteDeleteConflict",
                "One of your teammates has deleted the book \"{0}\". Since you have this book \
                 checked out, it has not been deleted locally. You can delete your copy if you \
                 wish, or restore it to the Team Collection by just checking in what you have.",
                Some(book),
                None,
            );
            return Ok(());
        }
        if self.selected_book.as_deref() == Some(book) {
            self.log.write_message(
                MessageKind::Error,
                "TeamCollection.RemoteDeleteCurrent",
                "One of your teammates has deleted the book \"{0}\". Since this book is selected, \
                 your copy will not be deleted until you reload the collection.",
                Some(book),
                None,
            );
            return Ok(());
        }
        info!(book, "deleting book removed by a teammate");
        self.local.delete_book(book)?;
        self.update_book_status(book, true)
    }

    pub(crate) fn handle_collection_settings_change(&mut self) {
        if !self.repo_collection_files_changed() {
            return;
        }
        self.log.write_message(
            MessageKind::NewStuff,
            "TeamCollection.SettingsModifiedRemotely",
            "One of your teammates has made changes to the collection settings.",
            None,
            None,
        );
    }
}
