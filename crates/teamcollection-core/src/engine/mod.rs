//! The reconciliation engine for one open Team Collection.
//!
//! [`TeamCollection`] owns both stores, the message log and the pending
//! change queue. All mutation goes through it. Callers share it as a
//! [`CollectionHandle`], so API calls and the idle drain never interleave.

mod collection_files;
mod remote;
mod startup;

#[cfg(test)]
pub(crate) mod test_support;

pub use startup::{NullProgress, ProgressKind, ProgressSink};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::checksum::book_checksum;
use crate::error::{CoreError, RepoError, Result};
use crate::events::{CheckedOutBy, CollectionEvent, EventBus};
use crate::identity::Identity;
use crate::local::LocalStore;
use crate::message_log::MessageLog;
use crate::repo::RepoStore;
use crate::status::StatusRecord;
use crate::storage::SyncConfig;
use crate::watcher::PendingChangeQueue;

/// The engine behind its single serialization point.
pub type CollectionHandle = Arc<Mutex<TeamCollection>>;

pub struct TeamCollection {
    local: LocalStore,
    repo: Box<dyn RepoStore>,
    log: MessageLog,
    identity: Identity,
    collection_id: String,
    events: EventBus,
    queue: Arc<PendingChangeQueue>,
    sync: SyncConfig,
    selected_book: Option<String>,
    have_shown_remote_settings_warning: bool,
    /// Books seen renamed by a teammate this session, by their old name.
    remotely_renamed: HashSet<String>,
}

impl std::fmt::Debug for TeamCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamCollection")
            .field("local", &self.local.root())
            .field("repo", &self.repo.description())
            .field("identity", &self.identity.user)
            .field("collection_id", &self.collection_id)
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl TeamCollection {
    /// Engine over `local` and `repo`. Loads the persisted message log.
    pub fn new(
        local: LocalStore,
        repo: Box<dyn RepoStore>,
        identity: Identity,
        sync: SyncConfig,
    ) -> Result<Self> {
        let collection_id = local.ensure_collection_id()?;
        let events = EventBus::new();
        let mut log = MessageLog::new(local.log_path(), events.clone());
        let loaded = log.load_saved_messages();
        debug!(loaded, collection = %local.root().display(), "opened team collection");
        Ok(Self {
            local,
            repo,
            log,
            identity,
            collection_id,
            events,
            queue: Arc::new(PendingChangeQueue::new()),
            sync,
            selected_book: None,
            have_shown_remote_settings_warning: false,
            remotely_renamed: HashSet::new(),
        })
    }

    pub fn into_handle(self) -> CollectionHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn repo(&self) -> &dyn RepoStore {
        self.repo.as_ref()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync
    }

    /// Queue shared with the file watchers.
    pub fn queue(&self) -> Arc<PendingChangeQueue> {
        Arc::clone(&self.queue)
    }

    pub fn is_disconnected(&self) -> bool {
        self.repo.is_disconnected()
    }

    /// The book the user currently has open; remote deletes leave it alone.
    pub fn set_selected_book(&mut self, book: Option<String>) {
        self.selected_book = book;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    // Status records

    /// The local sidecar, or an empty record.
    pub fn get_local_status(&self, book: &str) -> Result<StatusRecord> {
        Ok(self.local.read_status(book)?.unwrap_or_default())
    }

    /// Write the sidecar, stamped with this collection's id.
    pub fn write_local_status(&self, book: &str, status: &StatusRecord) -> Result<()> {
        let status = status.clone().with_collection_id(self.collection_id.as_str());
        self.local.write_status(book, &status)
    }

    /// The authoritative status of `book`.
    ///
    /// Comes from the repo package when there is one. A package that cannot
    /// be read yields a record flagged `has_invalid_repo_data`. Without a
    /// package, a pending local rename resolves to the repo book under its
    /// old name, and a local-only book reports the new-book marker.
    pub fn get_status(&self, book: &str) -> Result<StatusRecord> {
        match self.repo.read_status(book) {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) if e.is_bad_package() => {
                return Ok(StatusRecord {
                    has_invalid_repo_data: true,
                    collection_id: Some(self.collection_id.clone()),
                    ..StatusRecord::default()
                });
            }
            Err(e) => return Err(e),
        }

        if let Some(local) = self.local.read_status(book)? {
            if let Some(old_name) = local.old_name.as_deref() {
                if self.repo.is_book_present(old_name) {
                    return Ok(self.repo.read_status(old_name)?.unwrap_or_default());
                }
            }
            if local.collection_id.as_deref() != Some(self.collection_id.as_str()) {
                return Ok(StatusRecord::new_local_book(&self.identity));
            }
            return Ok(local);
        }
        if self.local.has_book(book) {
            return Ok(StatusRecord::new_local_book(&self.identity));
        }
        Ok(StatusRecord::default())
    }

    /// Write `status` to both the repo package and the local sidecar.
    pub fn write_book_status(&self, book: &str, status: &StatusRecord) -> Result<()> {
        let status = status.clone().with_collection_id(self.collection_id.as_str());
        self.repo.write_status(book, &status)?;
        self.local.write_status(book, &status)
    }

    // Locking

    /// Try to check `book` out to `identity`. Returns whether it is now
    /// checked out here by them.
    pub fn attempt_lock(&mut self, book: &str, identity: &Identity) -> Result<bool> {
        if !identity.is_registered() {
            return Ok(false);
        }
        let mut status = self.get_status(book)?;
        if !status.is_checked_out() && !self.repo.is_disconnected() {
            status = status.with_lock(identity);
            self.write_book_status(book, &status)?;
            info!(book, user = %identity.user, "checked out");
        }
        self.update_book_status(book, true)?;
        Ok(status.is_checked_out_here_by(identity))
    }

    /// Check out to the current identity, failing with the holder's name.
    /// New local books need no checkout.
    pub fn checkout(&mut self, book: &str) -> Result<()> {
        if self.get_status(book)?.is_new_local_book() {
            return Ok(());
        }
        let identity = self.identity.clone();
        if self.repo.is_disconnected() {
            return Err(RepoError::Disconnected.into());
        }
        if self.attempt_lock(book, &identity)? {
            return Ok(());
        }
        let holder = self
            .who_has_book_locked_name(book)?
            .unwrap_or_else(|| "nobody".to_string());
        Err(RepoError::LockConflict {
            book: book.to_string(),
            holder,
        }
        .into())
    }

    /// Release the checkout, keeping the content as it is in the repo.
    pub fn unlock(&mut self, book: &str) -> Result<()> {
        let status = self.get_status(book)?.without_lock();
        self.write_book_status(book, &status)?;
        self.update_book_status(book, true)
    }

    /// Clear someone else's checkout.
    pub fn force_unlock(&mut self, book: &str) -> Result<()> {
        let status = self.get_status(book)?.without_lock();
        self.write_book_status(book, &status)?;
        info!(book, "forced unlock");
        self.update_book_status(book, true)
    }

    /// Email of the holder, or the new-book marker for a book only we have.
    pub fn who_has_book_locked(&self, book: &str) -> Result<Option<String>> {
        Ok(self.get_status(book)?.locked_by)
    }

    /// Holder's display name; a new local book is ours.
    pub fn who_has_book_locked_name(&self, book: &str) -> Result<Option<String>> {
        let status = self.get_status(book)?;
        if status.is_new_local_book() {
            return Ok(Some(self.identity.display_name()));
        }
        Ok(status.holder_display_name())
    }

    /// When the lock was taken; `MAX_UTC` when there is none.
    pub fn when_was_book_locked(&self, book: &str) -> Result<DateTime<Utc>> {
        Ok(self
            .get_status(book)?
            .locked_when
            .unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn what_computer_has_book_locked(&self, book: &str) -> Result<Option<String>> {
        Ok(self.get_status(book)?.locked_where)
    }

    pub fn is_checked_out_here(&self, book: &str) -> Result<bool> {
        Ok(self.get_status(book)?.is_checked_out_here_by(&self.identity))
    }

    /// Whether checking in `book` now would not overwrite anyone's work.
    pub fn ok_to_check_in(&self, book: &str) -> Result<bool> {
        if !self.identity.is_registered() {
            return Ok(false);
        }
        let repo = self.get_status(book)?;
        if repo.is_new_local_book() {
            return Ok(true);
        }
        let local = self.get_local_status(book)?;
        if repo.checksum != local.checksum {
            return Ok(false);
        }
        Ok(repo.is_checked_out_here_by(&self.identity) || !repo.is_checked_out())
    }

    /// True if any real checkout (not a new book) is held on this machine.
    pub fn any_books_checked_out_here(&self) -> Result<bool> {
        for book in self.local.book_names()? {
            let status = self.get_local_status(&book)?;
            if !status.is_new_local_book() && status.is_checked_out_here_by(&self.identity) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Storing and fetching books

    /// Store the book folder in the repo.
    ///
    /// With `checkin` the lock is released. A pending local rename first
    /// renames the old package so there is never a moment where the book
    /// looks deleted. With `in_lost_and_found` the package is saved aside
    /// and the local sidecar is left alone.
    pub fn put_book(
        &mut self,
        folder: &Path,
        checkin: bool,
        in_lost_and_found: bool,
    ) -> Result<StatusRecord> {
        let book = folder_book_name(folder)?;
        let checksum = book_checksum(folder)?;
        let mut status = self.get_status(&book)?.with_checksum(checksum);
        if status.is_new_local_book() {
            status = status.without_lock();
        }
        if checkin {
            status = status.without_lock();
        }
        status.has_invalid_repo_data = false;
        status = status.with_collection_id(self.collection_id.as_str());

        if !in_lost_and_found {
            let old_name = self.local.read_status(&book)?.and_then(|s| s.old_name);
            if let Some(old_name) = old_name.filter(|old| self.repo.is_book_present(old)) {
                self.repo.rename_book(&old_name, &book)?;
                info!(old = %old_name, new = %book, "renamed book in repo before checkin");
            }
        }
        self.repo.put_book(folder, &status, in_lost_and_found)?;
        if in_lost_and_found {
            return Ok(status);
        }

        status.old_name = None;
        self.write_local_status(&book, &status)?;
        self.update_book_status(&book, true)?;
        Ok(status)
    }

    /// Check in a local book, refusing when that would overwrite a teammate's work.
    pub fn checkin(&mut self, book: &str) -> Result<StatusRecord> {
        if !self.local.has_book(book) {
            return Err(CoreError::Custom(format!(
                "There is no book '{book}' in {}",
                self.local.root().display()
            )));
        }
        if !self.ok_to_check_in(book)? {
            let holder = self
                .who_has_book_locked_name(book)?
                .unwrap_or_else(|| "nobody".to_string());
            return Err(RepoError::LockConflict {
                book: book.to_string(),
                holder,
            }
            .into());
        }
        let folder = self.local.book_folder(book);
        self.put_book(&folder, true, false)
    }

    /// Replace the local folder with the repo version and record its status locally.
    pub fn copy_book_from_repo_to_local(&self, book: &str) -> Result<()> {
        self.repo.fetch_book(book, self.local.root())?;
        let status = self.get_status(book)?;
        self.write_local_status(book, &status)?;
        debug!(book, "copied book from repo");
        Ok(())
    }

    /// Undo everything since checkout: restore the repo version (and the repo
    /// name if the book was renamed), and release the lock. Returns every
    /// local folder that changed.
    pub fn forget_changes_checkin(&mut self, book: &str) -> Result<Vec<PathBuf>> {
        let mut changed = Vec::new();
        let mut status = self.get_local_status(book)?;
        let mut final_name = book.to_string();
        if let Some(old_name) = status.old_name.take() {
            let old_folder = self.local.book_folder(&old_name);
            changed.push(old_folder.clone());
            changed.push(self.local.book_folder(book));
            if old_folder.exists() {
                // A new book took the old name since the rename; move it aside.
                let moved = self.local.move_to_available_name(&old_name)?;
                changed.push(self.local.book_folder(&moved));
            }
            self.copy_book_from_repo_to_local(&old_name)?;
            self.local.delete_book(book)?;
            final_name = old_name;
        } else {
            self.copy_book_from_repo_to_local(book)?;
        }
        let status = status.without_lock();
        self.write_book_status(&final_name, &status)?;
        if final_name != book {
            self.update_book_status(book, false)?;
        }
        self.update_book_status(&final_name, true)?;
        Ok(changed)
    }

    // Renames and deletes

    /// Record that a checked-out book was renamed locally from `old` to
    /// `new`, so checkin replaces the old package. The folder has already moved.
    pub fn handle_book_rename(&self, old: &str, new: &str) -> Result<()> {
        let status = self.get_local_status(new)?;
        if status.is_new_local_book() || !status.is_checked_out() {
            return Ok(());
        }
        if status.old_name.is_some() {
            // Renamed again this session; the repo still has the first name.
            return Ok(());
        }
        self.write_local_status(new, &status.with_old_name(old))
    }

    /// Rename a local book folder and record the rename.
    pub fn rename_local_book(&mut self, old: &str, new: &str) -> Result<()> {
        if self.local.has_book(new) && old.to_lowercase() != new.to_lowercase() {
            return Err(CoreError::Custom(format!("There is already a book called '{new}'")));
        }
        self.local.rename_book(old, new)?;
        self.handle_book_rename(old, new)?;
        self.update_book_status(old, false)?;
        self.update_book_status(new, true)
    }

    /// Remove the package, leaving a tombstone so other members delete their copies.
    pub fn delete_book_from_repo(&self, book: &str) -> Result<()> {
        self.repo.delete_book(book, true)
    }

    /// Delete a book the user has checked out (or that only exists here)
    /// from both the repo and the local collection.
    pub fn delete_book(&mut self, book: &str) -> Result<()> {
        let status = self.get_status(book)?;
        if !status.is_new_local_book() && !status.is_checked_out_here_by(&self.identity) {
            return Err(RepoError::LockConflict {
                book: book.to_string(),
                holder: status
                    .holder_display_name()
                    .unwrap_or_else(|| "nobody".to_string()),
            }
            .into());
        }
        if self.repo.is_book_present(book) {
            self.delete_book_from_repo(book)?;
        }
        self.local.delete_book(book)?;
        info!(book, "deleted book");
        self.update_book_status(book, false)
    }

    /// Whether the repo holds a tombstone for the local book's id.
    pub fn known_to_have_been_deleted(&self, book: &str) -> bool {
        self.local
            .book_id(book)
            .is_some_and(|id| self.repo.has_tombstone(&id))
    }

    /// Explanation shown when a package cannot be opened.
    pub fn get_bad_zip_file_message(&self, book: &str) -> String {
        format!(
            "There was a problem with the book {book}. The program was not able to open the zip \
             file, which may be corrupted. If you have a good copy of this book on some other \
             computer, you may be able to fix it by checking it in from there. Otherwise, a team \
             member may be able to fix it by deleting {} and replacing it with a good copy.",
            self.repo.package_path(book).display()
        )
    }

    /// Publish the checkout state of `book`. Unlocked books are only
    /// announced when `notify_if_unlocked`.
    pub fn update_book_status(&mut self, book: &str, notify_if_unlocked: bool) -> Result<()> {
        let checked_out_by = if !self.local.book_folder(book).exists() {
            CheckedOutBy::Deleted
        } else {
            let status = match self.get_status(book) {
                Ok(status) => status,
                Err(e) => {
                    debug!(book, "no status to publish: {e}");
                    return Ok(());
                }
            };
            if status.is_new_local_book() || status.is_checked_out_here_by(&self.identity) {
                CheckedOutBy::Me
            } else if status.is_checked_out() {
                CheckedOutBy::Other
            } else if notify_if_unlocked {
                CheckedOutBy::Unlocked
            } else {
                return Ok(());
            }
        };
        self.events.publish(CollectionEvent::BookStatusChanged {
            book: book.to_string(),
            checked_out_by,
        });
        Ok(())
    }

    fn current_checksum(&self, book: &str) -> Result<String> {
        book_checksum(&self.local.book_folder(book))
    }
}

fn folder_book_name(folder: &Path) -> Result<String> {
    folder
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CoreError::Custom(format!("not a book folder: {}", folder.display())))
}
