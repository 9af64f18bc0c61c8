//! The shared Team Collection folder, behind a capability trait.
//!
//! [`FolderRepo`] talks to a real (possibly Dropbox-replicated) folder;
//! [`DisconnectedRepo`] answers reads from the local cache and refuses
//! every write, so the engine keeps working while the repo is unreachable.

mod disconnected;
mod folder;


pub use disconnected::DisconnectedRepo;
pub use folder::{
    FolderRepo, BOOKS_FOLDER, COLLECTION_FILES_PACKAGE, JOIN_FILE_NAME, LOST_AND_FOUND_FOLDER,
    OTHER_FOLDER, TOMBSTONE_EXTENSION, TOMBSTONE_TEXT,
};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::status::StatusRecord;

/// Everything the engine needs from a place books are shared through.
pub trait RepoStore: Send {
    /// Human-readable location, for messages.
    fn description(&self) -> String;

    fn is_disconnected(&self) -> bool {
        false
    }

    /// Folder to watch for remote changes, if the store has one.
    fn watch_root(&self) -> Option<&Path> {
        None
    }

    fn own_write_tracker(&self) -> Option<OwnWriteTracker> {
        None
    }

    /// Names of every book in the repo, sorted.
    fn book_names(&self) -> Result<Vec<String>>;

    fn is_book_present(&self, book: &str) -> bool;

    /// Where the book's package lives, for error messages.
    fn package_path(&self, book: &str) -> PathBuf;

    /// `Ok(None)` when the book is absent, `RepoError::BadPackage` when unreadable.
    fn read_status(&self, book: &str) -> Result<Option<StatusRecord>>;

    fn write_status(&self, book: &str, status: &StatusRecord) -> Result<()>;

    /// Package `folder` under its own name. With `in_lost_and_found` the
    /// package goes to the first free name in Lost and Found instead.
    fn put_book(&self, folder: &Path, status: &StatusRecord, in_lost_and_found: bool) -> Result<()>;

    /// Unpack the book into `<dest_collection>/<book>`, replacing any folder there.
    fn fetch_book(&self, book: &str, dest_collection: &Path) -> Result<()>;

    fn delete_book(&self, book: &str, make_tombstone: bool) -> Result<()>;

    /// Rename a package in place, without a tombstone.
    fn rename_book(&self, old: &str, new: &str) -> Result<()>;

    /// Move a package out of Books into Lost and Found.
    fn move_to_lost_and_found(&self, book: &str) -> Result<()>;

    fn has_tombstone(&self, book_id: &str) -> bool;

    /// Text of one file inside the package, `None` if it has no such file.
    fn read_book_file(&self, book: &str, name: &str) -> Result<Option<String>>;

    /// The exact name of the package matching `book` ignoring case.
    fn canonical_book_name(&self, book: &str) -> Option<String>;

    /// Store collection-level files given as `(relative name, path)`.
    fn put_collection_files(&self, files: &[(String, PathBuf)]) -> Result<()>;

    fn fetch_collection_files(&self, local: &Path) -> Result<()>;

    /// Most recent change to the stored collection files.
    fn last_collection_files_change(&self) -> Option<DateTime<Utc>>;

    /// `Err` describes why the repo cannot be used right now.
    fn check_connection(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct OwnWriteState {
    last_path: Option<PathBuf>,
    in_progress: bool,
    finished_at: Option<DateTime<Utc>>,
}

/// Remembers the last repo file this process wrote, so watcher callbacks can
/// ignore notifications caused by our own I/O.
#[derive(Debug, Clone, Default)]
pub struct OwnWriteTracker {
    state: Arc<Mutex<OwnWriteState>>,
}

impl OwnWriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, path: &Path) {
        if let Ok(mut state) = self.state.lock() {
            state.last_path = Some(path.to_path_buf());
            state.in_progress = true;
        }
    }

    pub fn finish(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.in_progress = false;
            state.finished_at = Some(Utc::now());
        }
    }

    /// True for the last written path while the write runs and for `window` after.
    pub fn is_own_write(&self, path: &Path, window: chrono::Duration) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        if state.last_path.as_deref() != Some(path) {
            return false;
        }
        state.in_progress
            || state
                .finished_at
                .is_some_and(|done| Utc::now() - done <= window)
    }

    /// Run `write` bracketed by `begin`/`finish`.
    pub fn track<T>(&self, path: &Path, write: impl FnOnce() -> T) -> T {
        self.begin(path);
        let result = write();
        self.finish();
        result
    }
}
