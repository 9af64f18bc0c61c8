use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{OwnWriteTracker, RepoStore};
use crate::error::{CoreError, PackageError, RepoError, Result};
use crate::local::{book_id_from_meta, read_book_id, COLLECTION_FOLDERS, META_FILE_NAME};
use crate::package::{self, PACKAGE_EXTENSION, TEMP_SUFFIX};
use crate::status::StatusRecord;

pub const BOOKS_FOLDER: &str = "Books";
pub const LOST_AND_FOUND_FOLDER: &str = "Lost and Found";
pub const OTHER_FOLDER: &str = "Other";
pub const COLLECTION_FILES_PACKAGE: &str = "Other Collection Files.zip";
pub const JOIN_FILE_NAME: &str = "Join this Team Collection.JoinTC";
pub const TOMBSTONE_EXTENSION: &str = "tombstone";
pub const TOMBSTONE_TEXT: &str =
    "This file marks the deletion of a book previously in the collection";
const COLOR_PALETTES_FILE: &str = "colorPalettes.json";

// Windows sharing and lock violations.
const ERROR_SHARING_VIOLATION: i32 = 32;
const ERROR_LOCK_VIOLATION: i32 = 33;

/// A Team Collection stored as plain files in a shared folder.
#[derive(Debug, Clone)]
pub struct FolderRepo {
    root: PathBuf,
    own_writes: OwnWriteTracker,
}

impl FolderRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            own_writes: OwnWriteTracker::new(),
        }
    }

    /// Create the folder structure of a new repo.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let repo = Self::new(root);
        fs::create_dir_all(repo.books_dir())?;
        fs::create_dir_all(repo.other_dir())?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn books_dir(&self) -> PathBuf {
        self.root.join(BOOKS_FOLDER)
    }

    pub fn lost_and_found_dir(&self) -> PathBuf {
        self.root.join(LOST_AND_FOUND_FOLDER)
    }

    pub fn other_dir(&self) -> PathBuf {
        self.root.join(OTHER_FOLDER)
    }

    pub fn tombstone_path(&self, book_id: &str) -> PathBuf {
        self.root.join(format!("{book_id}.{TOMBSTONE_EXTENSION}"))
    }

    /// Marker file teammates open to join; holds the collection name.
    pub fn write_join_file(&self, collection_name: &str) -> Result<()> {
        fs::write(self.root.join(JOIN_FILE_NAME), collection_name)?;
        Ok(())
    }

    /// Collection name from the join file, else the folder name minus " - TC".
    pub fn collection_name(&self) -> String {
        if let Ok(name) = fs::read_to_string(self.root.join(JOIN_FILE_NAME)) {
            let name = name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
        let folder = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        folder
            .strip_suffix(" - TC")
            .map(str::to_string)
            .unwrap_or(folder)
    }

    /// Files in Lost and Found, sorted.
    pub fn lost_and_found_names(&self) -> Result<Vec<String>> {
        let dir = self.lost_and_found_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn lost_and_found_path(&self, book: &str) -> PathBuf {
        let dir = self.lost_and_found_dir();
        let first = dir.join(format!("{book}.{PACKAGE_EXTENSION}"));
        if !first.exists() {
            return first;
        }
        (2..)
            .map(|n| dir.join(format!("{book}{n}.{PACKAGE_EXTENSION}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or_else(|| dir.join(format!("{book}-{}.{PACKAGE_EXTENSION}", Uuid::new_v4())))
    }

    fn bad_package(book: &str, message: impl ToString) -> CoreError {
        RepoError::BadPackage {
            book: book.to_string(),
            message: message.to_string(),
        }
        .into()
    }

    /// Classify a failed write: sync-agent contention, permissions, or plain I/O.
    fn write_failure(&self, book: &str, path: &Path, error: PackageError) -> CoreError {
        match error {
            PackageError::Io(e) => self.io_write_failure(book, path, e),
            PackageError::Zip(zip::result::ZipError::Io(e)) => self.io_write_failure(book, path, e),
            other => Self::bad_package(book, other),
        }
    }

    fn io_write_failure(&self, book: &str, path: &Path, error: io::Error) -> CoreError {
        let busy = cfg!(windows)
            && matches!(
                error.raw_os_error(),
                Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
            );
        if busy {
            warn!(book, "repo file is busy: {error}");
            return RepoError::CannotLock {
                book: book.to_string(),
                sync_agent: RepoError::sync_agent_for(&self.root),
            }
            .into();
        }
        if error.kind() == io::ErrorKind::PermissionDenied {
            return RepoError::Permission {
                path: path.parent().unwrap_or(path).to_path_buf(),
            }
            .into();
        }
        error.into()
    }

    fn is_collection_file_entry(name: &str) -> bool {
        name != COLOR_PALETTES_FILE && !name.ends_with(TEMP_SUFFIX)
    }
}

impl RepoStore for FolderRepo {
    fn description(&self) -> String {
        self.root.display().to_string()
    }

    fn watch_root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn own_write_tracker(&self) -> Option<OwnWriteTracker> {
        Some(self.own_writes.clone())
    }

    fn book_names(&self) -> Result<Vec<String>> {
        let dir = self.books_dir();
        if !dir.is_dir() {
            return Err(RepoError::MissingRepo(self.root.clone()).into());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PACKAGE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn is_book_present(&self, book: &str) -> bool {
        self.package_path(book).is_file()
    }

    fn package_path(&self, book: &str) -> PathBuf {
        self.books_dir().join(format!("{book}.{PACKAGE_EXTENSION}"))
    }

    fn read_status(&self, book: &str) -> Result<Option<StatusRecord>> {
        let path = self.package_path(book);
        if !path.is_file() {
            return Ok(None);
        }
        let comment = match package::read_comment(&path) {
            Ok(comment) => comment,
            Err(PackageError::Io(e)) => return Err(e.into()),
            Err(e) => return Err(Self::bad_package(book, e)),
        };
        StatusRecord::from_json(&comment)
            .map(Some)
            .map_err(|e| Self::bad_package(book, e))
    }

    fn write_status(&self, book: &str, status: &StatusRecord) -> Result<()> {
        let path = self.package_path(book);
        if !path.is_file() {
            return Err(RepoError::NotInRepo(book.to_string()).into());
        }
        let comment = status.for_repo().to_json()?;
        self.own_writes
            .track(&path, || package::rewrite_comment(&path, &comment))
            .map_err(|e| self.write_failure(book, &path, e))?;
        debug!(book, "wrote repo status");
        Ok(())
    }

    fn put_book(&self, folder: &Path, status: &StatusRecord, in_lost_and_found: bool) -> Result<()> {
        let book = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::Custom(format!("not a book folder: {}", folder.display())))?;
        let dest = if in_lost_and_found {
            self.lost_and_found_path(&book)
        } else {
            self.package_path(&book)
        };
        let comment = status.for_repo().to_json()?;
        self.own_writes
            .track(&dest, || package::write_package(folder, &dest, &comment))
            .map_err(|e| self.write_failure(&book, &dest, e))?;

        if in_lost_and_found {
            info!(book = %book, "saved copy to {}", dest.display());
            return Ok(());
        }
        if let Some(id) = read_book_id(folder) {
            let tombstone = self.tombstone_path(&id);
            if tombstone.exists() {
                fs::remove_file(&tombstone)?;
                debug!(book = %book, "removed tombstone");
            }
        }
        Ok(())
    }

    fn fetch_book(&self, book: &str, dest_collection: &Path) -> Result<()> {
        let path = self.package_path(book);
        if !path.is_file() {
            return Err(RepoError::NotInRepo(book.to_string()).into());
        }
        package::extract_package(&path, &dest_collection.join(book)).map_err(|e| match e {
            PackageError::Io(e) => e.into(),
            other => Self::bad_package(book, other),
        })
    }

    fn delete_book(&self, book: &str, make_tombstone: bool) -> Result<()> {
        let path = self.package_path(book);
        let book_id = self
            .read_book_file(book, META_FILE_NAME)
            .ok()
            .flatten()
            .and_then(|meta| book_id_from_meta(&meta));
        if path.exists() {
            self.own_writes
                .track(&path, || fs::remove_file(&path))
                .map_err(|e| self.io_write_failure(book, &path, e))?;
        }
        if make_tombstone {
            match book_id {
                Some(id) => fs::write(self.tombstone_path(&id), TOMBSTONE_TEXT)?,
                None => warn!(book, "no book id, cannot write tombstone"),
            }
        }
        info!(book, make_tombstone, "deleted book from repo");
        Ok(())
    }

    fn rename_book(&self, old: &str, new: &str) -> Result<()> {
        let from = self.package_path(old);
        let to = self.package_path(new);
        if !from.is_file() {
            return Err(RepoError::NotInRepo(old.to_string()).into());
        }
        let result = self.own_writes.track(&to, || -> io::Result<()> {
            if old.to_lowercase() == new.to_lowercase() {
                let hop = temp_hop(&to);
                fs::rename(&from, &hop)?;
                fs::rename(&hop, &to)
            } else if to.exists() {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{new} is already in the Team Collection"),
                ))
            } else {
                fs::rename(&from, &to)
            }
        });
        result.map_err(|e| self.io_write_failure(new, &to, e))?;
        info!(old, new, "renamed book in repo");
        Ok(())
    }

    fn move_to_lost_and_found(&self, book: &str) -> Result<()> {
        let from = self.package_path(book);
        if !from.is_file() {
            return Err(RepoError::NotInRepo(book.to_string()).into());
        }
        fs::create_dir_all(self.lost_and_found_dir())?;
        let to = self.lost_and_found_path(book);
        self.own_writes
            .track(&from, || fs::rename(&from, &to))
            .map_err(|e| self.io_write_failure(book, &from, e))?;
        info!(book, "moved package to {}", to.display());
        Ok(())
    }

    fn has_tombstone(&self, book_id: &str) -> bool {
        self.tombstone_path(book_id).is_file()
    }

    fn read_book_file(&self, book: &str, name: &str) -> Result<Option<String>> {
        let path = self.package_path(book);
        if !path.is_file() {
            return Ok(None);
        }
        package::read_entry(&path, name).map_err(|e| match e {
            PackageError::Io(e) => e.into(),
            other => Self::bad_package(book, other),
        })
    }

    fn canonical_book_name(&self, book: &str) -> Option<String> {
        let wanted = book.to_lowercase();
        self.book_names()
            .ok()?
            .into_iter()
            .find(|name| name.to_lowercase() == wanted)
    }

    fn put_collection_files(&self, files: &[(String, PathBuf)]) -> Result<()> {
        let other = self.other_dir();
        fs::create_dir_all(&other)?;

        let root_files: Vec<(String, PathBuf)> = files
            .iter()
            .filter(|(name, _)| !name.contains('/'))
            .cloned()
            .collect();
        let dest = other.join(COLLECTION_FILES_PACKAGE);
        self.own_writes
            .track(&dest, || package::write_entries(&root_files, &dest, None))
            .map_err(|e| self.write_failure(COLLECTION_FILES_PACKAGE, &dest, e))?;

        for folder in COLLECTION_FOLDERS {
            let prefix = format!("{folder}/");
            let entries: Vec<(String, PathBuf)> = files
                .iter()
                .filter_map(|(name, path)| {
                    name.strip_prefix(&prefix)
                        .map(|rest| (rest.to_string(), path.clone()))
                })
                .collect();
            if entries.is_empty() {
                continue;
            }
            let dest = other.join(format!("{folder}.zip"));
            self.own_writes
                .track(&dest, || package::write_entries(&entries, &dest, None))
                .map_err(|e| self.write_failure(folder, &dest, e))?;
        }
        debug!(count = files.len(), "stored collection files");
        Ok(())
    }

    fn fetch_collection_files(&self, local: &Path) -> Result<()> {
        let other = self.other_dir();
        let root_package = other.join(COLLECTION_FILES_PACKAGE);
        if root_package.is_file() {
            package::extract_over(&root_package, local)?;
        }
        for folder in COLLECTION_FOLDERS {
            let folder_package = other.join(format!("{folder}.zip"));
            if folder_package.is_file() {
                package::extract_package(&folder_package, &local.join(folder))?;
            }
        }
        debug!("fetched collection files");
        Ok(())
    }

    fn last_collection_files_change(&self) -> Option<DateTime<Utc>> {
        let entries = fs::read_dir(self.other_dir()).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| Self::is_collection_file_entry(&entry.file_name().to_string_lossy()))
            .filter_map(|entry| entry.metadata().ok()?.modified().ok())
            .map(DateTime::<Utc>::from)
            .max()
    }

    fn check_connection(&self) -> Result<()> {
        if !self.root.is_dir() || !self.books_dir().is_dir() {
            return Err(RepoError::MissingRepo(self.root.clone()).into());
        }
        let scratch = self.books_dir().join(format!(".write-check-{}{TEMP_SUFFIX}", Uuid::new_v4()));
        match fs::write(&scratch, b"") {
            Ok(()) => {
                let _ = fs::remove_file(&scratch);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(RepoError::Permission {
                path: self.books_dir(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

fn temp_hop(path: &Path) -> PathBuf {
    path.with_file_name(format!(".rename-{}{TEMP_SUFFIX}", Uuid::new_v4()))
}
