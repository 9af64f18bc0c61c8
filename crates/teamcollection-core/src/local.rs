//! The user's own copy of the collection.
//!
//! Layout of a local collection folder:
//!
//! ```text
//! <local>/<book>/<book>.htm              a folder is a book only if it has this file
//! <local>/<book>/TeamCollection.status   local status record
//! <local>/TeamCollectionLink.txt         path of the shared repo folder
//! <local>/collection.toml                collection name and id
//! <local>/log.txt                        persisted message log
//! <local>/lastCollectionFileSyncData.txt time and digest of the last collection-files sync
//! ```

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::checksum::digest_files;
use crate::error::{CoreError, Result};
use crate::status::StatusRecord;

pub const STATUS_FILE_NAME: &str = "TeamCollection.status";
pub const LINK_FILE_NAME: &str = "TeamCollectionLink.txt";
pub const SETTINGS_FILE_NAME: &str = "collection.toml";
pub const LOG_FILE_NAME: &str = "log.txt";
pub const SYNC_DATA_FILE_NAME: &str = "lastCollectionFileSyncData.txt";
pub const PRIMARY_FILE_EXTENSION: &str = "htm";
pub const META_FILE_NAME: &str = "meta.json";

/// Root-level files shared through the repo besides the settings file.
const SHARED_ROOT_FILES: &[&str] = &["customCollectionStyles.css", "configuration.txt"];
/// Folders shared through the repo as a whole.
pub const COLLECTION_FOLDERS: &[&str] = &["Allowed Words", "Sample Texts"];

/// `collection.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSettings {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub collection_id: String,
}

/// When collection-level files were last synced, and what they looked like then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub time: DateTime<Utc>,
    pub digest: String,
}

/// `bookInstanceId` from a book folder's `meta.json`.
pub fn read_book_id(folder: &Path) -> Option<String> {
    let content = fs::read_to_string(folder.join(META_FILE_NAME)).ok()?;
    book_id_from_meta(&content)
}

pub fn book_id_from_meta(content: &str) -> Option<String> {
    let meta: serde_json::Value = serde_json::from_str(content).ok()?;
    meta.get("bookInstanceId")?
        .as_str()
        .map(str::to_string)
        .filter(|id| !id.is_empty())
}

/// True if `name` is a collection-level file that lives at the root.
pub fn is_root_collection_file(name: &str) -> bool {
    name == SETTINGS_FILE_NAME
        || SHARED_ROOT_FILES.contains(&name)
        || (name.starts_with("ReaderTools") && name.ends_with(".json"))
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn book_folder(&self, book: &str) -> PathBuf {
        self.root.join(book)
    }

    pub fn is_book_folder(path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let mut primary = name.to_os_string();
        primary.push(".");
        primary.push(PRIMARY_FILE_EXTENSION);
        path.is_dir() && path.join(primary).is_file()
    }

    pub fn has_book(&self, book: &str) -> bool {
        Self::is_book_folder(&self.book_folder(book))
    }

    /// Names of all book folders, sorted.
    pub fn book_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if Self::is_book_folder(&path) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// A book folder whose name matches `book` apart from case.
    pub fn find_book_ignoring_case(&self, book: &str) -> Result<Option<String>> {
        let wanted = book.to_lowercase();
        Ok(self
            .book_names()?
            .into_iter()
            .find(|name| name.to_lowercase() == wanted))
    }

    pub fn status_path(&self, book: &str) -> PathBuf {
        self.book_folder(book).join(STATUS_FILE_NAME)
    }

    /// `None` when there is no sidecar or it cannot be parsed.
    pub fn read_status(&self, book: &str) -> Result<Option<StatusRecord>> {
        let path = self.status_path(book);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match StatusRecord::from_json(&content) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!(book, "ignoring unreadable local status: {e}");
                Ok(None)
            }
        }
    }

    /// Written to a temp file and renamed into place.
    pub fn write_status(&self, book: &str, status: &StatusRecord) -> Result<()> {
        let path = self.status_path(book);
        let tmp = crate::package::temp_path(&path);
        fs::write(&tmp, status.to_json()?)?;
        fs::rename(&tmp, &path)?;
        debug!(book, "wrote local status");
        Ok(())
    }

    pub fn delete_status(&self, book: &str) -> Result<()> {
        match fs::remove_file(self.status_path(book)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_book(&self, book: &str) -> Result<()> {
        let folder = self.book_folder(book);
        if folder.exists() {
            fs::remove_dir_all(&folder)?;
        }
        Ok(())
    }

    pub fn book_id(&self, book: &str) -> Option<String> {
        read_book_id(&self.book_folder(book))
    }

    /// Rename a book folder and its primary file.
    pub fn rename_book(&self, old: &str, new: &str) -> Result<()> {
        let old_folder = self.book_folder(old);
        let new_folder = self.book_folder(new);
        if old.to_lowercase() == new.to_lowercase() {
            // Case-only: go through a temp name so case-insensitive file systems rename too.
            let hop = self.root.join(format!(".{new}.rename-{}", Uuid::new_v4()));
            fs::rename(&old_folder, &hop)?;
            fs::rename(&hop, &new_folder)?;
        } else {
            if new_folder.exists() {
                return Err(CoreError::Custom(format!(
                    "cannot rename '{old}': '{new}' already exists"
                )));
            }
            fs::rename(&old_folder, &new_folder)?;
        }
        let old_primary = new_folder.join(format!("{old}.{PRIMARY_FILE_EXTENSION}"));
        let new_primary = new_folder.join(format!("{new}.{PRIMARY_FILE_EXTENSION}"));
        if old_primary.exists() && old_primary != new_primary {
            let hop = new_folder.join(format!(".{}.tmp", Uuid::new_v4()));
            fs::rename(&old_primary, &hop)?;
            fs::rename(&hop, &new_primary)?;
        }
        Ok(())
    }

    /// Move `book` to the first free `<book>1`, `<book>2`, ... and return the new name.
    pub fn move_to_available_name(&self, book: &str) -> Result<String> {
        let new_name = (1..)
            .map(|n| format!("{book}{n}"))
            .find(|candidate| !self.book_folder(candidate).exists())
            .unwrap_or_else(|| format!("{book}-{}", Uuid::new_v4()));
        self.rename_book(book, &new_name)?;
        Ok(new_name)
    }

    // Link file

    pub fn link_path(&self) -> PathBuf {
        self.root.join(LINK_FILE_NAME)
    }

    /// The repo folder this collection is linked to, if any.
    pub fn read_link(&self) -> Result<Option<PathBuf>> {
        match fs::read_to_string(self.link_path()) {
            Ok(content) => {
                let target = content.trim();
                Ok((!target.is_empty()).then(|| PathBuf::from(target)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_link(&self, repo: &Path) -> Result<()> {
        fs::write(self.link_path(), repo.to_string_lossy().as_bytes())?;
        Ok(())
    }

    pub fn is_team_collection(&self) -> bool {
        self.link_path().is_file()
    }

    // Settings

    pub fn read_settings(&self) -> Result<Option<CollectionSettings>> {
        match fs::read_to_string(self.root.join(SETTINGS_FILE_NAME)) {
            Ok(content) => toml::from_str(&content)
                .map(Some)
                .map_err(|e| CoreError::Custom(format!("{SETTINGS_FILE_NAME}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_settings(&self, settings: &CollectionSettings) -> Result<()> {
        let content = toml::to_string_pretty(settings)
            .map_err(|e| CoreError::Custom(format!("{SETTINGS_FILE_NAME}: {e}")))?;
        fs::write(self.root.join(SETTINGS_FILE_NAME), content)?;
        Ok(())
    }

    /// The collection id, generating and saving one if missing.
    pub fn ensure_collection_id(&self) -> Result<String> {
        let mut settings = self.read_settings()?.unwrap_or_else(|| CollectionSettings {
            name: self.collection_name(),
            collection_id: String::new(),
        });
        if settings.collection_id.is_empty() {
            settings.collection_id = Uuid::new_v4().to_string();
            self.write_settings(&settings)?;
        }
        Ok(settings.collection_id)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE_NAME)
    }

    // Collection-level files

    /// Root-level collection files that exist, sorted.
    pub fn root_collection_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_file() && is_root_collection_file(&name) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every shared collection file as `(relative name, path)`, sorted.
    pub fn collection_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for path in self.root_collection_files()? {
            let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
            files.push((name, path));
        }
        for folder in COLLECTION_FOLDERS {
            let dir = self.root.join(folder);
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    let name = format!("{folder}/{}", entry.file_name().to_string_lossy());
                    files.push((name, entry.path()));
                }
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    pub fn collection_files_digest(&self) -> Result<String> {
        let digest = digest_files(&self.collection_files()?)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(digest))
    }

    /// Latest modification time of any shared collection file.
    pub fn collection_files_update_time(&self) -> Result<Option<DateTime<Utc>>> {
        let mut latest = None;
        for (_, path) in self.collection_files()? {
            let modified: DateTime<Utc> = fs::metadata(&path)?.modified()?.into();
            latest = latest.max(Some(modified));
        }
        Ok(latest)
    }

    pub fn file_modified(&self, name: &str) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(self.root.join(name)).ok()?.modified().ok()?;
        Some(modified.into())
    }

    pub fn read_sync_record(&self) -> Option<SyncRecord> {
        let content = fs::read_to_string(self.root.join(SYNC_DATA_FILE_NAME)).ok()?;
        let (time, digest) = content.trim().split_once(';')?;
        let time = DateTime::parse_from_rfc3339(time).ok()?.with_timezone(&Utc);
        Some(SyncRecord {
            time,
            digest: digest.to_string(),
        })
    }

    pub fn write_sync_record(&self, record: &SyncRecord) -> Result<()> {
        fs::write(
            self.root.join(SYNC_DATA_FILE_NAME),
            format!("{};{}", record.time.to_rfc3339(), record.digest),
        )?;
        Ok(())
    }
}
