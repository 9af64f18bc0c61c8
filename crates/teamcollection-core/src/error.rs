//! Core error types for teamcollection-core.
//!
//! `RepoError` carries the sync-specific failures (bad packages, lock
//! conflicts, sync-agent contention); everything else funnels into
//! `CoreError` through `#[from]` conversions.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Core error type for teamcollection-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Shared repository errors
    #[error("{0}")]
    Repo(#[from] RepoError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Book package (zip) errors
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// Identity could not be determined
    #[error("Identity error: {0}")]
    Identity(#[from] crate::identity::IdentityError),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

impl CoreError {
    /// True when the error is a corrupt or unreadable book package.
    pub fn is_bad_package(&self) -> bool {
        matches!(self, CoreError::Repo(RepoError::BadPackage { .. }))
    }
}

/// Errors raised while talking to the shared Team Collection folder.
#[derive(Error, Debug)]
pub enum RepoError {
    /// The package exists but cannot be opened
    #[error("The book '{book}' in the Team Collection could not be read: {message}")]
    BadPackage { book: String, message: String },

    /// Someone else holds the checkout
    #[error("The book '{book}' is checked out to {holder}")]
    LockConflict { book: String, holder: String },

    /// A third-party sync program is holding the file open
    #[error("The program was not able to modify {book} because some other program is busy with it. This may just be {sync_agent} synchronizing the file. Please try again later")]
    CannotLock { book: String, sync_agent: String },

    /// The status record belongs to a different collection
    #[error("The book '{book}' belongs to a different collection")]
    ForeignCollection { book: String },

    /// Destination folder is not writable
    #[error("Permission denied writing to {path}")]
    Permission { path: PathBuf },

    /// Operation needs a book that has no package in the repo
    #[error("The book '{0}' is not in the Team Collection")]
    NotInRepo(String),

    /// The shared folder itself is gone
    #[error("Could not find the Team Collection folder at {0}")]
    MissingRepo(PathBuf),

    /// Running against the local cache only
    #[error("The Team Collection is disconnected")]
    Disconnected,
}

impl RepoError {
    /// Name the sync program most likely holding files under `path` open.
    pub fn sync_agent_for(path: &Path) -> String {
        let in_dropbox = path
            .components()
            .any(|c| c.as_os_str().eq_ignore_ascii_case("Dropbox"));
        if in_dropbox {
            "Dropbox".to_string()
        } else {
            "Unknown".to_string()
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Errors reading or writing zip packages.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The archive comment does not hold a status record
    #[error("Invalid package comment: {0}")]
    BadComment(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_agent_detects_dropbox_component() {
        let path = Path::new("/home/joe/Dropbox/My Books - TC/Books/a.book");
        assert_eq!(RepoError::sync_agent_for(path), "Dropbox");
        let path = Path::new("/mnt/share/My Books - TC/Books/a.book");
        assert_eq!(RepoError::sync_agent_for(path), "Unknown");
    }

    #[test]
    fn cannot_lock_message_names_agent() {
        let err = RepoError::CannotLock {
            book: "Ducks".into(),
            sync_agent: "Dropbox".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Ducks"));
        assert!(text.contains("This may just be Dropbox synchronizing the file"));
    }

    #[test]
    fn bad_package_is_detected_through_core_error() {
        let err: CoreError = RepoError::BadPackage {
            book: "x".into(),
            message: "broken".into(),
        }
        .into();
        assert!(err.is_bad_package());
        let other: CoreError = RepoError::Disconnected.into();
        assert!(!other.is_bad_package());
    }
}
