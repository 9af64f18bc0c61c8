//! # Team Collection Core Library
//!
//! This library provides the core logic for Team Collections: a group of
//! people sharing a collection of books through a plain shared folder
//! (typically replicated by Dropbox or a network drive). It follows a
//! CLI-first philosophy where every operation is available via the
//! standalone CLI binary, with any GUI being a thin layer over the same core.
//!
//! ## Architecture
//!
//! - **Stores**: [`LocalStore`] for the user's collection folder and the
//!   [`RepoStore`] trait for the shared repo ([`FolderRepo`], or
//!   [`DisconnectedRepo`] while it cannot be reached)
//! - **Engine**: [`TeamCollection`] owns both stores and implements
//!   locking, checkin, startup reconciliation and remote-change handling
//! - **Watchers**: OS file notifications become [`PendingChange`]s that the
//!   engine drains one at a time when idle
//! - **Message log**: persistent user-facing history with derived status
//!
//! ## Key Components
//!
//! - [`TeamCollection`]: The reconciliation engine
//! - [`StatusRecord`]: Checksum and lock state of one book
//! - [`MessageLog`]: User-facing history of what sync did
//! - [`Config`]: Application configuration management

pub mod checksum;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod local;
pub mod manager;
pub mod message_log;
pub mod package;
pub mod repo;
pub mod status;
pub mod storage;
pub mod watcher;

#[cfg(test)]
mod message_log_tests;

pub use checksum::book_checksum;
pub use engine::{CollectionHandle, NullProgress, ProgressKind, ProgressSink, TeamCollection};
pub use error::{ConfigError, CoreError, PackageError, RepoError, Result};
pub use events::{CheckedOutBy, CollectionEvent, EventBus};
pub use identity::Identity;
pub use local::LocalStore;
pub use manager::{create_team_collection, join_team_collection, open_and_sync, open_collection};
pub use message_log::{CollectionStatus, LogMessage, MessageKind, MessageLog};
pub use repo::{DisconnectedRepo, FolderRepo, RepoStore};
pub use status::StatusRecord;
pub use storage::{data_dir, Config, IdentityConfig, LoggingConfig, SyncConfig};
pub use watcher::{ChangeKind, ChangeWatcher, PendingChange, PendingChangeQueue};
