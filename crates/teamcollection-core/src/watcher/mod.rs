//! OS file watching for the repo and local collection folders.
//!
//! Three `notify` watchers feed one [`PendingChangeQueue`]:
//!
//! * repo `Books/`: package created, changed or deleted;
//! * repo `Other/`: shared collection files changed;
//! * the local collection root: collection-level files edited by the user.
//!
//! Callbacks run on notify's threads and do nothing but filter and enqueue.

pub mod queue;

pub use queue::{ChangeKind, PendingChange, PendingChangeQueue};

use chrono::{DateTime, Duration, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as WatchConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::local::{is_root_collection_file, COLLECTION_FOLDERS};
use crate::package::{PACKAGE_EXTENSION, TEMP_SUFFIX};
use crate::repo::{OwnWriteTracker, BOOKS_FOLDER, OTHER_FOLDER};
use crate::storage::SyncConfig;

const COLOR_PALETTES_FILE: &str = "colorPalettes.json";

/// Book name for a package path; `None` for temp files and anything else.
pub fn book_name_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(TEMP_SUFFIX) {
        return None;
    }
    name.strip_suffix(&format!(".{PACKAGE_EXTENSION}"))
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Map one notify event under `Books/` to the book changes it implies.
pub fn classify_book_event(kind: &EventKind, paths: &[PathBuf]) -> Vec<(ChangeKind, PathBuf)> {
    let tag = |change: ChangeKind, path: &PathBuf| (change, path.clone());
    let changes: Vec<(ChangeKind, PathBuf)> = match kind {
        EventKind::Create(_) => paths.iter().map(|p| tag(ChangeKind::NewBook, p)).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::new();
            if let Some(from) = paths.first() {
                out.push(tag(ChangeKind::BookDeleted, from));
            }
            if let Some(to) = paths.get(1) {
                out.push(tag(ChangeKind::BookChanged, to));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(|p| tag(ChangeKind::BookDeleted, p)).collect()
        }
        EventKind::Modify(_) => paths.iter().map(|p| tag(ChangeKind::BookChanged, p)).collect(),
        EventKind::Remove(_) => paths.iter().map(|p| tag(ChangeKind::BookDeleted, p)).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    };
    changes
        .into_iter()
        .filter(|(_, path)| book_name_of(path).is_some())
        .collect()
}

/// True for a path in the repo's `Other/` folder that should trigger a check.
pub fn is_repo_collection_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name != COLOR_PALETTES_FILE && !name.ends_with(TEMP_SUFFIX))
}

/// True for a collection-level file of the local collection at `root`.
pub fn is_local_collection_file(root: &Path, path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(parent) = path.parent() else {
        return false;
    };
    if parent == root {
        return is_root_collection_file(name);
    }
    let folder = parent.file_name().and_then(|n| n.to_str());
    parent.parent() == Some(root) && folder.is_some_and(|f| COLLECTION_FOLDERS.contains(&f))
}

/// Drops notifications caused by our own writes and change/delete noise
/// that directly follows a create of the same book.
#[derive(Debug)]
pub struct ChangeFilter {
    tracker: Option<OwnWriteTracker>,
    own_write_window: Duration,
    create_suppress: Duration,
    recent_creates: HashMap<String, DateTime<Utc>>,
}

impl ChangeFilter {
    pub fn new(tracker: Option<OwnWriteTracker>, sync: &SyncConfig) -> Self {
        Self {
            tracker,
            own_write_window: sync.own_write_window(),
            create_suppress: sync.create_suppress(),
            recent_creates: HashMap::new(),
        }
    }

    pub fn is_own_write(&self, path: &Path) -> bool {
        self.tracker
            .as_ref()
            .is_some_and(|t| t.is_own_write(path, self.own_write_window))
    }

    /// Whether a book change observed at `now` should be queued.
    pub fn admit(&mut self, kind: ChangeKind, book: &str, path: &Path, now: DateTime<Utc>) -> bool {
        if self.is_own_write(path) {
            trace!(book, "ignoring our own write");
            return false;
        }
        match kind {
            ChangeKind::NewBook => {
                let window = self.create_suppress;
                self.recent_creates.retain(|_, created| now - *created <= window);
                self.recent_creates.insert(book.to_string(), now);
                true
            }
            ChangeKind::BookChanged | ChangeKind::BookDeleted => {
                let suppressed = self
                    .recent_creates
                    .get(book)
                    .is_some_and(|created| now - *created <= self.create_suppress);
                if suppressed {
                    trace!(book, ?kind, "ignoring change right after create");
                }
                !suppressed
            }
            _ => true,
        }
    }
}

/// How long a change of `kind` waits in the queue before it is handled.
pub fn delay_for(kind: ChangeKind, sync: &SyncConfig) -> Duration {
    match kind {
        ChangeKind::BookDeleted => sync.delete_settle(),
        _ => sync.watch_debounce(),
    }
}

/// Keeps the OS watchers alive; dropping it stops monitoring.
pub struct ChangeWatcher {
    watchers: Vec<RecommendedWatcher>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl ChangeWatcher {
    /// Start watching `repo_root` (if any) and `local_root`.
    pub fn start(
        repo_root: Option<&Path>,
        local_root: &Path,
        tracker: Option<OwnWriteTracker>,
        sync: &SyncConfig,
        queue: Arc<PendingChangeQueue>,
    ) -> Result<Self> {
        let mut watchers = Vec::new();
        if let Some(repo_root) = repo_root {
            watchers.push(Self::watch_books(
                &repo_root.join(BOOKS_FOLDER),
                ChangeFilter::new(tracker.clone(), sync),
                sync.clone(),
                Arc::clone(&queue),
            )?);
            let other = repo_root.join(OTHER_FOLDER);
            if other.is_dir() {
                watchers.push(Self::watch_repo_other(
                    &other,
                    ChangeFilter::new(tracker, sync),
                    sync.clone(),
                    Arc::clone(&queue),
                )?);
            }
        }
        watchers.push(Self::watch_local(local_root, sync.clone(), queue)?);
        debug!(count = watchers.len(), "file watchers started");
        Ok(Self { watchers })
    }

    fn watch_books(
        dir: &Path,
        mut filter: ChangeFilter,
        sync: SyncConfig,
        queue: Arc<PendingChangeQueue>,
    ) -> Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        error!("repo watcher error: {e}");
                        return;
                    }
                };
                let now = Utc::now();
                for (kind, path) in classify_book_event(&event.kind, &event.paths) {
                    let Some(book) = book_name_of(&path) else {
                        continue;
                    };
                    if filter.admit(kind, &book, &path, now) {
                        debug!(book = %book, ?kind, "queued remote change");
                        queue.enqueue(kind, &book, delay_for(kind, &sync));
                    }
                }
            },
            WatchConfig::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    fn watch_repo_other(
        dir: &Path,
        filter: ChangeFilter,
        sync: SyncConfig,
        queue: Arc<PendingChangeQueue>,
    ) -> Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else {
                    return;
                };
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                let relevant = event
                    .paths
                    .iter()
                    .any(|p| is_repo_collection_file(p) && !filter.is_own_write(p));
                if relevant {
                    queue.enqueue(ChangeKind::CollectionFilesChanged, "", sync.watch_debounce());
                }
            },
            WatchConfig::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    fn watch_local(
        root: &Path,
        sync: SyncConfig,
        queue: Arc<PendingChangeQueue>,
    ) -> Result<RecommendedWatcher> {
        let root_owned = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else {
                    return;
                };
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                if event
                    .paths
                    .iter()
                    .any(|p| is_local_collection_file(&root_owned, p))
                {
                    queue.enqueue(
                        ChangeKind::LocalCollectionFilesChanged,
                        "",
                        sync.watch_debounce(),
                    );
                }
            },
            WatchConfig::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn book(path: &str) -> PathBuf {
        PathBuf::from(format!("/repo/Books/{path}"))
    }

    #[test]
    fn book_names_come_from_package_files_only() {
        assert_eq!(book_name_of(&book("Ducks.book")).as_deref(), Some("Ducks"));
        assert_eq!(book_name_of(&book("Ducks.book.tmp")), None);
        assert_eq!(book_name_of(&book("notes.txt")), None);
        assert_eq!(book_name_of(&book(".book")), None);
    }

    #[test]
    fn classify_maps_event_kinds() {
        let create = classify_book_event(&EventKind::Create(CreateKind::File), &[book("A.book")]);
        assert_eq!(create, vec![(ChangeKind::NewBook, book("A.book"))]);

        let modify = classify_book_event(
            &EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[book("A.book")],
        );
        assert_eq!(modify, vec![(ChangeKind::BookChanged, book("A.book"))]);

        let remove = classify_book_event(&EventKind::Remove(RemoveKind::File), &[book("A.book")]);
        assert_eq!(remove, vec![(ChangeKind::BookDeleted, book("A.book"))]);

        let access = classify_book_event(
            &EventKind::Access(notify::event::AccessKind::Any),
            &[book("A.book")],
        );
        assert!(access.is_empty());
    }

    #[test]
    fn classify_rename_both_is_delete_then_change() {
        let changes = classify_book_event(
            &EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[book("Old.book"), book("New.book")],
        );
        assert_eq!(
            changes,
            vec![
                (ChangeKind::BookDeleted, book("Old.book")),
                (ChangeKind::BookChanged, book("New.book")),
            ]
        );

        let to = classify_book_event(
            &EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[book("New.book")],
        );
        assert_eq!(to, vec![(ChangeKind::BookChanged, book("New.book"))]);
    }

    #[test]
    fn classify_ignores_temp_files() {
        let changes = classify_book_event(
            &EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[book("A.book.tmp"), book("A.book")],
        );
        assert_eq!(changes, vec![(ChangeKind::BookChanged, book("A.book"))]);
    }

    #[test]
    fn filter_drops_own_writes() {
        let tracker = OwnWriteTracker::new();
        let mut filter = ChangeFilter::new(Some(tracker.clone()), &SyncConfig::default());
        let path = book("A.book");
        tracker.track(&path, || ());
        assert!(!filter.admit(ChangeKind::BookChanged, "A", &path, Utc::now()));
        assert!(filter.admit(ChangeKind::BookChanged, "B", &book("B.book"), Utc::now()));
    }

    #[test]
    fn filter_suppresses_changes_right_after_create() {
        let mut filter = ChangeFilter::new(None, &SyncConfig::default());
        let path = book("A.book");
        let created = Utc::now();
        assert!(filter.admit(ChangeKind::NewBook, "A", &path, created));
        assert!(!filter.admit(ChangeKind::BookChanged, "A", &path, created + Duration::milliseconds(200)));
        assert!(!filter.admit(ChangeKind::BookDeleted, "A", &path, created + Duration::milliseconds(900)));
        assert!(filter.admit(ChangeKind::BookChanged, "A", &path, created + Duration::seconds(5)));
    }

    #[test]
    fn filter_forgets_creates_outside_the_window() {
        let mut filter = ChangeFilter::new(None, &SyncConfig::default());
        let start = Utc::now();
        for i in 0..50 {
            let name = format!("B{i}");
            filter.admit(ChangeKind::NewBook, &name, &book(&format!("{name}.book")), start);
        }
        assert_eq!(filter.recent_creates.len(), 50);

        let later = start + Duration::seconds(10);
        filter.admit(ChangeKind::NewBook, "C", &book("C.book"), later);
        assert_eq!(filter.recent_creates.len(), 1);
        assert!(filter.recent_creates.contains_key("C"));
    }

    #[test]
    fn deletes_wait_longer_than_changes() {
        let sync = SyncConfig::default();
        assert_eq!(delay_for(ChangeKind::BookDeleted, &sync), Duration::milliseconds(5000));
        assert_eq!(delay_for(ChangeKind::BookChanged, &sync), Duration::milliseconds(100));
    }

    #[test]
    fn collection_file_paths() {
        let root = Path::new("/local/My Books");
        assert!(is_local_collection_file(root, &root.join("customCollectionStyles.css")));
        assert!(is_local_collection_file(root, &root.join("collection.toml")));
        assert!(is_local_collection_file(root, &root.join("Allowed Words").join("cat.txt")));
        assert!(!is_local_collection_file(root, &root.join("lastCollectionFileSyncData.txt")));
        assert!(!is_local_collection_file(root, &root.join("Ducks").join("Ducks.htm")));

        assert!(is_repo_collection_file(Path::new("/repo/Other/Other Collection Files.zip")));
        assert!(!is_repo_collection_file(Path::new("/repo/Other/colorPalettes.json")));
        assert!(!is_repo_collection_file(Path::new("/repo/Other/Allowed Words.zip.tmp")));
    }
}
