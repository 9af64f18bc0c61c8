//! Opening, creating and joining Team Collections.
//!
//! A local collection folder is a Team Collection when it holds a link file
//! naming the shared repo folder. Opening checks the connection first and
//! falls back to a disconnected engine that works from the local copies.

use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::engine::{ProgressSink, TeamCollection};
use crate::error::{CoreError, Result};
use crate::identity::Identity;
use crate::local::LocalStore;
use crate::message_log::MessageKind;
use crate::repo::{DisconnectedRepo, FolderRepo, RepoStore};
use crate::storage::SyncConfig;

/// Appended to the collection name to name its repo folder.
pub const REPO_FOLDER_SUFFIX: &str = " - TC";

const DISCONNECTED_ID: &str = "TeamCollection.OperatingDisconnected";

/// Open the Team Collection at `local_root`.
///
/// An unreachable repo is not an error: the engine comes back disconnected
/// with an `OperatingDisconnected` message in its log.
pub fn open_collection(
    local_root: &Path,
    identity: Identity,
    sync: SyncConfig,
) -> Result<TeamCollection> {
    let local = LocalStore::new(local_root);
    let Some(repo_root) = local.read_link()? else {
        return Err(CoreError::Custom(format!(
            "{} is not a Team Collection",
            local_root.display()
        )));
    };
    let repo = FolderRepo::new(&repo_root);
    match repo.check_connection() {
        Ok(()) => TeamCollection::new(local, Box::new(repo), identity, sync),
        Err(e) => {
            warn!(repo = %repo_root.display(), "opening disconnected: {e}");
            let disconnected = DisconnectedRepo::new(local.clone(), Some(repo_root));
            let mut tc = TeamCollection::new(local, Box::new(disconnected), identity, sync)?;
            let already_noted = tc
                .log()
                .messages()
                .last()
                .is_some_and(|m| m.l10n_id == DISCONNECTED_ID);
            if already_noted {
                return Ok(tc);
            }
            let reason = e.to_string();
            tc.log_mut().write_message(
                MessageKind::Error,
                DISCONNECTED_ID,
                "The Team Collection folder could not be reached ({0}). You can keep working \
                 on books you have checked out, but you cannot check books in or out until the \
                 collection is reloaded with the folder available.",
                Some(&reason),
                None,
            );
            Ok(tc)
        }
    }
}

/// Open the collection and bring it up to date with the repo.
///
/// Returns the engine and whether the startup sync reported problems.
/// A disconnected collection is returned without syncing.
pub fn open_and_sync(
    local_root: &Path,
    identity: Identity,
    sync: SyncConfig,
    progress: &mut dyn ProgressSink,
) -> Result<(TeamCollection, bool)> {
    let mut tc = open_collection(local_root, identity, sync)?;
    if tc.is_disconnected() {
        return Ok((tc, false));
    }
    tc.sync_local_and_repo_collection_files(true)?;
    let has_problems = tc.sync_at_startup(progress, false)?;
    Ok((tc, has_problems))
}

/// Turn the local collection at `local_root` into a Team Collection whose
/// repo is `<repo_parent>/<name> - TC`, checking in every book.
pub fn create_team_collection(
    local_root: &Path,
    repo_parent: &Path,
    identity: Identity,
    sync: SyncConfig,
) -> Result<TeamCollection> {
    let local = LocalStore::new(local_root);
    if local.is_team_collection() {
        return Err(CoreError::Custom(format!(
            "{} is already a Team Collection",
            local_root.display()
        )));
    }
    let name = local
        .read_settings()?
        .map(|settings| settings.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| local.collection_name());
    let repo_root = repo_parent.join(format!("{name}{REPO_FOLDER_SUFFIX}"));
    if repo_root.exists() {
        return Err(CoreError::Custom(format!(
            "There is already a folder at {}",
            repo_root.display()
        )));
    }

    let repo = FolderRepo::create(&repo_root)?;
    repo.write_join_file(&name)?;
    local.write_link(&repo_root)?;
    let mut tc = TeamCollection::new(local, Box::new(repo), identity, sync)?;
    tc.copy_collection_files_to_repo()?;
    let books = tc.local().book_names()?;
    for book in &books {
        let folder = tc.local().book_folder(book);
        tc.put_book(&folder, true, false)?;
    }
    info!(collection = %name, books = books.len(), repo = %repo_root.display(), "created team collection");
    Ok(tc)
}

/// Join the repo at `repo_root`, creating (or merging into) the local
/// collection folder `<local_parent>/<name>`.
///
/// Returns the engine and whether the first-time sync reported problems.
pub fn join_team_collection(
    repo_root: &Path,
    local_parent: &Path,
    identity: Identity,
    sync: SyncConfig,
    progress: &mut dyn ProgressSink,
) -> Result<(TeamCollection, bool)> {
    let repo = FolderRepo::new(repo_root);
    repo.check_connection()?;
    let name = repo.collection_name();
    let local = LocalStore::new(local_parent.join(&name));
    if local.is_team_collection() {
        return Err(CoreError::Custom(format!(
            "{} is already a Team Collection",
            local.root().display()
        )));
    }
    fs::create_dir_all(local.root())?;
    local.write_link(repo_root)?;
    // The collection id arrives with the collection files.
    repo.fetch_collection_files(local.root())?;

    let mut tc = TeamCollection::new(local, Box::new(repo), identity, sync)?;
    tc.record_collection_files_sync()?;
    let has_problems = tc.sync_at_startup(progress, true)?;
    info!(collection = %name, has_problems, "joined team collection");
    Ok((tc, has_problems))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{content_of, fred, make_book, me, ProgressSpy};
    use crate::engine::NullProgress;
    use crate::repo::JOIN_FILE_NAME;
    use tempfile::TempDir;

    fn new_collection(dir: &TempDir) -> std::path::PathBuf {
        let local_root = dir.path().join("mine").join("My Books");
        fs::create_dir_all(&local_root).unwrap();
        make_book(&local_root, "Ducks", "quack", Some("d1"));
        local_root
    }

    #[test]
    fn create_puts_every_book_in_new_repo() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();

        let tc = create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap();

        let repo_root = shared.join("My Books - TC");
        assert!(repo_root.join(JOIN_FILE_NAME).is_file());
        assert_eq!(tc.repo().book_names().unwrap(), vec!["Ducks"]);
        assert!(tc.repo().last_collection_files_change().is_some());
        assert_eq!(tc.local().read_link().unwrap(), Some(repo_root));
        assert!(!tc.get_status("Ducks").unwrap().is_checked_out());
    }

    #[test]
    fn create_refuses_existing_team_collection() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();
        create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap();

        assert!(create_team_collection(&local_root, &shared, me(), SyncConfig::default()).is_err());
    }

    #[test]
    fn join_copies_books_and_collection_id() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();
        let mine = create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap();

        let freds_parent = dir.path().join("fred");
        let mut spy = ProgressSpy::default();
        let (theirs, has_problems) = join_team_collection(
            &shared.join("My Books - TC"),
            &freds_parent,
            fred(),
            SyncConfig::default(),
            &mut spy,
        )
        .unwrap();

        assert!(!has_problems);
        assert_eq!(theirs.collection_id(), mine.collection_id());
        assert_eq!(theirs.local().root(), freds_parent.join("My Books"));
        assert_eq!(content_of(theirs.local().root(), "Ducks"), "quack");
        assert!(theirs.local().is_team_collection());
        assert_eq!(spy.progress.len(), 1);
    }

    #[test]
    fn join_merges_existing_local_books() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();
        create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap();

        let freds_parent = dir.path().join("fred");
        make_book(&freds_parent.join("My Books"), "Geese", "honk", Some("g1"));
        let (theirs, has_problems) = join_team_collection(
            &shared.join("My Books - TC"),
            &freds_parent,
            fred(),
            SyncConfig::default(),
            &mut NullProgress,
        )
        .unwrap();

        assert!(!has_problems);
        assert_eq!(theirs.repo().book_names().unwrap(), vec!["Ducks", "Geese"]);
    }

    #[test]
    fn open_without_link_is_an_error() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        assert!(open_collection(&local_root, me(), SyncConfig::default()).is_err());
    }

    #[test]
    fn open_with_missing_repo_is_disconnected() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();
        drop(create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap());
        fs::remove_dir_all(&shared).unwrap();

        let (mut tc, has_problems) =
            open_and_sync(&local_root, me(), SyncConfig::default(), &mut NullProgress).unwrap();

        assert!(!has_problems);
        assert!(tc.is_disconnected());
        let errors = tc.log().current_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].l10n_id, "TeamCollection.OperatingDisconnected");
        assert!(tc.checkout("Ducks").is_err());
        assert!(tc.local().has_book("Ducks"));
    }

    #[test]
    fn reopening_disconnected_logs_it_once() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();
        drop(create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap());
        fs::remove_dir_all(&shared).unwrap();

        drop(open_collection(&local_root, me(), SyncConfig::default()).unwrap());
        let tc = open_collection(&local_root, me(), SyncConfig::default()).unwrap();

        let noted = tc
            .log()
            .messages()
            .iter()
            .filter(|m| m.l10n_id == DISCONNECTED_ID)
            .count();
        assert_eq!(noted, 1);
    }

    #[test]
    fn open_and_sync_fetches_teammates_books() {
        let dir = TempDir::new().unwrap();
        let local_root = new_collection(&dir);
        let shared = dir.path().join("Dropbox");
        fs::create_dir_all(&shared).unwrap();
        drop(create_team_collection(&local_root, &shared, me(), SyncConfig::default()).unwrap());

        let freds_parent = dir.path().join("fred");
        let (mut theirs, _) = join_team_collection(
            &shared.join("My Books - TC"),
            &freds_parent,
            fred(),
            SyncConfig::default(),
            &mut NullProgress,
        )
        .unwrap();
        let geese = make_book(theirs.local().root(), "Geese", "honk", Some("g1"));
        theirs.put_book(&geese, true, false).unwrap();

        let (tc, has_problems) =
            open_and_sync(&local_root, me(), SyncConfig::default(), &mut NullProgress).unwrap();

        assert!(!has_problems);
        assert_eq!(content_of(tc.local().root(), "Geese"), "honk");
    }
}
