//! Two members sharing one Team Collection through a temp "Dropbox" folder.
//!
//! Remote changes are fed to the idle handler through the pending queue,
//! the same way the file watchers deliver them.

use chrono::Duration;
use std::fs;
use std::path::{Path, PathBuf};
use teamcollection_core::local::META_FILE_NAME;
use teamcollection_core::{
    create_team_collection, join_team_collection, open_and_sync, ChangeKind, CollectionStatus,
    Identity, NullProgress, SyncConfig, TeamCollection,
};
use tempfile::TempDir;

fn me() -> Identity {
    Identity::new("me@somewhere.org", "my-pc").with_names("Mary", "Me")
}

fn fred() -> Identity {
    Identity::new("fred@somewhere.org", "freds-pc")
}

fn write_book(root: &Path, name: &str, content: &str, id: &str) {
    let folder = root.join(name);
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join(format!("{name}.htm")), content).unwrap();
    fs::write(
        folder.join(META_FILE_NAME),
        format!(r#"{{"bookInstanceId":"{id}"}}"#),
    )
    .unwrap();
}

fn read_book(root: &Path, name: &str) -> String {
    fs::read_to_string(root.join(name).join(format!("{name}.htm"))).unwrap()
}

/// Returns (my engine, fred's engine, my local root).
fn shared_collection(dir: &TempDir) -> (TeamCollection, TeamCollection, PathBuf) {
    let mine = dir.path().join("me").join("Birds");
    write_book(&mine, "Ducks", "quack", "duck-id");
    let shared = dir.path().join("Dropbox");
    fs::create_dir_all(&shared).unwrap();
    let tc = create_team_collection(&mine, &shared, me(), SyncConfig::default()).unwrap();
    let (freds, _) = join_team_collection(
        &shared.join("Birds - TC"),
        &dir.path().join("fred"),
        fred(),
        SyncConfig::default(),
        &mut NullProgress,
    )
    .unwrap();
    (tc, freds, mine)
}

fn deliver(tc: &mut TeamCollection, kind: ChangeKind, book: &str) {
    tc.queue().enqueue(kind, book, Duration::zero());
    assert!(tc.handle_remote_book_changes_on_idle().unwrap());
}

#[test]
fn teammate_checkin_is_announced_then_fetched_on_reload() {
    let dir = TempDir::new().unwrap();
    let (mut tc, mut freds, mine) = shared_collection(&dir);

    freds.checkout("Ducks").unwrap();
    write_book(freds.local().root(), "Ducks", "quack quack", "duck-id");
    freds.checkin("Ducks").unwrap();

    deliver(&mut tc, ChangeKind::BookChanged, "Ducks");
    assert_eq!(tc.log().team_collection_status(), CollectionStatus::NewStuff);
    assert_eq!(read_book(&mine, "Ducks"), "quack");

    drop(tc);
    let (tc, has_problems) =
        open_and_sync(&mine, me(), SyncConfig::default(), &mut NullProgress).unwrap();
    assert!(!has_problems);
    assert_eq!(read_book(&mine, "Ducks"), "quack quack");
    assert!(!tc.get_status("Ducks").unwrap().is_checked_out());
}

#[test]
fn teammate_checkout_blocks_mine() {
    let dir = TempDir::new().unwrap();
    let (mut tc, mut freds, _) = shared_collection(&dir);

    freds.checkout("Ducks").unwrap();

    let err = tc.checkout("Ducks").unwrap_err();
    assert!(err.to_string().contains("fred@somewhere.org"));
    assert_eq!(
        tc.who_has_book_locked("Ducks").unwrap().as_deref(),
        Some("fred@somewhere.org")
    );
    assert_eq!(
        tc.what_computer_has_book_locked("Ducks").unwrap().as_deref(),
        Some("freds-pc")
    );
}

#[test]
fn teammate_delete_removes_local_copy() {
    let dir = TempDir::new().unwrap();
    let (mut tc, mut freds, mine) = shared_collection(&dir);

    freds.checkout("Ducks").unwrap();
    freds.delete_book("Ducks").unwrap();
    assert!(tc.known_to_have_been_deleted("Ducks"));

    deliver(&mut tc, ChangeKind::BookDeleted, "Ducks");
    assert!(!mine.join("Ducks").exists());
}

#[test]
fn teammate_new_book_arrives_on_reload() {
    let dir = TempDir::new().unwrap();
    let (mut tc, mut freds, mine) = shared_collection(&dir);

    write_book(freds.local().root(), "Geese", "honk", "goose-id");
    let folder = freds.local().book_folder("Geese");
    freds.put_book(&folder, true, false).unwrap();

    deliver(&mut tc, ChangeKind::NewBook, "Geese");
    let news = tc.log().current_new_stuff();
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].l10n_id, "TeamCollection.NewBookArrived");

    drop(tc);
    open_and_sync(&mine, me(), SyncConfig::default(), &mut NullProgress).unwrap();
    assert_eq!(read_book(&mine, "Geese"), "honk");
}
