//! Fixtures shared by the engine tests: one repo, any number of members.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::{ProgressKind, ProgressSink, TeamCollection};
use crate::checksum::book_checksum;
use crate::identity::Identity;
use crate::local::{CollectionSettings, LocalStore, META_FILE_NAME};
use crate::message_log::{LogMessage, MessageKind};
use crate::repo::{FolderRepo, RepoStore};
use crate::status::StatusRecord;
use crate::storage::SyncConfig;

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub repo_root: PathBuf,
    pub tc: TeamCollection,
}

pub(crate) fn me() -> Identity {
    Identity::new("test@somewhere.org", "test-pc").with_names("Test", "User")
}

pub(crate) fn fred() -> Identity {
    Identity::new("fred@somewhere.org", "freds-pc")
}

pub(crate) fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let local_root = dir.path().join("local");
    fs::create_dir_all(&local_root).unwrap();
    let repo_root = dir.path().join("shared");
    let repo = FolderRepo::create(&repo_root).unwrap();
    let tc = TeamCollection::new(
        LocalStore::new(local_root),
        Box::new(repo),
        me(),
        SyncConfig::default(),
    )
    .unwrap();
    Fixture { dir, repo_root, tc }
}

impl Fixture {
    pub fn local_root(&self) -> &Path {
        self.tc.local().root()
    }

    /// A separate handle on the shared folder, as a teammate's machine would have.
    pub fn repo(&self) -> FolderRepo {
        FolderRepo::new(&self.repo_root)
    }

    /// Another member of the same collection with their own local folder.
    pub fn member(&self, folder: &str, identity: Identity) -> TeamCollection {
        let local = LocalStore::new(self.dir.path().join(folder));
        fs::create_dir_all(local.root()).unwrap();
        local
            .write_settings(&CollectionSettings {
                name: "local".into(),
                collection_id: self.tc.collection_id().to_string(),
            })
            .unwrap();
        TeamCollection::new(
            local,
            Box::new(self.repo()),
            identity,
            SyncConfig::default(),
        )
        .unwrap()
    }

    /// Local book checked in to the repo, unlocked.
    pub fn checked_in_book(&mut self, name: &str, content: &str, id: &str) -> PathBuf {
        let folder = make_book(self.local_root(), name, content, Some(id));
        self.tc.put_book(&folder, true, false).unwrap();
        folder
    }

    /// Store a version of `name` straight into the repo under `status`,
    /// without touching any member's local folder. Returns its checksum.
    pub fn put_in_repo(
        &self,
        name: &str,
        content: &str,
        id: Option<&str>,
        status: StatusRecord,
    ) -> String {
        let scratch = self.dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let folder = make_book(&scratch, name, content, id);
        let checksum = book_checksum(&folder).unwrap();
        let status = status
            .with_checksum(checksum.clone())
            .with_collection_id(self.tc.collection_id());
        self.repo().put_book(&folder, &status, false).unwrap();
        fs::remove_dir_all(&folder).unwrap();
        checksum
    }

    pub fn lost_and_found(&self) -> Vec<String> {
        self.repo().lost_and_found_names().unwrap()
    }
}

/// A book folder `<root>/<name>` with its primary file and optional id.
pub(crate) fn make_book(root: &Path, name: &str, content: &str, id: Option<&str>) -> PathBuf {
    let folder = root.join(name);
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join(format!("{name}.htm")), content).unwrap();
    if let Some(id) = id {
        fs::write(
            folder.join(META_FILE_NAME),
            format!(r#"{{"bookInstanceId":"{id}"}}"#),
        )
        .unwrap();
    }
    folder
}

pub(crate) fn content_of(root: &Path, name: &str) -> String {
    fs::read_to_string(root.join(name).join(format!("{name}.htm"))).unwrap()
}

pub(crate) fn edit_book(root: &Path, name: &str, content: &str) {
    fs::write(root.join(name).join(format!("{name}.htm")), content).unwrap();
}

pub(crate) fn messages_of(tc: &TeamCollection, kind: MessageKind) -> Vec<LogMessage> {
    tc.log()
        .messages()
        .iter()
        .filter(|m| m.kind == kind)
        .cloned()
        .collect()
}

pub(crate) fn l10n_ids(tc: &TeamCollection) -> Vec<String> {
    tc.log()
        .messages()
        .iter()
        .map(|m| m.l10n_id.clone())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Records startup progress by kind, with parameters substituted.
#[derive(Debug, Default)]
pub(crate) struct ProgressSpy {
    pub progress: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ProgressSink for ProgressSpy {
    fn message(
        &mut self,
        kind: ProgressKind,
        _l10n_id: &str,
        template: &str,
        param0: Option<&str>,
        param1: Option<&str>,
    ) {
        let text = template
            .replace("{0}", param0.unwrap_or(""))
            .replace("{1}", param1.unwrap_or(""));
        match kind {
            ProgressKind::Progress => self.progress.push(text),
            ProgressKind::Warning => self.warnings.push(text),
            ProgressKind::Error => self.errors.push(text),
        }
    }
}
