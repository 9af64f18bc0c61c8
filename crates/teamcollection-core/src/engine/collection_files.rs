//! Keeping collection-level files (settings, styles, word lists) in step.
//!
//! The repo copy wins at startup. While running, local edits are pushed
//! unless the repo changed since the last sync, in which case the local
//! edits will be replaced on the next reload and the user is warned once.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::TeamCollection;
use crate::error::Result;
use crate::local::SyncRecord;
use crate::message_log::MessageKind;

const CUSTOM_STYLES_FILE: &str = "customCollectionStyles.css";

impl TeamCollection {
    /// Bring the local and repo collection files into sync.
    pub fn sync_local_and_repo_collection_files(&mut self, at_startup: bool) -> Result<()> {
        let repo_modified = self.repo.last_collection_files_change();
        let saved_sync = self.recorded_sync_time();

        if at_startup {
            if let Some(repo_modified) = repo_modified {
                let styles_modified = self.local.file_modified(CUSTOM_STYLES_FILE);
                if styles_modified.is_some_and(|t| t > saved_sync) && saved_sync >= repo_modified {
                    info!("keeping collection styles edited while the collection was closed");
                    return self.copy_collection_files_to_repo();
                }
                return self.copy_collection_files_from_repo();
            }
        }

        if !self.local_collection_files_updated()? {
            return Ok(());
        }
        if repo_modified.is_some_and(|t| t > saved_sync) {
            if !self.have_shown_remote_settings_warning {
                self.have_shown_remote_settings_warning = true;
                warn!("collection files changed both locally and remotely");
                self.log.write_message(
                    MessageKind::Error,
                    "TeamCollection.SettingsChangeLost",
                    "Collection settings have been changed remotely. Your recent collection \
                     settings changes will be lost the next time the collection is reloaded.",
                    None,
                    None,
                );
            }
            return Ok(());
        }
        self.copy_collection_files_to_repo()
    }

    /// Whether local collection files differ from what was last synced.
    ///
    /// A newer timestamp with an unchanged digest just refreshes the sync
    /// time, so the next check is cheap.
    pub fn local_collection_files_updated(&self) -> Result<bool> {
        let saved = self.local.read_sync_record();
        let saved_time = saved.as_ref().map_or(DateTime::<Utc>::MIN_UTC, |r| r.time);
        let local_modified = self.local.collection_files_update_time()?;
        if local_modified.map_or(true, |t| t <= saved_time) {
            return Ok(false);
        }
        let digest = self.local.collection_files_digest()?;
        let really_updated = saved.as_ref().map_or(true, |r| r.digest != digest);
        if !really_updated {
            let repo_modified = self.repo.last_collection_files_change();
            if repo_modified.map_or(true, |t| saved_time >= t) {
                self.local.write_sync_record(&SyncRecord {
                    time: Utc::now(),
                    digest,
                })?;
            }
        }
        Ok(really_updated)
    }

    /// True if the repo's collection files changed after our last sync.
    pub fn repo_collection_files_changed(&self) -> bool {
        let saved_sync = self.recorded_sync_time();
        self.repo
            .last_collection_files_change()
            .is_some_and(|t| t > saved_sync)
    }

    pub(crate) fn copy_collection_files_to_repo(&self) -> Result<()> {
        let files = self.local.collection_files()?;
        self.repo.put_collection_files(&files)?;
        self.record_collection_files_sync()?;
        debug!(count = files.len(), "pushed collection files");
        Ok(())
    }

    pub(crate) fn copy_collection_files_from_repo(&self) -> Result<()> {
        self.repo.fetch_collection_files(self.local.root())?;
        self.record_collection_files_sync()?;
        debug!("fetched collection files");
        Ok(())
    }

    pub(crate) fn record_collection_files_sync(&self) -> Result<()> {
        let record = SyncRecord {
            time: Utc::now(),
            digest: self.local.collection_files_digest()?,
        };
        self.local.write_sync_record(&record)
    }

    fn recorded_sync_time(&self) -> DateTime<Utc> {
        self.local
            .read_sync_record()
            .map_or(DateTime::<Utc>::MIN_UTC, |record| record.time)
    }
}
