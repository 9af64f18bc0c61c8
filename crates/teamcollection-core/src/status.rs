//! Per-book sync state.
//!
//! One [`StatusRecord`] lives next to each local book folder, and another is
//! carried in the comment of the book's package in the shared repo. The two
//! are compared by the reconciliation engine; neither is authoritative alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// `locked_by` value for a book that exists only in this local collection.
pub const NEW_BOOK_MARKER: &str = "this user";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Digest of the book content; `None` until computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by_first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by_surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_where: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_when: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Pending local rename source. Only ever set on the local copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
    /// The repo package exists but its status could not be read.
    #[serde(skip)]
    pub has_invalid_repo_data: bool,
}

impl StatusRecord {
    /// Status reported for a book that has never been checked in.
    pub fn new_local_book(identity: &Identity) -> Self {
        Self {
            locked_by: Some(NEW_BOOK_MARKER.to_string()),
            locked_where: Some(identity.machine.clone()),
            ..Self::default()
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_collection_id(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    pub fn with_old_name(mut self, old_name: impl Into<String>) -> Self {
        self.old_name = Some(old_name.into());
        self
    }

    /// Record a checkout by `identity`, stamped now.
    pub fn with_lock(mut self, identity: &Identity) -> Self {
        self.locked_by = Some(identity.user.clone());
        self.locked_by_first_name = Some(identity.first_name.clone()).filter(|s| !s.is_empty());
        self.locked_by_surname = Some(identity.surname.clone()).filter(|s| !s.is_empty());
        self.locked_where = Some(identity.machine.clone());
        self.locked_when = Some(Utc::now());
        self
    }

    pub fn without_lock(mut self) -> Self {
        self.locked_by = None;
        self.locked_by_first_name = None;
        self.locked_by_surname = None;
        self.locked_where = None;
        self.locked_when = None;
        self
    }

    /// Copy suitable for the repo: never carries a pending rename.
    pub fn for_repo(&self) -> Self {
        Self {
            old_name: None,
            has_invalid_repo_data: false,
            ..self.clone()
        }
    }

    pub fn is_checked_out(&self) -> bool {
        self.locked_by.as_deref().is_some_and(|who| !who.is_empty())
    }

    /// True only when both the user and the machine match.
    pub fn is_checked_out_here_by(&self, identity: &Identity) -> bool {
        identity.is_registered()
            && self.locked_by.as_deref() == Some(identity.user.as_str())
            && self.locked_where.as_deref() == Some(identity.machine.as_str())
    }

    pub fn is_new_local_book(&self) -> bool {
        self.locked_by.as_deref() == Some(NEW_BOOK_MARKER)
    }

    /// Checksum and lock fields agree. Collection id and rename marker are ignored.
    pub fn same_sync_state(&self, other: &StatusRecord) -> bool {
        self.checksum == other.checksum
            && self.locked_by == other.locked_by
            && self.locked_where == other.locked_where
            && self.locked_when == other.locked_when
    }

    /// "First Surname" of the holder, falling back to the email.
    pub fn holder_display_name(&self) -> Option<String> {
        let who = self.locked_by.as_ref()?;
        let name = format!(
            "{} {}",
            self.locked_by_first_name.as_deref().unwrap_or(""),
            self.locked_by_surname.as_deref().unwrap_or("")
        );
        let name = name.trim();
        Some(if name.is_empty() {
            who.clone()
        } else {
            name.to_string()
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
