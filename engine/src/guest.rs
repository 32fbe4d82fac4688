//! Guest identity store.
//!
//! A guest is identified only by a self-chosen display name. The name and a
//! journal of the guest's own claims and contributions live in client-local
//! storage. The journal is never authoritative: it only tells the reconciler
//! which removed items deserve a notice.

use crate::types::{GuestActionRecord, GuestName, ListId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Client-local key/value storage for guest identity
///
/// Storage failures are never surfaced: losing the journal only costs a
/// notice, so backends log and carry on.
pub trait GuestIdentityStore: Send + Sync {
    /// The remembered display name
    fn guest_name(&self) -> Option<GuestName>;

    /// Remember a display name
    fn set_guest_name(&self, name: &GuestName);

    /// Append a record (duplicates of the same list/item/kind are merged)
    fn log_action(&self, record: GuestActionRecord);

    /// Records for one list
    fn list_actions(&self, list_id: ListId) -> Vec<GuestActionRecord>;

    /// Forget every record equal to `record`
    fn remove_action(&self, record: &GuestActionRecord);
}

/// Everything a guest store keeps
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestJournal {
    /// Display name
    #[serde(rename = "wishlist_guest_name", default)]
    pub guest_name: Option<GuestName>,
    /// Claims and contributions made from this client
    #[serde(rename = "wishlist_guest_actions", default)]
    pub actions: Vec<GuestActionRecord>,
}

impl GuestJournal {
    fn log(&mut self, record: GuestActionRecord) {
        if !self.actions.contains(&record) {
            self.actions.push(record);
        }
    }

    fn remove(&mut self, record: &GuestActionRecord) {
        self.actions.retain(|r| r != record);
    }

    fn for_list(&self, list_id: ListId) -> Vec<GuestActionRecord> {
        self.actions
            .iter()
            .filter(|r| r.list_id == list_id)
            .cloned()
            .collect()
    }
}

fn lock(journal: &Mutex<GuestJournal>) -> MutexGuard<'_, GuestJournal> {
    match journal.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Guest journal lock poisoned, continuing with last state");
            poisoned.into_inner()
        },
    }
}

/// In-memory guest store for tests and non-interactive contexts
#[derive(Debug, Default)]
pub struct MemoryGuestStore {
    journal: Mutex<GuestJournal>,
}

impl MemoryGuestStore {
    /// Store pre-filled with a name
    #[must_use]
    pub fn with_name(name: GuestName) -> Self {
        Self {
            journal: Mutex::new(GuestJournal {
                guest_name: Some(name),
                actions: Vec::new(),
            }),
        }
    }

    /// Copy of the whole journal
    #[must_use]
    pub fn snapshot(&self) -> GuestJournal {
        lock(&self.journal).clone()
    }
}

impl GuestIdentityStore for MemoryGuestStore {
    fn guest_name(&self) -> Option<GuestName> {
        lock(&self.journal).guest_name.clone()
    }

    fn set_guest_name(&self, name: &GuestName) {
        lock(&self.journal).guest_name = Some(name.clone());
    }

    fn log_action(&self, record: GuestActionRecord) {
        lock(&self.journal).log(record);
    }

    fn list_actions(&self, list_id: ListId) -> Vec<GuestActionRecord> {
        lock(&self.journal).for_list(list_id)
    }

    fn remove_action(&self, record: &GuestActionRecord) {
        lock(&self.journal).remove(record);
    }
}

/// Guest store persisted as one JSON document on disk
///
/// Every call re-reads the file, so two processes sharing it see each
/// other's writes. Unreadable or corrupt content is treated as an empty
/// journal.
#[derive(Debug)]
pub struct FileGuestStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileGuestStore {
    /// Store backed by `path` (created on first write)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> GuestJournal {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return GuestJournal::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read guest journal");
                return GuestJournal::default();
            },
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Corrupt guest journal, starting empty");
            GuestJournal::default()
        })
    }

    fn write(&self, journal: &GuestJournal) {
        let result = serde_json::to_string_pretty(journal)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(&self.path, json));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write guest journal");
        }
    }

    fn modify(&self, change: impl FnOnce(&mut GuestJournal)) {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut journal = self.read();
        change(&mut journal);
        self.write(&journal);
    }
}

impl GuestIdentityStore for FileGuestStore {
    fn guest_name(&self) -> Option<GuestName> {
        self.read().guest_name
    }

    fn set_guest_name(&self, name: &GuestName) {
        self.modify(|journal| journal.guest_name = Some(name.clone()));
    }

    fn log_action(&self, record: GuestActionRecord) {
        self.modify(|journal| journal.log(record));
    }

    fn list_actions(&self, list_id: ListId) -> Vec<GuestActionRecord> {
        self.read().for_list(list_id)
    }

    fn remove_action(&self, record: &GuestActionRecord) {
        self.modify(|journal| journal.remove(record));
    }
}
