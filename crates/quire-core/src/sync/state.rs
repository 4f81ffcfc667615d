//! Sync state persistence
//!
//! Records, per local store, which remote it is paired with, the last
//! revision successfully synchronized, and for each note the revision and
//! content hash it had at that point. The hash is what lets the engine tell
//! a local edit from an untouched note.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use super::manifest::RevisionId;
use crate::models::ContentHash;
use crate::storage::atomic_write;

/// Persistent sync state
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Identity of the remote store this state belongs to
    #[serde(default)]
    pub store_id: Option<Uuid>,
    /// Last revision a session completed against
    #[serde(default)]
    pub last_synced_revision: RevisionId,
    /// Remote revision of each note as of the last session
    #[serde(default)]
    pub local_revisions: BTreeMap<Uuid, RevisionId>,
    /// Content hash of each note as of the last session
    #[serde(default)]
    pub synced_hashes: BTreeMap<Uuid, ContentHash>,
    /// Path to persist state
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl SyncState {
    /// Create a new sync state (in-memory only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sync state that persists to disk
    ///
    /// A missing file yields an unpaired state. A file that exists but
    /// cannot be parsed is an error: silently starting over would turn
    /// every note into a conflict.
    pub fn with_path(path: PathBuf) -> SyncResult<Self> {
        let mut state = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| SyncError::from_io(e, &path))?;
            serde_json::from_str::<SyncState>(&json).map_err(|e| SyncError::InvalidState {
                path: path.clone(),
                details: e.to_string(),
            })?
        } else {
            Self::default()
        };
        state.path = Some(path);
        Ok(state)
    }

    /// Where this state is persisted, if anywhere
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this store has completed a session with a remote
    pub fn is_paired(&self) -> bool {
        self.store_id.is_some()
    }

    /// Whether the note took part in a previous session
    pub fn was_synced(&self, id: &Uuid) -> bool {
        self.synced_hashes.contains_key(id)
    }

    /// Hash of the note as of the last session
    pub fn synced_hash(&self, id: &Uuid) -> Option<&ContentHash> {
        self.synced_hashes.get(id)
    }

    /// Ensure the state belongs to the given remote store
    ///
    /// Returns `true` if the state was reset because it was paired with a
    /// different store (for example, the remote directory was recreated).
    pub fn pair_with(&mut self, store_id: Uuid) -> bool {
        match self.store_id {
            Some(current) if current == store_id => false,
            // Nothing synced yet, so nothing to throw away
            Some(_) if self.last_synced_revision == 0 && self.synced_hashes.is_empty() => {
                self.store_id = Some(store_id);
                false
            }
            Some(current) => {
                warn!(
                    "Remote store changed from {} to {}; treating all notes as unsynchronized",
                    current, store_id
                );
                self.reset();
                self.store_id = Some(store_id);
                true
            }
            None => {
                self.store_id = Some(store_id);
                false
            }
        }
    }

    /// Record a note as synchronized at `revision` with `hash`
    pub fn record(&mut self, id: Uuid, revision: RevisionId, hash: ContentHash) {
        self.local_revisions.insert(id, revision);
        self.synced_hashes.insert(id, hash);
    }

    /// Forget a note (deleted on both sides)
    pub fn forget(&mut self, id: &Uuid) {
        self.local_revisions.remove(id);
        self.synced_hashes.remove(id);
    }

    /// Move `last_synced_revision` forward
    ///
    /// Never moves backwards.
    pub fn advance(&mut self, revision: RevisionId) {
        if revision < self.last_synced_revision {
            debug!(
                "Ignoring attempt to move last synced revision back from {} to {}",
                self.last_synced_revision, revision
            );
            return;
        }
        self.last_synced_revision = revision;
    }

    /// Clear all sync state, keeping the persistence path
    pub fn reset(&mut self) {
        self.store_id = None;
        self.last_synced_revision = 0;
        self.local_revisions.clear();
        self.synced_hashes.clear();
    }

    /// Save state to disk
    pub fn save(&self) -> SyncResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(self).map_err(|e| SyncError::InvalidState {
            path: path.clone(),
            details: e.to_string(),
        })?;
        atomic_write(path, json.as_bytes())
    }

    /// Remove the persisted state (unpairing this store from its remote)
    pub fn unlink(&mut self) -> SyncResult<()> {
        self.reset();
        let Some(ref path) = self.path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::from_io(e, path)),
        }
    }

    /// Get number of notes tracked
    pub fn note_count(&self) -> usize {
        self.synced_hashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sync_state_new() {
        let state = SyncState::new();
        assert!(!state.is_paired());
        assert_eq!(state.last_synced_revision, 0);
        assert_eq!(state.note_count(), 0);
    }

    #[test]
    fn test_sync_state_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync_state.json");
        let store_id = Uuid::new_v4();
        let note = Uuid::new_v4();

        {
            let mut state = SyncState::with_path(path.clone()).unwrap();
            state.pair_with(store_id);
            state.record(note, 3, ContentHash::of(b"x"));
            state.advance(3);
            state.save().unwrap();
        }

        {
            let state = SyncState::with_path(path).unwrap();
            assert_eq!(state.store_id, Some(store_id));
            assert_eq!(state.last_synced_revision, 3);
            assert_eq!(state.local_revisions.get(&note), Some(&3));
            assert_eq!(state.synced_hash(&note), Some(&ContentHash::of(b"x")));
        }
    }

    #[test]
    fn test_unparsable_state_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync_state.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(SyncState::with_path(path).is_err());
    }

    #[test]
    fn test_advance_never_decreases() {
        let mut state = SyncState::new();
        state.advance(5);
        state.advance(2);
        assert_eq!(state.last_synced_revision, 5);
    }

    #[test]
    fn test_pair_with_different_store_resets() {
        let mut state = SyncState::new();
        let first = Uuid::new_v4();
        assert!(!state.pair_with(first));
        state.record(Uuid::new_v4(), 1, ContentHash::of(b"a"));
        state.advance(1);

        assert!(!state.pair_with(first));
        assert_eq!(state.note_count(), 1);

        assert!(state.pair_with(Uuid::new_v4()));
        assert_eq!(state.note_count(), 0);
        assert_eq!(state.last_synced_revision, 0);
    }

    #[test]
    fn test_forget_and_unlink() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sync_state.json");
        let mut state = SyncState::with_path(path.clone()).unwrap();

        let id = Uuid::new_v4();
        state.record(id, 1, ContentHash::of(b"a"));
        state.forget(&id);
        assert!(!state.was_synced(&id));

        state.save().unwrap();
        assert!(path.exists());
        state.unlink().unwrap();
        assert!(!path.exists());
    }
}
