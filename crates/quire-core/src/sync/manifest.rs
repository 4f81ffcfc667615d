//! Sync manifest
//!
//! The manifest is the authoritative record of a remote store: the latest
//! committed revision, the store's identity, and for every note the
//! revision that last changed it and whether it has been deleted.
//!
//! ## Format
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <sync revision="2" server-id="…">
//!   <note id="…" rev="1"/>
//!   <note id="…" rev="2" deleted="true"/>
//! </sync>
//! ```
//!
//! A manifest is never edited in place: `Manifest::next_revision` builds the
//! successor, which the server publishes as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{SyncError, SyncResult};

/// Monotonically increasing number of a committed remote state
pub type RevisionId = u64;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

/// Ledger entry for one note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEntry {
    /// Revision in which the note last changed
    pub revision: RevisionId,
    /// Tombstone flag
    pub deleted: bool,
}

/// Authoritative remote state at `latest_revision`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub store_id: Uuid,
    pub latest_revision: RevisionId,
    pub entries: BTreeMap<Uuid, NoteEntry>,
}

impl Manifest {
    /// Manifest of a fresh remote location
    pub fn empty(store_id: Uuid) -> Self {
        Self {
            store_id,
            latest_revision: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Look up a note's entry
    pub fn entry(&self, id: &Uuid) -> Option<&NoteEntry> {
        self.entries.get(id)
    }

    /// Notes that are present (not tombstoned)
    pub fn live_notes(&self) -> impl Iterator<Item = (&Uuid, &NoteEntry)> {
        self.entries.iter().filter(|(_, e)| !e.deleted)
    }

    /// Whether the note changed after the given revision
    pub fn changed_since(&self, id: &Uuid, revision: RevisionId) -> bool {
        self.entries
            .get(id)
            .map(|e| e.revision > revision)
            .unwrap_or(false)
    }

    /// Build the manifest of the next revision
    ///
    /// Every uploaded note gets a live entry at the new revision, every
    /// deleted note a tombstone at the new revision.
    pub fn next_revision(&self, uploaded: &BTreeSet<Uuid>, deleted: &BTreeSet<Uuid>) -> Manifest {
        let revision = self.latest_revision + 1;
        let mut entries = self.entries.clone();
        for id in uploaded {
            entries.insert(
                *id,
                NoteEntry {
                    revision,
                    deleted: false,
                },
            );
        }
        for id in deleted {
            entries.insert(
                *id,
                NoteEntry {
                    revision,
                    deleted: true,
                },
            );
        }
        Manifest {
            store_id: self.store_id,
            latest_revision: revision,
            entries,
        }
    }

    /// Check the ledger invariants
    pub fn validate(&self) -> Result<(), String> {
        for (id, entry) in &self.entries {
            if entry.revision > self.latest_revision {
                return Err(format!(
                    "note {} has revision {} beyond manifest revision {}",
                    id, entry.revision, self.latest_revision
                ));
            }
            if entry.revision == 0 {
                return Err(format!("note {} has revision 0", id));
            }
        }
        Ok(())
    }

    /// Parse and validate a manifest read from `path`
    pub fn from_xml(bytes: &[u8], path: &Path) -> SyncResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| SyncError::corrupt(path, format!("not UTF-8: {}", e)))?;
        let doc: ManifestDoc =
            quick_xml::de::from_str(text).map_err(|e| SyncError::corrupt(path, e.to_string()))?;

        let mut entries = BTreeMap::new();
        for note in doc.notes {
            let entry = NoteEntry {
                revision: note.revision,
                deleted: note.deleted,
            };
            if entries.insert(note.id, entry).is_some() {
                return Err(SyncError::corrupt(
                    path,
                    format!("duplicate entry for note {}", note.id),
                ));
            }
        }

        let manifest = Manifest {
            store_id: doc.server_id,
            latest_revision: doc.revision,
            entries,
        };
        manifest
            .validate()
            .map_err(|details| SyncError::corrupt(path, details))?;
        Ok(manifest)
    }

    /// Serialize to XML
    pub fn to_xml(&self) -> SyncResult<String> {
        let doc = ManifestDoc {
            revision: self.latest_revision,
            server_id: self.store_id,
            notes: self
                .entries
                .iter()
                .map(|(id, e)| NoteElement {
                    id: *id,
                    revision: e.revision,
                    deleted: e.deleted,
                })
                .collect(),
        };
        let body = quick_xml::se::to_string(&doc)
            .map_err(|e| SyncError::corrupt("manifest.xml", e.to_string()))?;
        Ok(format!("{}{}\n", XML_DECLARATION, body))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "sync")]
struct ManifestDoc {
    #[serde(rename = "@revision")]
    revision: RevisionId,
    #[serde(rename = "@server-id")]
    server_id: Uuid,
    #[serde(rename = "note", default)]
    notes: Vec<NoteElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteElement {
    #[serde(rename = "@id")]
    id: Uuid,
    #[serde(rename = "@rev")]
    revision: RevisionId,
    #[serde(rename = "@deleted", default, skip_serializing_if = "is_false")]
    deleted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
