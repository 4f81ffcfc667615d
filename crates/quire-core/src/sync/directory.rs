//! Directory-backed sync server
//!
//! Works against any directory: a local folder, a USB stick, or a network
//! share mounted by someone else.
//!
//! ## Layout
//!
//! ```text
//! <root>/manifest.xml            latest published manifest
//! <root>/<rev>/manifest.xml      manifest as of revision <rev>
//! <root>/<rev>/<id>.note         notes uploaded in revision <rev>
//! <root>/.staging-<uuid>/        uncommitted transaction (never referenced)
//! ```
//!
//! ## Commit protocol
//!
//! The staging directory is filled with the uploaded notes and the new
//! manifest, then renamed to `<root>/<base + 1>`. That rename is the commit
//! point and doubles as the compare-and-swap: it fails if another client
//! already published that revision. Only afterwards is `<root>/manifest.xml`
//! replaced. A crash between the two steps is repaired by the next reader,
//! which rolls forward through any `<rev + 1>/manifest.xml` it finds.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use super::manifest::{Manifest, RevisionId};
use super::server::{SyncServer, Transaction};
use crate::storage::{atomic_write, read_optional, remove_dir_if_exists, write_synced};
use crate::store::NOTE_EXTENSION;

/// Name of the manifest file, at the root and in every revision directory
pub const MANIFEST_FILE: &str = "manifest.xml";

const STAGING_PREFIX: &str = ".staging-";
const PROBE_LINE: &str = "Testing write capabilities.";

/// Sync server storing revisions in a directory tree
#[derive(Debug, Clone)]
pub struct DirectorySyncServer {
    root: PathBuf,
}

impl DirectorySyncServer {
    /// Create a server rooted at `root`
    ///
    /// The directory must exist by the time a transaction begins.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the published manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Directory holding notes uploaded in `revision`
    pub fn revision_dir(&self, revision: RevisionId) -> PathBuf {
        revision_dir(&self.root, revision)
    }

    /// Read the latest published manifest, rolling forward and repairing
    /// the root manifest if a commit was interrupted
    pub fn read_manifest(&self) -> SyncResult<Manifest> {
        let (manifest, rolled_forward) = read_published(&self.root)?;
        if rolled_forward {
            warn!(
                "Root manifest in {:?} was behind revision {}; repairing",
                self.root, manifest.latest_revision
            );
            if let Err(e) = atomic_write(&self.manifest_path(), manifest.to_xml()?.as_bytes()) {
                warn!("Failed to repair root manifest: {}", e);
            }
        }
        Ok(manifest)
    }

    /// Check that `path` can be written to
    ///
    /// Creates the directory if needed, then writes, reads back and removes
    /// a uniquely named test file.
    pub fn probe_writable(path: &Path) -> SyncResult<()> {
        fs::create_dir_all(path).map_err(|e| SyncError::from_io(e, path))?;

        let mut test_path = path.join("test");
        let mut count = 0;
        while test_path.exists() {
            count += 1;
            test_path = path.join(format!("test{}", count));
        }

        write_synced(&test_path, PROBE_LINE.as_bytes())?;
        let read_back = fs::read_to_string(&test_path).map_err(|e| SyncError::from_io(e, &test_path));
        let removed = fs::remove_file(&test_path).map_err(|e| SyncError::from_io(e, &test_path));

        if read_back? != PROBE_LINE {
            return Err(SyncError::MountFailure {
                target: path.display().to_string(),
                details: "test file content did not match what was written".to_string(),
            });
        }
        removed
    }
}

impl SyncServer for DirectorySyncServer {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn begin_transaction(&self) -> SyncResult<Box<dyn Transaction>> {
        if !self.root.is_dir() {
            return Err(SyncError::MountFailure {
                target: self.location(),
                details: "sync directory does not exist or is not a directory".to_string(),
            });
        }

        let base = self.read_manifest()?;
        debug!(
            "Began transaction on {:?} at revision {}",
            self.root, base.latest_revision
        );

        Ok(Box::new(DirectoryTransaction {
            root: self.root.clone(),
            base,
            staging: None,
            uploads: BTreeSet::new(),
            deletes: BTreeSet::new(),
            committed: None,
        }))
    }
}

/// Transaction against a `DirectorySyncServer`
#[derive(Debug)]
pub struct DirectoryTransaction {
    root: PathBuf,
    base: Manifest,
    staging: Option<PathBuf>,
    uploads: BTreeSet<Uuid>,
    deletes: BTreeSet<Uuid>,
    committed: Option<RevisionId>,
}

impl DirectoryTransaction {
    fn ensure_staging(&mut self) -> SyncResult<PathBuf> {
        if let Some(ref dir) = self.staging {
            return Ok(dir.clone());
        }
        let dir = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4().simple()));
        fs::create_dir(&dir).map_err(|e| SyncError::from_io(e, &dir))?;
        self.staging = Some(dir.clone());
        Ok(dir)
    }

    fn ensure_open(&self) -> SyncResult<()> {
        match self.committed {
            Some(revision) => Err(SyncError::ManifestConflict {
                expected: self.base.latest_revision,
                found: revision,
            }),
            None => Ok(()),
        }
    }
}

impl Transaction for DirectoryTransaction {
    fn current_manifest(&self) -> &Manifest {
        &self.base
    }

    fn stage_upload(&mut self, id: Uuid, content: &[u8]) -> SyncResult<()> {
        self.ensure_open()?;
        let dir = self.ensure_staging()?;
        write_synced(&note_file(&dir, id), content)?;
        self.deletes.remove(&id);
        self.uploads.insert(id);
        Ok(())
    }

    fn stage_download(&mut self, id: Uuid) -> SyncResult<Vec<u8>> {
        let entry = match self.base.entry(&id) {
            Some(entry) if !entry.deleted => *entry,
            _ => return Err(SyncError::NoteNotFound { id }),
        };
        let path = note_file(&revision_dir(&self.root, entry.revision), id);
        fs::read(&path).map_err(|e| SyncError::from_io(e, &path))
    }

    fn stage_delete(&mut self, id: Uuid) -> SyncResult<()> {
        self.ensure_open()?;
        if self.uploads.remove(&id) {
            if let Some(ref dir) = self.staging {
                let path = note_file(dir, id);
                fs::remove_file(&path).map_err(|e| SyncError::from_io(e, &path))?;
            }
        }
        self.deletes.insert(id);
        Ok(())
    }

    fn staged_count(&self) -> usize {
        self.uploads.len() + self.deletes.len()
    }

    fn commit(&mut self) -> SyncResult<RevisionId> {
        if let Some(revision) = self.committed {
            return Ok(revision);
        }
        let expected = self.base.latest_revision;

        if self.staged_count() == 0 {
            self.committed = Some(expected);
            return Ok(expected);
        }

        // Cheap early check; the rename below is the authoritative one
        let (current, _) = read_published(&self.root)?;
        let same_store = expected == 0 || current.store_id == self.base.store_id;
        if current.latest_revision != expected || !same_store {
            return Err(SyncError::ManifestConflict {
                expected,
                found: current.latest_revision,
            });
        }

        let next = self.base.next_revision(&self.uploads, &self.deletes);
        let staging = self.ensure_staging()?;
        write_synced(&staging.join(MANIFEST_FILE), next.to_xml()?.as_bytes())?;

        let target = revision_dir(&self.root, next.latest_revision);
        if let Err(e) = fs::rename(&staging, &target) {
            if target.exists() {
                return Err(SyncError::ManifestConflict {
                    expected,
                    found: next.latest_revision,
                });
            }
            return Err(SyncError::from_io(e, &target));
        }
        self.staging = None;
        self.committed = Some(next.latest_revision);

        // Published; the root manifest is a fast path that readers can repair
        let root_manifest = self.root.join(MANIFEST_FILE);
        if let Err(e) = atomic_write(&root_manifest, next.to_xml()?.as_bytes()) {
            warn!(
                "Revision {} published but root manifest not updated: {}",
                next.latest_revision, e
            );
        }

        info!(
            "Committed revision {} to {:?} ({} uploads, {} deletes)",
            next.latest_revision,
            self.root,
            self.uploads.len(),
            self.deletes.len()
        );
        Ok(next.latest_revision)
    }

    fn cancel(&mut self) -> SyncResult<()> {
        self.uploads.clear();
        self.deletes.clear();
        if let Some(dir) = self.staging.take() {
            debug!("Discarding staging directory {:?}", dir);
            remove_dir_if_exists(&dir)?;
        }
        Ok(())
    }
}

impl Drop for DirectoryTransaction {
    fn drop(&mut self) {
        if let Some(dir) = self.staging.take() {
            let _ = remove_dir_if_exists(&dir);
        }
    }
}

fn revision_dir(root: &Path, revision: RevisionId) -> PathBuf {
    root.join(revision.to_string())
}

fn note_file(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{}.{}", id, NOTE_EXTENSION))
}

/// Read the root manifest and roll forward through published revisions
///
/// Returns the manifest and whether any roll-forward happened.
fn read_published(root: &Path) -> SyncResult<(Manifest, bool)> {
    let root_path = root.join(MANIFEST_FILE);
    let mut manifest = match read_optional(&root_path)? {
        Some(bytes) => Manifest::from_xml(&bytes, &root_path)?,
        None => Manifest::empty(Uuid::new_v4()),
    };

    let mut rolled_forward = false;
    loop {
        let next_path = revision_dir(root, manifest.latest_revision + 1).join(MANIFEST_FILE);
        let Some(bytes) = read_optional(&next_path)? else {
            break;
        };
        let next = Manifest::from_xml(&bytes, &next_path)?;
        if next.latest_revision != manifest.latest_revision + 1 {
            return Err(SyncError::corrupt(
                &next_path,
                format!(
                    "revision directory {} holds manifest for revision {}",
                    manifest.latest_revision + 1,
                    next.latest_revision
                ),
            ));
        }
        if manifest.latest_revision > 0 && next.store_id != manifest.store_id {
            return Err(SyncError::corrupt(&next_path, "server id changed between revisions"));
        }
        manifest = next;
        rolled_forward = true;
    }

    Ok((manifest, rolled_forward))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn server(temp_dir: &TempDir) -> DirectorySyncServer {
        DirectorySyncServer::new(temp_dir.path())
    }

    fn staging_dirs(root: &Path) -> usize {
        fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .count()
    }

    #[test]
    fn test_fresh_location_has_empty_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let tx = server(&temp_dir).begin_transaction().unwrap();

        assert_eq!(tx.current_manifest().latest_revision, 0);
        assert!(tx.current_manifest().entries.is_empty());
    }

    #[test]
    fn test_missing_root_is_mount_failure() {
        let temp_dir = TempDir::new().unwrap();
        let server = DirectorySyncServer::new(temp_dir.path().join("not-mounted"));

        let err = server.begin_transaction().err().unwrap();
        assert!(matches!(err, SyncError::MountFailure { .. }));
    }

    #[test]
    fn test_commit_publishes_revision() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);
        let id = Uuid::new_v4();

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_upload(id, b"hello").unwrap();
        assert_eq!(tx.commit().unwrap(), 1);

        assert!(server.manifest_path().exists());
        assert!(server.revision_dir(1).join(format!("{}.note", id)).exists());
        assert_eq!(staging_dirs(temp_dir.path()), 0);

        let mut tx = server.begin_transaction().unwrap();
        assert_eq!(tx.current_manifest().latest_revision, 1);
        assert_eq!(tx.stage_download(id).unwrap(), b"hello");
    }

    #[test]
    fn test_empty_commit_keeps_revision() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);

        let mut tx = server.begin_transaction().unwrap();
        assert_eq!(tx.commit().unwrap(), 0);
        assert!(!server.manifest_path().exists());
    }

    #[test]
    fn test_stage_delete_writes_tombstone() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);
        let id = Uuid::new_v4();

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_upload(id, b"x").unwrap();
        tx.commit().unwrap();

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_delete(id).unwrap();
        assert_eq!(tx.commit().unwrap(), 2);

        let manifest = server.read_manifest().unwrap();
        let entry = manifest.entry(&id).unwrap();
        assert!(entry.deleted);
        assert_eq!(entry.revision, 2);

        let mut tx = server.begin_transaction().unwrap();
        assert!(matches!(
            tx.stage_download(id),
            Err(SyncError::NoteNotFound { .. })
        ));
    }

    #[test]
    fn test_cancel_discards_staging() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_upload(Uuid::new_v4(), b"draft").unwrap();
        assert_eq!(staging_dirs(temp_dir.path()), 1);

        tx.cancel().unwrap();
        tx.cancel().unwrap();
        assert_eq!(staging_dirs(temp_dir.path()), 0);
        assert!(!server.manifest_path().exists());
    }

    #[test]
    fn test_drop_discards_staging() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);

        {
            let mut tx = server.begin_transaction().unwrap();
            tx.stage_upload(Uuid::new_v4(), b"draft").unwrap();
        }
        assert_eq!(staging_dirs(temp_dir.path()), 0);
    }

    #[test]
    fn test_concurrent_commits_one_wins() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);

        let mut first = server.begin_transaction().unwrap();
        let mut second = server.begin_transaction().unwrap();
        first.stage_upload(Uuid::new_v4(), b"a").unwrap();
        second.stage_upload(Uuid::new_v4(), b"b").unwrap();

        assert_eq!(first.commit().unwrap(), 1);
        let err = second.commit().unwrap_err();
        assert!(matches!(
            err,
            SyncError::ManifestConflict {
                expected: 0,
                found: 1
            }
        ));

        second.cancel().unwrap();
        assert_eq!(staging_dirs(temp_dir.path()), 0);
        assert_eq!(server.read_manifest().unwrap().latest_revision, 1);
    }

    #[test]
    fn test_rename_race_is_manifest_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_upload(Uuid::new_v4(), b"a").unwrap();

        // Another client published revision 1 but has not yet written its
        // manifest into the revision directory
        fs::create_dir(server.revision_dir(1)).unwrap();
        fs::write(server.revision_dir(1).join("other.note"), b"x").unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, SyncError::ManifestConflict { .. }));
    }

    #[test]
    fn test_corrupt_manifest_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);
        fs::write(server.manifest_path(), "<sync revision=").unwrap();

        let err = server.begin_transaction().err().unwrap();
        assert!(matches!(err, SyncError::CorruptManifest { .. }));
        // Never silently reset
        assert_eq!(
            fs::read_to_string(server.manifest_path()).unwrap(),
            "<sync revision="
        );
    }

    #[test]
    fn test_roll_forward_repairs_root_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let server = server(&temp_dir);
        let id = Uuid::new_v4();

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_upload(id, b"one").unwrap();
        tx.commit().unwrap();
        let rev1 = fs::read(server.manifest_path()).unwrap();

        let mut tx = server.begin_transaction().unwrap();
        tx.stage_upload(id, b"two").unwrap();
        tx.commit().unwrap();

        // Simulate a crash after publishing revision 2 but before the root
        // manifest was replaced
        fs::write(server.manifest_path(), &rev1).unwrap();

        let mut tx = server.begin_transaction().unwrap();
        assert_eq!(tx.current_manifest().latest_revision, 2);
        assert_eq!(tx.stage_download(id).unwrap(), b"two");

        let repaired = server.read_manifest().unwrap();
        assert_eq!(repaired.latest_revision, 2);
        let on_disk = Manifest::from_xml(
            &fs::read(server.manifest_path()).unwrap(),
            &server.manifest_path(),
        )
        .unwrap();
        assert_eq!(on_disk.latest_revision, 2);
    }

    #[test]
    fn test_probe_writable() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("new-sync-dir");

        DirectorySyncServer::probe_writable(&target).unwrap();

        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }
}
