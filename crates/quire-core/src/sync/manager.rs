//! Sync session orchestration
//!
//! `SyncManager::perform_synchronization` runs one session:
//!
//! 1. Take the session lock for the data directory
//! 2. Get a server from the service (mounting if needed)
//! 3. Begin a transaction and classify every note known to either side
//! 4. Stage uploads, downloads and tombstones; ask the resolver about
//!    conflicts
//! 5. Commit, then apply local changes and persist the sync state
//! 6. Let the service clean up (unmount)
//!
//! Anything that fails before the commit cancels the transaction, so
//! neither the remote store nor the local store or state is touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{SyncError, SyncResult};
use super::manifest::{NoteEntry, RevisionId};
use super::resolver::{Conflict, ConflictResolver, NoteSnapshot, Resolution};
use super::server::Transaction;
use super::service::{service_from_config, SyncService};
use super::state::SyncState;
use crate::config::Config;
use crate::models::{conflict_copy_content, ContentHash};
use crate::store::{FileNoteStore, LocalNote, NoteStore};

/// Session progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No session running
    Idle,
    /// Preparing the sync location (mounting)
    Connecting,
    /// Classifying notes
    Comparing,
    /// Waiting for conflict decisions
    Resolving,
    /// Publishing the new revision
    Committing,
    /// Writing remote changes to the local store
    Applying,
    /// Last session succeeded
    Finished,
    /// Last session failed
    Failed,
}

/// Events emitted during a session
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Session status changed
    StatusChanged(SyncStatus),
    /// A note needs a conflict decision
    ConflictDetected(Uuid),
    /// Session completed
    Finished(SyncReport),
    /// Session failed
    Failed(String),
}

/// What a session did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Remote revision after the session
    pub revision: RevisionId,
    pub uploaded: Vec<Uuid>,
    pub downloaded: Vec<Uuid>,
    pub deleted_local: Vec<Uuid>,
    pub deleted_remote: Vec<Uuid>,
    pub conflicts: Vec<(Uuid, Resolution)>,
    /// New notes holding the remote side of `KeepBoth` conflicts, uploaded
    /// in the same revision
    pub conflict_copies: Vec<Uuid>,
}

impl SyncReport {
    /// True when the session moved nothing in either direction
    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty()
            && self.downloaded.is_empty()
            && self.deleted_local.is_empty()
            && self.deleted_remote.is_empty()
            && self.conflicts.is_empty()
            && self.conflict_copies.is_empty()
    }
}

/// Shared cancellation signal
///
/// Checked between session phases and while mounting.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

/// Lock file serializing sessions for one data directory
///
/// Holds an exclusive OS lock on the file for the life of the session. The
/// lock goes away with the process, so a crashed session never blocks the
/// next one. The file itself is left in place.
#[derive(Debug)]
struct SessionGuard {
    file: File,
    path: PathBuf,
}

impl SessionGuard {
    fn acquire(path: &Path) -> SyncResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::from_io(e, parent))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| SyncError::from_io(e, path))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(SyncError::SessionInProgress {
                    lock_path: path.to_path_buf(),
                })
            }
            Err(e) => Err(SyncError::from_io(e, path)),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to release session lock {:?}: {}", self.path, e);
        }
    }
}

/// Conflict waiting for a decision, with the remote bytes already fetched
struct PendingConflict {
    conflict: Conflict,
    remote: Option<(RevisionId, Vec<u8>)>,
}

/// Everything a session will do, built before commit
#[derive(Default)]
struct Plan {
    /// Local writes of downloaded content
    writes: Vec<(Uuid, Vec<u8>)>,
    /// Local deletions
    deletes: Vec<Uuid>,
    /// Conflict copies to create locally, already staged for upload
    copies: Vec<(Uuid, Vec<u8>)>,
    /// Notes uploaded in this session's revision
    uploaded: Vec<(Uuid, ContentHash)>,
    /// Notes now matching an existing remote revision
    recorded: Vec<(Uuid, RevisionId, ContentHash)>,
    /// Notes gone from both sides
    forgotten: Vec<Uuid>,
    report: SyncReport,
}

/// Runs sync sessions between a local note store and a sync service
pub struct SyncManager<S: NoteStore> {
    service: Box<dyn SyncService>,
    store: S,
    state: SyncState,
    lock_path: PathBuf,
    cancel: CancelFlag,
    status: watch::Sender<SyncStatus>,
    status_rx: watch::Receiver<SyncStatus>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SyncEvent>>,
}

impl SyncManager<FileNoteStore> {
    /// Build a manager for the configured data directory and sync location
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let service = service_from_config(config)?;
        let store = FileNoteStore::open(config.notes_dir())?;
        let state = SyncState::with_path(config.sync_state_path())?;
        Ok(Self::new(service, store, state, config.sync_lock_path()))
    }
}

impl<S: NoteStore> SyncManager<S> {
    pub fn new(
        service: Box<dyn SyncService>,
        store: S,
        state: SyncState,
        lock_path: impl Into<PathBuf>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(SyncStatus::Idle);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            service,
            store,
            state,
            lock_path: lock_path.into(),
            cancel: CancelFlag::new(),
            status: status_tx,
            status_rx,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn service(&self) -> &dyn SyncService {
        self.service.as_ref()
    }

    /// Handle for cancelling a running session from another thread
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Get the current status
    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Run one sync session
    pub fn perform_synchronization(
        &mut self,
        resolver: &mut dyn ConflictResolver,
    ) -> SyncResult<SyncReport> {
        let _guard = SessionGuard::acquire(&self.lock_path)?;
        info!("Starting sync via {}", self.service.name());

        let result = self.run_session(resolver);

        if let Err(e) = self.service.post_sync_cleanup() {
            warn!("Post-sync cleanup failed: {}", e);
        }

        match result {
            Ok(report) => {
                info!(
                    "Sync finished at revision {}: {} up, {} down, {} conflicts",
                    report.revision,
                    report.uploaded.len(),
                    report.downloaded.len(),
                    report.conflicts.len()
                );
                self.set_status(SyncStatus::Finished);
                self.emit(SyncEvent::Finished(report.clone()));
                Ok(report)
            }
            Err(e) => {
                warn!("Sync failed: {}", e);
                self.set_status(SyncStatus::Failed);
                self.emit(SyncEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn run_session(&mut self, resolver: &mut dyn ConflictResolver) -> SyncResult<SyncReport> {
        self.cancel.check()?;
        self.set_status(SyncStatus::Connecting);
        let server = self.service.create_sync_server(&self.cancel)?;
        debug!("Sync location: {}", server.location());

        let mut tx = server.begin_transaction()?;
        let staged = self.stage_session(tx.as_mut(), resolver);
        let plan = match staged {
            Ok(plan) => plan,
            Err(e) => {
                if let Err(cancel_err) = tx.cancel() {
                    warn!("Failed to discard staged changes: {}", cancel_err);
                }
                return Err(e);
            }
        };

        self.set_status(SyncStatus::Committing);
        let revision = match tx.commit() {
            Ok(revision) => revision,
            Err(e) => {
                if let Err(cancel_err) = tx.cancel() {
                    warn!("Failed to discard staged changes: {}", cancel_err);
                }
                return Err(e);
            }
        };

        self.set_status(SyncStatus::Applying);
        self.apply(plan, revision)
    }

    /// Classify, resolve and stage; nothing outside the transaction changes
    fn stage_session(
        &mut self,
        tx: &mut dyn Transaction,
        resolver: &mut dyn ConflictResolver,
    ) -> SyncResult<Plan> {
        let manifest = tx.current_manifest().clone();
        debug!(
            "Remote at revision {}, last synced {}",
            manifest.latest_revision, self.state.last_synced_revision
        );
        self.state.pair_with(manifest.store_id);
        self.cancel.check()?;

        self.set_status(SyncStatus::Comparing);
        let local: BTreeMap<Uuid, LocalNote> = self
            .store
            .list()?
            .into_iter()
            .map(|note| (note.id, note))
            .collect();

        let mut ids: BTreeSet<Uuid> = local.keys().copied().collect();
        ids.extend(manifest.entries.keys().copied());
        ids.extend(self.state.local_revisions.keys().copied());
        ids.extend(self.state.synced_hashes.keys().copied());

        let mut plan = Plan::default();
        let mut pending = Vec::new();
        for id in ids {
            if let Some(conflict) =
                self.classify(id, local.get(&id), manifest.entry(&id), tx, &mut plan)?
            {
                pending.push(conflict);
            }
        }
        self.cancel.check()?;

        if !pending.is_empty() {
            self.set_status(SyncStatus::Resolving);
        }
        for mut pending in pending {
            self.emit(SyncEvent::ConflictDetected(pending.conflict.id));
            pending.conflict.resolution = resolver.resolve(&pending.conflict);
            self.apply_resolution(pending, tx, &mut plan)?;
            self.cancel.check()?;
        }

        debug!("Staged {} changes", tx.staged_count());
        self.cancel.check()?;
        Ok(plan)
    }

    /// Decide what to do with one note
    ///
    /// Returns a conflict when both sides changed in different ways.
    fn classify(
        &mut self,
        id: Uuid,
        local: Option<&LocalNote>,
        entry: Option<&NoteEntry>,
        tx: &mut dyn Transaction,
        plan: &mut Plan,
    ) -> SyncResult<Option<PendingConflict>> {
        let synced_hash = self.state.synced_hash(&id).cloned();
        let remote_changed = entry
            .map(|e| e.revision > self.state.last_synced_revision)
            .unwrap_or(false);

        match (local, synced_hash) {
            (Some(note), Some(synced_hash)) => {
                let local_changed = note.content_hash != synced_hash;
                match entry {
                    None => {
                        debug!("{}: missing from manifest, uploading", id);
                        self.upload(id, tx, plan)?;
                    }
                    Some(e) if e.deleted => {
                        if local_changed {
                            debug!("{}: edited locally, deleted remotely", id);
                            return Ok(Some(PendingConflict {
                                conflict: Conflict::new(id, Some(self.local_snapshot(note)), None),
                                remote: None,
                            }));
                        }
                        debug!("{}: deleted remotely", id);
                        self.delete_local(id, plan);
                    }
                    Some(e) => match (local_changed, remote_changed) {
                        (false, false) => {}
                        (true, false) => {
                            debug!("{}: edited locally", id);
                            self.upload(id, tx, plan)?;
                        }
                        (false, true) => {
                            debug!("{}: edited remotely", id);
                            let content = tx.stage_download(id)?;
                            self.download(id, e.revision, content, plan);
                        }
                        (true, true) => return self.compare(id, note, e, tx, plan),
                    },
                }
            }
            (Some(note), None) => match entry {
                Some(e) if !e.deleted => return self.compare(id, note, e, tx, plan),
                _ => {
                    debug!("{}: new local note", id);
                    self.upload(id, tx, plan)?;
                }
            },
            (None, Some(_)) => match entry {
                Some(e) if !e.deleted => {
                    if remote_changed {
                        debug!("{}: deleted locally, edited remotely", id);
                        let content = tx.stage_download(id)?;
                        let snapshot = remote_snapshot(id, e.revision, &content);
                        return Ok(Some(PendingConflict {
                            conflict: Conflict::new(id, None, Some(snapshot)),
                            remote: Some((e.revision, content)),
                        }));
                    }
                    debug!("{}: deleted locally", id);
                    self.delete_remote(id, tx, plan)?;
                }
                _ => {
                    debug!("{}: deleted on both sides", id);
                    plan.forgotten.push(id);
                }
            },
            (None, None) => match entry {
                Some(e) if !e.deleted => {
                    debug!("{}: new remote note", id);
                    let content = tx.stage_download(id)?;
                    self.download(id, e.revision, content, plan);
                }
                _ => {
                    if self.state.local_revisions.contains_key(&id) {
                        plan.forgotten.push(id);
                    }
                }
            },
        }
        Ok(None)
    }

    /// Both sides have content: fetch the remote side and compare bytes
    fn compare(
        &mut self,
        id: Uuid,
        note: &LocalNote,
        entry: &NoteEntry,
        tx: &mut dyn Transaction,
        plan: &mut Plan,
    ) -> SyncResult<Option<PendingConflict>> {
        let content = tx.stage_download(id)?;
        let remote_hash = ContentHash::of(&content);
        if remote_hash == note.content_hash {
            debug!("{}: identical on both sides", id);
            plan.recorded.push((id, entry.revision, remote_hash));
            return Ok(None);
        }

        debug!("{}: changed on both sides", id);
        let conflict = Conflict::new(
            id,
            Some(self.local_snapshot(note)),
            Some(remote_snapshot(id, entry.revision, &content)),
        );
        Ok(Some(PendingConflict {
            conflict,
            remote: Some((entry.revision, content)),
        }))
    }

    /// Stage the outcome of a resolved conflict
    ///
    /// An unresolved conflict is an error, which aborts the session.
    fn apply_resolution(
        &mut self,
        pending: PendingConflict,
        tx: &mut dyn Transaction,
        plan: &mut Plan,
    ) -> SyncResult<()> {
        let id = pending.conflict.id;
        let Some(resolution) = pending.conflict.resolution else {
            return Err(SyncError::ConflictUnresolved { id });
        };
        debug!("Conflict on {} resolved as {}", id, resolution);
        plan.report.conflicts.push((id, resolution));
        let local_exists = !pending.conflict.deleted_locally();

        match (pending.remote, resolution) {
            // Remote side deleted
            (None, Resolution::KeepRemote) => self.delete_local(id, plan),
            (None, _) => self.upload(id, tx, plan)?,

            // Local side deleted
            (Some(_), Resolution::KeepLocal) if !local_exists => self.delete_remote(id, tx, plan)?,
            (Some((revision, content)), _) if !local_exists => {
                self.download(id, revision, content, plan)
            }

            (Some(_), Resolution::KeepLocal) => self.upload(id, tx, plan)?,
            (Some((revision, content)), Resolution::KeepRemote) => {
                self.download(id, revision, content, plan)
            }
            (Some((_, content)), Resolution::KeepBoth) => {
                self.upload(id, tx, plan)?;
                self.upload_copy(&content, tx, plan)?;
            }
        }
        Ok(())
    }

    fn upload(&mut self, id: Uuid, tx: &mut dyn Transaction, plan: &mut Plan) -> SyncResult<()> {
        let content = self.store.read(id)?;
        tx.stage_upload(id, &content)?;
        plan.uploaded.push((id, ContentHash::of(&content)));
        plan.report.uploaded.push(id);
        Ok(())
    }

    /// Stage the remote side of a conflict as a new note
    fn upload_copy(
        &mut self,
        content: &[u8],
        tx: &mut dyn Transaction,
        plan: &mut Plan,
    ) -> SyncResult<()> {
        let copy = Uuid::new_v4();
        let content = conflict_copy_content(content);
        tx.stage_upload(copy, &content)?;
        debug!("Remote side of conflict staged as {}", copy);
        plan.uploaded.push((copy, ContentHash::of(&content)));
        plan.report.conflict_copies.push(copy);
        plan.copies.push((copy, content));
        Ok(())
    }

    fn download(&mut self, id: Uuid, revision: RevisionId, content: Vec<u8>, plan: &mut Plan) {
        plan.recorded.push((id, revision, ContentHash::of(&content)));
        plan.writes.push((id, content));
        plan.report.downloaded.push(id);
    }

    fn delete_remote(
        &mut self,
        id: Uuid,
        tx: &mut dyn Transaction,
        plan: &mut Plan,
    ) -> SyncResult<()> {
        tx.stage_delete(id)?;
        plan.forgotten.push(id);
        plan.report.deleted_remote.push(id);
        Ok(())
    }

    fn delete_local(&mut self, id: Uuid, plan: &mut Plan) {
        plan.deletes.push(id);
        plan.forgotten.push(id);
        plan.report.deleted_local.push(id);
    }

    fn local_snapshot(&self, note: &LocalNote) -> NoteSnapshot {
        NoteSnapshot {
            id: note.id,
            content_hash: note.content_hash.clone(),
            last_changed: Some(note.last_changed),
            revision: self.state.local_revisions.get(&note.id).copied(),
        }
    }

    /// Apply local changes and persist the new sync state
    ///
    /// Runs after the commit. If it fails part-way, the next session finds
    /// the affected notes identical on both sides and only records them.
    fn apply(&mut self, mut plan: Plan, revision: RevisionId) -> SyncResult<SyncReport> {
        for (id, content) in &plan.writes {
            self.store.write(*id, content)?;
        }
        for id in &plan.deletes {
            self.store.delete(*id)?;
        }
        for (copy, content) in &plan.copies {
            self.store.write(*copy, content)?;
        }

        for (id, hash) in plan.uploaded {
            self.state.record(id, revision, hash);
        }
        for (id, note_revision, hash) in plan.recorded {
            self.state.record(id, note_revision, hash);
        }
        for id in &plan.forgotten {
            self.state.forget(id);
        }
        self.state.advance(revision);
        self.state.save()?;

        plan.report.revision = revision;
        Ok(plan.report)
    }

    fn set_status(&self, status: SyncStatus) {
        let _ = self.status.send(status);
        self.emit(SyncEvent::StatusChanged(status));
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn remote_snapshot(id: Uuid, revision: RevisionId, content: &[u8]) -> NoteSnapshot {
    NoteSnapshot {
        id,
        content_hash: ContentHash::of(content),
        last_changed: None,
        revision: Some(revision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Note;
    use crate::sync::directory::DirectorySyncServer;
    use crate::sync::manifest::Manifest;
    use crate::sync::resolver::PolicyResolver;
    use crate::sync::service::LocalFolderService;
    use chrono::Utc;
    use tempfile::TempDir;

    /// In-memory note store
    #[derive(Default)]
    struct MemoryStore {
        notes: BTreeMap<Uuid, Vec<u8>>,
    }

    impl NoteStore for MemoryStore {
        fn list(&self) -> SyncResult<Vec<LocalNote>> {
            Ok(self
                .notes
                .iter()
                .map(|(id, content)| LocalNote {
                    id: *id,
                    content_hash: ContentHash::of(content),
                    last_changed: Utc::now(),
                })
                .collect())
        }

        fn read(&self, id: Uuid) -> SyncResult<Vec<u8>> {
            self.notes
                .get(&id)
                .cloned()
                .ok_or(SyncError::NoteNotFound { id })
        }

        fn write(&mut self, id: Uuid, content: &[u8]) -> SyncResult<()> {
            self.notes.insert(id, content.to_vec());
            Ok(())
        }

        fn delete(&mut self, id: Uuid) -> SyncResult<()> {
            self.notes.remove(&id);
            Ok(())
        }
    }

    /// Resolver that defers every conflict
    struct Deferring;

    impl ConflictResolver for Deferring {
        fn resolve(&mut self, _conflict: &Conflict) -> Option<Resolution> {
            None
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        remote: PathBuf,
        data: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let remote = temp_dir.path().join("remote");
            let data = temp_dir.path().join("data");
            Self {
                _temp_dir: temp_dir,
                remote,
                data,
            }
        }

        fn manager(&self) -> SyncManager<MemoryStore> {
            SyncManager::new(
                Box::new(LocalFolderService::new(&self.remote)),
                MemoryStore::default(),
                SyncState::new(),
                self.data.join("sync.lock"),
            )
        }

        fn manifest(&self) -> Manifest {
            DirectorySyncServer::new(&self.remote).read_manifest().unwrap()
        }
    }

    fn note_content(title: &str, body: &str) -> Vec<u8> {
        let mut note = Note::new(title);
        note.set_body(body);
        note.to_content()
    }

    #[test]
    fn test_first_sync_uploads_local_notes() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        let id = manager.store_mut().create(&note_content("a", "b")).unwrap();

        let report = manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        assert_eq!(report.revision, 1);
        assert_eq!(report.uploaded, vec![id]);
        assert_eq!(manager.state().last_synced_revision, 1);
        assert_eq!(manager.state().local_revisions.get(&id), Some(&1));
        assert_eq!(fixture.manifest().entry(&id).unwrap().revision, 1);
    }

    #[test]
    fn test_second_sync_is_noop() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        manager.store_mut().create(&note_content("a", "b")).unwrap();
        manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        let report = manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        assert!(report.is_noop());
        assert_eq!(report.revision, 1);
        assert_eq!(fixture.manifest().latest_revision, 1);
    }

    #[test]
    fn test_deferred_conflict_aborts_without_changes() {
        let fixture = Fixture::new();
        let mut first = fixture.manager();
        let id = first.store_mut().create(&note_content("a", "v1")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        let mut second = fixture.manager();
        second
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        first.store_mut().write(id, &note_content("a", "first")).unwrap();
        second.store_mut().write(id, &note_content("a", "second")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        let before = fixture.manifest();
        let state_before = second.state().clone();

        let err = second.perform_synchronization(&mut Deferring).unwrap_err();
        assert!(matches!(err, SyncError::ConflictUnresolved { id: conflict } if conflict == id));
        assert_eq!(fixture.manifest(), before);
        assert_eq!(second.state(), &state_before);
        assert_eq!(
            second.store().read(id).unwrap(),
            note_content("a", "second")
        );
    }

    #[test]
    fn test_cancelled_before_start() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        manager.store_mut().create(&note_content("a", "b")).unwrap();
        manager.cancel_flag().cancel();

        let err = manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(manager.status(), SyncStatus::Failed);
        assert!(!fixture.remote.join("1").exists());
    }

    #[test]
    fn test_session_lock_blocks_second_session() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        let _held = SessionGuard::acquire(&fixture.data.join("sync.lock")).unwrap();

        let err = manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::SessionInProgress { .. }));
    }

    #[test]
    fn test_session_lock_released_after_session() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        SessionGuard::acquire(&fixture.data.join("sync.lock")).unwrap();
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() {
        let fixture = Fixture::new();
        fs::create_dir_all(&fixture.data).unwrap();
        fs::write(fixture.data.join("sync.lock"), "999999\n").unwrap();
        let mut manager = fixture.manager();

        let report = manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        assert_eq!(report.revision, 0);
    }

    /// Resolver that records what it was asked
    struct Recording {
        seen: Vec<(Uuid, bool)>,
        answer: Resolution,
    }

    impl ConflictResolver for Recording {
        fn resolve(&mut self, conflict: &Conflict) -> Option<Resolution> {
            self.seen.push((conflict.id, conflict.is_resolved()));
            Some(self.answer)
        }
    }

    #[test]
    fn test_conflicts_reach_resolver_unresolved() {
        let fixture = Fixture::new();
        let mut first = fixture.manager();
        let id = first.store_mut().create(&note_content("a", "v1")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        let mut second = fixture.manager();
        second
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        first.store_mut().write(id, &note_content("a", "first")).unwrap();
        second.store_mut().write(id, &note_content("a", "second")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        let mut resolver = Recording {
            seen: Vec::new(),
            answer: Resolution::KeepLocal,
        };
        let report = second.perform_synchronization(&mut resolver).unwrap();

        assert_eq!(resolver.seen, vec![(id, false)]);
        assert_eq!(report.conflicts, vec![(id, Resolution::KeepLocal)]);
        assert_eq!(
            second.store().read(id).unwrap(),
            note_content("a", "second")
        );
    }

    #[test]
    fn test_keep_both_stages_copy_in_same_revision() {
        let fixture = Fixture::new();
        let mut first = fixture.manager();
        let id = first.store_mut().create(&note_content("a", "v1")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        let mut second = fixture.manager();
        second
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        first.store_mut().write(id, &note_content("a", "first")).unwrap();
        second.store_mut().write(id, &note_content("a", "second")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        let report = second
            .perform_synchronization(&mut PolicyResolver::new(Resolution::KeepBoth))
            .unwrap();

        let copy = report.conflict_copies[0];
        let manifest = fixture.manifest();
        assert_eq!(manifest.entry(&id).unwrap().revision, report.revision);
        assert_eq!(manifest.entry(&copy).unwrap().revision, report.revision);
        assert_eq!(second.state().local_revisions.get(&copy), Some(&report.revision));
        assert!(second.store().read(copy).is_ok());
    }

    #[test]
    fn test_events_report_progress() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        let mut events = manager.take_events().unwrap();
        assert!(manager.take_events().is_none());
        manager.store_mut().create(&note_content("a", "b")).unwrap();

        manager
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        let mut statuses = Vec::new();
        let mut finished = None;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::StatusChanged(status) => statuses.push(status),
                SyncEvent::Finished(report) => finished = Some(report),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(statuses.first(), Some(&SyncStatus::Connecting));
        assert_eq!(statuses.last(), Some(&SyncStatus::Finished));
        assert!(statuses.contains(&SyncStatus::Committing));
        assert_eq!(finished.unwrap().uploaded.len(), 1);
    }

    #[test]
    fn test_deleted_on_both_sides_is_forgotten() {
        let fixture = Fixture::new();
        let mut first = fixture.manager();
        let id = first.store_mut().create(&note_content("a", "b")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        let mut second = fixture.manager();
        second
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        first.store_mut().delete(id).unwrap();
        second.store_mut().delete(id).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        let report = second
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        assert!(report.is_noop());
        assert!(!second.state().was_synced(&id));
        assert!(fixture.manifest().entry(&id).unwrap().deleted);
    }

    #[test]
    fn test_remote_edit_against_local_delete_keep_local() {
        let fixture = Fixture::new();
        let mut first = fixture.manager();
        let id = first.store_mut().create(&note_content("a", "v1")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        let mut second = fixture.manager();
        second
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();

        first.store_mut().write(id, &note_content("a", "v2")).unwrap();
        first
            .perform_synchronization(&mut PolicyResolver::default())
            .unwrap();
        second.store_mut().delete(id).unwrap();

        let report = second
            .perform_synchronization(&mut PolicyResolver::new(Resolution::KeepLocal))
            .unwrap();

        assert_eq!(report.conflicts, vec![(id, Resolution::KeepLocal)]);
        assert_eq!(report.deleted_remote, vec![id]);
        assert!(fixture.manifest().entry(&id).unwrap().deleted);
    }
}
