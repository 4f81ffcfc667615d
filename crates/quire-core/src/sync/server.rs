//! Remote store abstraction
//!
//! A `SyncServer` is anything that can hold a manifest and note revisions:
//! a plain directory, a mounted share, or a network service. Every session
//! talks to it through a `Transaction`:
//!
//! 1. `begin_transaction` reads and validates the current manifest
//! 2. `stage_*` calls record uploads/deletes and fetch remote content
//! 3. `commit` publishes everything as one new revision, or fails with
//!    `ManifestConflict` if another client got there first
//! 4. `cancel` (or dropping the transaction) discards all staged work
//!
//! Nothing staged is visible to other sessions before `commit` succeeds.

use uuid::Uuid;

use super::error::SyncResult;
use super::manifest::{Manifest, RevisionId};

/// A remote note store
pub trait SyncServer: Send {
    /// Human-readable location, used in logs and errors
    fn location(&self) -> String;

    /// Start a transaction against the current remote revision
    ///
    /// Fails with `MountFailure` if the store is unreachable and with
    /// `CorruptManifest` if the manifest cannot be parsed. Concurrent
    /// transactions are allowed; their commits race.
    fn begin_transaction(&self) -> SyncResult<Box<dyn Transaction>>;
}

/// Staging handle for one session
pub trait Transaction: Send {
    /// Manifest as of `begin_transaction`
    fn current_manifest(&self) -> &Manifest;

    /// Stage new content for a note
    fn stage_upload(&mut self, id: Uuid, content: &[u8]) -> SyncResult<()>;

    /// Fetch the content of a note at its manifest revision
    fn stage_download(&mut self, id: Uuid) -> SyncResult<Vec<u8>>;

    /// Stage a tombstone for a note
    fn stage_delete(&mut self, id: Uuid) -> SyncResult<()>;

    /// Number of staged uploads and deletes
    fn staged_count(&self) -> usize;

    /// Publish all staged changes as one revision
    ///
    /// Returns the new revision, or the base revision if nothing was staged.
    fn commit(&mut self) -> SyncResult<RevisionId>;

    /// Discard all staged changes
    ///
    /// Idempotent, and safe to call after a failed commit.
    fn cancel(&mut self) -> SyncResult<()>;
}
