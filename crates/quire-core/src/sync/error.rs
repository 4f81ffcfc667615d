//! Sync error handling
//!
//! Every failure of a sync session is reported as a typed `SyncError` with
//! enough context for the caller to decide between retrying and giving up.
//! Nothing is retried inside the engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use super::manifest::RevisionId;

/// Errors that can occur during a sync session
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote location could not be reached or mounted
    #[error("Failed to mount sync location '{target}': {details}")]
    MountFailure { target: String, details: String },

    /// The remote manifest exists but cannot be parsed or is inconsistent
    #[error("Manifest at '{path}' is corrupted: {details}")]
    CorruptManifest { path: PathBuf, details: String },

    /// Another client committed a revision since this session began
    #[error("Remote revision changed during sync (expected {expected}, found {found}). Run sync again.")]
    ManifestConflict {
        expected: RevisionId,
        found: RevisionId,
    },

    /// Disk or network failure while transferring data
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The conflict resolver declined to resolve a conflict
    #[error("Conflict on note {id} was not resolved; sync aborted")]
    ConflictUnresolved { id: Uuid },

    /// The session was cancelled before commit
    #[error("Sync cancelled")]
    Cancelled,

    /// Another sync session holds the session lock
    #[error("Another sync session is already running (lock file '{lock_path}')")]
    SessionInProgress { lock_path: PathBuf },

    /// A note requested from a store does not exist
    #[error("Note not found: {id}")]
    NoteNotFound { id: Uuid },

    /// A note file exists but could not be interpreted
    #[error("Invalid note file '{path}': {details}")]
    InvalidNote { path: PathBuf, details: String },

    /// The local sync state file could not be read or written
    #[error("Invalid sync state '{path}': {details}")]
    InvalidState { path: PathBuf, details: String },
}

impl SyncError {
    /// Create an error from an I/O error with path context
    ///
    /// `NotFound` on a manifest-referenced file is still an I/O failure from
    /// the session's point of view, so no special casing happens here.
    pub fn from_io(error: io::Error, path: impl Into<PathBuf>) -> Self {
        SyncError::Io {
            path: path.into(),
            source: error,
        }
    }

    /// Create a corrupt-manifest error
    pub fn corrupt(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        SyncError::CorruptManifest {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Check if running the whole session again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::MountFailure { .. }
                | SyncError::ManifestConflict { .. }
                | SyncError::Io { .. }
                | SyncError::SessionInProgress { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::MountFailure { .. } => {
                Some("Check that the sync location is reachable and try again later.")
            }
            SyncError::CorruptManifest { .. } => {
                Some("The remote manifest must be repaired by hand. Nothing was changed locally or remotely.")
            }
            SyncError::ManifestConflict { .. } => {
                Some("Another device synchronized at the same time. Run sync again.")
            }
            SyncError::SessionInProgress { .. } => {
                Some("Wait for the running sync to finish. If none is running, remove the lock file.")
            }
            SyncError::ConflictUnresolved { .. } | SyncError::Cancelled => {
                Some("No changes were made. Run sync again when ready to resolve conflicts.")
            }
            SyncError::InvalidState { .. } => {
                Some("Unlink and re-pair the sync location to rebuild the local sync state.")
            }
            _ => None,
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
