//! Note synchronization
//!
//! Reconciles a local `NoteStore` with a remote store through revisioned
//! manifests.
//!
//! ## Protocol
//!
//! 1. The service prepares the location (mounting if needed) and returns a
//!    `SyncServer`
//! 2. A transaction reads the remote `Manifest`
//! 3. Every note is classified against the local `SyncState`: upload,
//!    download, delete, or conflict
//! 4. Conflicts go to a `ConflictResolver`
//! 5. The transaction commits one new revision, or nothing at all
//! 6. Local changes are applied and the state advances
//!
//! ## Usage
//!
//! ```ignore
//! let mut manager = SyncManager::from_config(&config)?;
//! let report = manager.perform_synchronization(&mut PolicyResolver::default())?;
//! ```

pub mod directory;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod resolver;
pub mod server;
pub mod service;
pub mod state;

pub use directory::DirectorySyncServer;
pub use error::{SyncError, SyncResult};
pub use manager::{CancelFlag, SyncEvent, SyncManager, SyncReport, SyncStatus};
pub use manifest::{Manifest, NoteEntry, RevisionId};
pub use resolver::{
    Conflict, ConflictPolicy, ConflictResolver, NoteSnapshot, PolicyResolver, Resolution,
};
pub use server::{SyncServer, Transaction};
pub use service::{
    service_from_config, CommandMounter, LocalFolderService, MountedFolderService, Mounter,
    SyncService,
};
pub use state::SyncState;
