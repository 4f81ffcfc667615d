//! Quire Core Library
//!
//! This crate provides the core functionality for Quire, a plain-file note
//! store that synchronizes through any shared directory.
//!
//! # Architecture
//!
//! - **Local store**: one `<id>.note` file per note, written atomically
//! - **Sync**: revisioned manifests on the remote side, compare-and-swap
//!   commits, and pluggable conflict resolution
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let mut store = FileNoteStore::open(config.notes_dir())?;
//!
//! let mut note = Note::new("Groceries");
//! note.set_body("eggs, flour");
//! store.save_note(&note)?;
//!
//! let mut manager = SyncManager::from_config(&config)?;
//! manager.perform_synchronization(&mut PolicyResolver::default())?;
//! ```
//!
//! # Modules
//!
//! - `store`: Local note storage (main entry point)
//! - `models`: Notes and content hashes
//! - `storage`: Atomic file helpers
//! - `sync`: Manifest, servers, sync engine
//! - `config`: Application configuration

pub mod config;
pub mod models;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use models::{ContentHash, Note};
pub use store::{FileNoteStore, LocalNote, NoteStore};
pub use sync::{
    ConflictPolicy, ConflictResolver, PolicyResolver, Resolution, SyncError, SyncManager,
    SyncReport, SyncResult,
};
