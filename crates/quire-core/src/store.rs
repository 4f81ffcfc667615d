//! Local note storage
//!
//! The `NoteStore` trait is everything the sync engine needs from the local
//! side: list notes with their hash and timestamp, read and write raw
//! content, delete, and create new notes.
//!
//! `FileNoteStore` is the reference implementation: one `<id>.note` file per
//! note in a single directory, written atomically.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = FileNoteStore::open(config.notes_dir())?;
//!
//! let mut note = Note::new("Groceries");
//! note.set_body("eggs");
//! store.save_note(&note)?;
//!
//! let notes = store.get_all_notes()?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::models::{ContentHash, Note};
use crate::storage::atomic_write;
use crate::sync::{SyncError, SyncResult};

/// File extension of stored notes, locally and remotely
pub const NOTE_EXTENSION: &str = "note";

/// Summary of one local note as seen by the sync engine
#[derive(Debug, Clone, PartialEq)]
pub struct LocalNote {
    pub id: Uuid,
    pub content_hash: ContentHash,
    pub last_changed: DateTime<Utc>,
}

/// Local note store consumed by the sync engine
pub trait NoteStore {
    /// List every note currently in the store
    fn list(&self) -> SyncResult<Vec<LocalNote>>;

    /// Read a note's raw content
    fn read(&self, id: Uuid) -> SyncResult<Vec<u8>>;

    /// Create or overwrite a note with the given content
    fn write(&mut self, id: Uuid, content: &[u8]) -> SyncResult<()>;

    /// Delete a note; deleting a missing note is not an error
    fn delete(&mut self, id: Uuid) -> SyncResult<()>;

    /// Store content under a freshly generated id
    fn create(&mut self, content: &[u8]) -> SyncResult<Uuid> {
        let id = Uuid::new_v4();
        self.write(id, content)?;
        Ok(id)
    }
}

/// Directory of `<id>.note` files
#[derive(Debug, Clone)]
pub struct FileNoteStore {
    dir: PathBuf,
}

impl FileNoteStore {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> SyncResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SyncError::from_io(e, &dir))?;
        Ok(Self { dir })
    }

    /// Directory holding the note files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn note_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", id, NOTE_EXTENSION))
    }

    // ==================== Note Operations ====================

    /// Save a note (create or update)
    pub fn save_note(&mut self, note: &Note) -> SyncResult<()> {
        self.write(note.id, &note.to_content())
    }

    /// Get a note by ID
    pub fn get_note(&self, id: Uuid) -> SyncResult<Option<Note>> {
        let path = self.note_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = self.read(id)?;
        let updated_at = modified_time(&path)?;
        Note::from_content(id, &content, updated_at)
            .map(Some)
            .ok_or_else(|| SyncError::InvalidNote {
                path,
                details: "content is not valid UTF-8".to_string(),
            })
    }

    /// Get all notes, most recently changed first
    pub fn get_all_notes(&self) -> SyncResult<Vec<Note>> {
        let mut notes = Vec::new();
        for local in self.list()? {
            if let Some(note) = self.get_note(local.id)? {
                notes.push(note);
            }
        }
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    /// Get count of notes
    pub fn note_count(&self) -> SyncResult<usize> {
        Ok(self.list()?.len())
    }
}

impl NoteStore for FileNoteStore {
    fn list(&self) -> SyncResult<Vec<LocalNote>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| SyncError::from_io(e, &self.dir))?;

        let mut notes = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::from_io(e, &self.dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(NOTE_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                debug!("Skipping unrecognized file {:?}", path);
                continue;
            };

            let content = fs::read(&path).map_err(|e| SyncError::from_io(e, &path))?;
            notes.push(LocalNote {
                id,
                content_hash: ContentHash::of(&content),
                last_changed: modified_time(&path)?,
            });
        }

        notes.sort_by_key(|n| n.id);
        Ok(notes)
    }

    fn read(&self, id: Uuid) -> SyncResult<Vec<u8>> {
        let path = self.note_path(id);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::NoteNotFound { id },
            _ => SyncError::from_io(e, &path),
        })
    }

    fn write(&mut self, id: Uuid, content: &[u8]) -> SyncResult<()> {
        atomic_write(&self.note_path(id), content)
    }

    fn delete(&mut self, id: Uuid) -> SyncResult<()> {
        let path = self.note_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::from_io(e, &path)),
        }
    }
}

fn modified_time(path: &Path) -> SyncResult<DateTime<Utc>> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::from_io(e, path))?;
    Ok(DateTime::<Utc>::from(modified))
}
