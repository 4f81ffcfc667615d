//! Atomic file operations
//!
//! Both the local note store and the directory sync server rely on these
//! helpers so that a crash never leaves a half-written file behind under
//! its final name.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::sync::{SyncError, SyncResult};

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// This ensures the target file is never left in a partially-written state.
pub fn atomic_write(path: &Path, data: &[u8]) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::from_io(e, parent))?;
    }

    let temp_path = temp_path_for(path);

    let mut file = File::create(&temp_path).map_err(|e| SyncError::from_io(e, &temp_path))?;
    file.write_all(data)
        .map_err(|e| SyncError::from_io(e, &temp_path))?;
    file.sync_all()
        .map_err(|e| SyncError::from_io(e, &temp_path))?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(SyncError::from_io(e, path));
    }

    Ok(())
}

/// Unique sibling path for a temp file
///
/// Same directory, so the final rename stays on one filesystem; unique, so
/// two writers racing on the same target never share a temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Write a new file, syncing it to disk before returning
///
/// Used for files inside directories that are themselves published by an
/// atomic rename, where a temp-file dance would be redundant.
pub fn write_synced(path: &Path, data: &[u8]) -> SyncResult<()> {
    let mut file = File::create(path).map_err(|e| SyncError::from_io(e, path))?;
    file.write_all(data).map_err(|e| SyncError::from_io(e, path))?;
    file.sync_all().map_err(|e| SyncError::from_io(e, path))?;
    Ok(())
}

/// Read a file, returning `None` if it does not exist
pub fn read_optional(path: &Path) -> SyncResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::from_io(e, path)),
    }
}

/// Remove a directory tree if present
pub fn remove_dir_if_exists(path: &Path) -> SyncResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::from_io(e, path)),
    }
}
