//! Status command handler

use anyhow::Result;

use quire_core::sync::SyncState;
use quire_core::{Config, FileNoteStore};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(config: &Config, store: &FileNoteStore, output: &Output) -> Result<()> {
    let note_count = store.note_count()?;
    let state = SyncState::with_path(config.sync_state_path())?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "notes": note_count,
                    "sync_enabled": config.sync_enabled,
                    "sync_path": config.sync_path,
                    "last_synced_revision": state.last_synced_revision
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", note_count);
        }
        OutputFormat::Human => {
            println!("Quire Status");
            println!("============");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!("  Notes:    {}", note_count);
            println!();
            println!("Sync:");
            println!(
                "  Status:   {}",
                if config.sync_enabled && config.is_sync_configured() {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if let Some(ref path) = config.sync_path {
                println!("  Location: {}", path.display());
            }
            if state.is_paired() {
                println!("  Revision: {}", state.last_synced_revision);
            }
        }
    }

    Ok(())
}
