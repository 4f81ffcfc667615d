//! Sync command handlers

use std::collections::BTreeSet;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use quire_core::sync::{
    service_from_config, ConflictPolicy, DirectorySyncServer, Manifest, PolicyResolver,
    RevisionId, SyncError, SyncEvent, SyncManager, SyncState,
};
use quire_core::{Config, FileNoteStore, NoteStore};

use crate::output::{Output, OutputFormat};
use crate::resolver::InteractiveResolver;

/// Run one sync session
///
/// The session runs on a blocking thread; Ctrl-C raises its cancel flag.
pub async fn sync(config: &Config, policy: Option<ConflictPolicy>, output: &Output) -> Result<()> {
    let sync_path = sync_location(config)?;
    let policy = policy.unwrap_or(config.conflict_policy);
    if policy == ConflictPolicy::Ask && !output.should_prompt() {
        bail!("Conflict policy 'ask' needs an interactive terminal; pass --policy instead");
    }

    let mut manager = SyncManager::from_config(config)?;
    let cancel = manager.cancel_flag();

    if let Some(mut events) = manager.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SyncEvent::StatusChanged(status) => debug!("Sync status: {:?}", status),
                    SyncEvent::ConflictDetected(id) => info!("Conflict detected on {}", id),
                    SyncEvent::Finished(_) | SyncEvent::Failed(_) => break,
                }
            }
        });
    }

    output.message(&format!("Syncing with {}...", sync_path.display()));

    let session_cancel = cancel.clone();
    let mut session = tokio::task::spawn_blocking(move || match policy.resolution() {
        Some(resolution) => manager.perform_synchronization(&mut PolicyResolver::new(resolution)),
        None => {
            let mut resolver = InteractiveResolver::new(BufReader::new(io::stdin()), io::stderr())
                .with_cancel(session_cancel);
            manager.perform_synchronization(&mut resolver)
        }
    });

    let result = tokio::select! {
        joined = &mut session => joined,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            output.message("Cancelling sync...");
            session.await
        }
    }
    .context("Sync task failed")?;

    match result {
        Ok(report) => {
            output.print_sync_report(&report);
            Ok(())
        }
        Err(e) => {
            report_failure(&e, output);
            Err(e.into())
        }
    }
}

/// The configured sync location, if sync is set up and enabled
fn sync_location(config: &Config) -> Result<&PathBuf> {
    let Some(ref sync_path) = config.sync_path else {
        bail!(
            "Sync location not configured. Set it up with:\n  \
             quire sync setup /path/to/shared/folder"
        );
    };
    if !config.sync_enabled {
        bail!(
            "Sync is disabled. Enable it with:\n  \
             quire config set sync_enabled true"
        );
    }
    Ok(sync_path)
}

fn report_failure(error: &SyncError, output: &Output) {
    if output.is_quiet() {
        return;
    }
    if let Some(hint) = error.recovery_suggestion() {
        eprintln!("Hint: {}", hint);
    } else if error.is_retryable() {
        eprintln!("Hint: this may be temporary; run sync again.");
    }
}

/// Show the sync pairing and pending changes
pub fn status(config: &Config, output: &Output) -> Result<()> {
    let state = SyncState::with_path(config.sync_state_path())?;
    let store = FileNoteStore::open(config.notes_dir())?;

    let local_notes = store.list()?;
    let present: BTreeSet<_> = local_notes.iter().map(|n| n.id).collect();
    let local_changes = local_notes
        .iter()
        .filter(|n| state.synced_hash(&n.id) != Some(&n.content_hash))
        .count()
        + state
            .synced_hashes
            .keys()
            .filter(|id| !present.contains(id))
            .count();

    // Peek at the remote only when it is reachable without mounting
    let remote = match config.sync_path {
        Some(ref path) if config.mount_command.is_none() && path.is_dir() => {
            DirectorySyncServer::new(path).read_manifest().ok()
        }
        _ => None,
    };
    let remote = remote.map(|manifest| RemoteSummary::of(&manifest, &state));

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "sync_path": config.sync_path,
                    "sync_enabled": config.sync_enabled,
                    "store_id": state.store_id,
                    "last_synced_revision": state.last_synced_revision,
                    "remote_revision": remote.as_ref().map(|r| r.revision),
                    "remote_notes": remote.as_ref().map(|r| r.notes),
                    "remote_changes": remote.as_ref().map(|r| r.changes),
                    "tracked_notes": state.note_count(),
                    "local_changes": local_changes
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", state.last_synced_revision);
        }
        OutputFormat::Human => {
            println!("Sync:");
            match config.sync_path {
                Some(ref path) => println!("  Location:      {}", path.display()),
                None => println!("  Location:      (not configured)"),
            }
            println!(
                "  Paired with:   {}",
                state
                    .store_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "(never synced)".to_string())
            );
            println!("  Last revision: {}", state.last_synced_revision);
            if let Some(ref remote) = remote {
                println!(
                    "  Remote:        revision {} ({} notes, {} changed since last sync)",
                    remote.revision, remote.notes, remote.changes
                );
            }
            println!("  Tracked notes: {}", state.note_count());
            println!("  Local changes: {}", local_changes);
        }
    }

    Ok(())
}

/// What the remote holds relative to the local sync state
#[derive(Debug, PartialEq)]
struct RemoteSummary {
    revision: RevisionId,
    notes: usize,
    changes: usize,
}

impl RemoteSummary {
    fn of(manifest: &Manifest, state: &SyncState) -> Self {
        // A different store means nothing has been synced with it yet
        let since = if state.store_id == Some(manifest.store_id) {
            state.last_synced_revision
        } else {
            0
        };
        Self {
            revision: manifest.latest_revision,
            notes: manifest.live_notes().count(),
            changes: manifest
                .entries
                .keys()
                .filter(|id| manifest.changed_since(id, since))
                .count(),
        }
    }
}

/// Configure a sync location after checking it is writable
pub fn setup(
    path: PathBuf,
    mount_command: Option<String>,
    unmount_command: Option<String>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.sync_path = Some(path.clone());
    if mount_command.is_some() {
        config.mount_command = mount_command;
    }
    if unmount_command.is_some() {
        config.unmount_command = unmount_command;
    }

    let mut service = service_from_config(&config)?;
    output.message(&format!(
        "Checking {} ({})...",
        path.display(),
        service.name()
    ));
    service
        .probe()
        .with_context(|| format!("Sync location {} is not usable", path.display()))?;

    config.sync_enabled = true;
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Sync location set to {}", path.display()));
    Ok(())
}

/// Forget the sync pairing and location
pub fn unlink(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    let mut state = SyncState::with_path(config.sync_state_path())?;
    state.unlink()?;

    config.sync_path = None;
    config.sync_enabled = false;
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success("Sync location removed. Notes are kept locally.");
    Ok(())
}
