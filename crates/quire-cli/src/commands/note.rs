//! Note command handlers

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use quire_core::{FileNoteStore, Note, NoteStore};

use crate::editor::{confirm, edit_note};
use crate::output::{truncate, Output};

/// Create a new note
pub fn add(
    store: &mut FileNoteStore,
    title: String,
    body: Option<String>,
    output: &Output,
) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Note title cannot be empty");
    }

    let mut note = Note::new(title.trim());
    match body {
        Some(body) => note.set_body(body),
        None => {
            if let Some(edited) = edit_note(&note).context("Failed to edit note")? {
                note = edited;
            }
        }
    }
    store.save_note(&note).context("Failed to save note")?;

    output.success(&format!("Added note {}", &note.id.to_string()[..8]));
    Ok(())
}

/// List all notes
pub fn list(store: &FileNoteStore, output: &Output) -> Result<()> {
    let notes = store.get_all_notes()?;
    output.print_notes(&notes);
    Ok(())
}

/// Show a single note
pub fn show(store: &FileNoteStore, id: String, output: &Output) -> Result<()> {
    let uuid = parse_note_id(&id, store)?;
    let note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    output.print_note(&note);
    Ok(())
}

/// Edit a note's title and/or body
///
/// Opens the editor on the whole note when neither is given.
pub fn edit(
    store: &mut FileNoteStore,
    id: String,
    title: Option<String>,
    body: Option<String>,
    output: &Output,
) -> Result<()> {
    let uuid = parse_note_id(&id, store)?;
    let mut note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    if title.is_none() && body.is_none() {
        let Some(edited) = edit_note(&note).context("Failed to edit note")? else {
            output.message("No changes.");
            return Ok(());
        };
        note = edited;
    } else {
        if let Some(title) = title {
            note.set_title(title);
        }
        if let Some(body) = body {
            note.set_body(body);
        }
    }

    store.save_note(&note).context("Failed to save note")?;
    output.success(&format!("Updated note {}", &uuid.to_string()[..8]));
    Ok(())
}

/// Delete a note
pub fn delete(store: &mut FileNoteStore, id: String, output: &Output) -> Result<()> {
    let uuid = parse_note_id(&id, store)?;
    let note = store
        .get_note(uuid)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    // Confirm deletion
    if output.should_prompt() {
        println!("Delete note: {} - {}", &uuid.to_string()[..8], note.title);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete(uuid).context("Failed to delete note")?;
    output.success(&format!("Deleted note: {}", uuid));
    Ok(())
}

/// Parse a note ID (supports full UUID or prefix)
fn parse_note_id(id: &str, store: &FileNoteStore) -> Result<Uuid> {
    // Try full UUID first
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }

    // Try prefix match
    let notes = store.get_all_notes()?;
    let matches: Vec<_> = notes
        .iter()
        .filter(|n| n.id.to_string().starts_with(id))
        .collect();

    match matches.len() {
        0 => bail!("No note found matching: {}", id),
        1 => Ok(matches[0].id),
        _ => {
            eprintln!("Multiple notes match '{}':", id);
            for note in &matches {
                eprintln!("  {} - {}", note.id, truncate(&note.title, 40));
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
