//! Editing notes in the user's editor
//!
//! A note is handed to the editor in its stored layout (title line, blank
//! line, body), so what the user edits is exactly what gets saved and synced.

use std::env;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

use quire_core::Note;

/// Open `note` in the editor and return the edited version
///
/// Returns `None` when the user saved without changing anything.
pub fn edit_note(note: &Note) -> Result<Option<Note>> {
    let path = env::temp_dir().join(format!("quire-{}.note", note.id));
    fs::write(&path, note.to_content())
        .with_context(|| format!("Failed to create temp file: {:?}", path))?;

    let edited = run_editor(&path).and_then(|()| {
        fs::read(&path).with_context(|| format!("Failed to read edited file: {:?}", path))
    });
    let _ = fs::remove_file(&path);

    apply_edit(note, &edited?)
}

/// Parse edited note text against the original
fn apply_edit(original: &Note, edited: &[u8]) -> Result<Option<Note>> {
    let text = std::str::from_utf8(edited).context("Edited note is not valid UTF-8")?;
    let Some(parsed) = Note::from_content(original.id, text.trim_end().as_bytes(), original.updated_at)
    else {
        bail!("Edited note is not valid text");
    };

    let title = parsed.title.trim();
    if title.is_empty() {
        bail!("Note title cannot be empty");
    }
    if title == original.title && parsed.body == original.body {
        return Ok(None);
    }

    let mut note = original.clone();
    note.set_title(title);
    note.set_body(parsed.body);
    Ok(Some(note))
}

fn run_editor(path: &Path) -> Result<()> {
    let editor = find_editor()?;
    // Allow editors configured with flags, such as "code --wait"
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("Editor command is empty");
    };

    let status = Command::new(program)
        .args(parts)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to run editor: {}", editor))?;

    if !status.success() {
        bail!(
            "Editor '{}' exited with {}. Check that your editor is configured correctly.",
            editor,
            status
        );
    }
    Ok(())
}

/// Find the user's preferred editor
fn find_editor() -> Result<String> {
    for var in ["VISUAL", "EDITOR"] {
        if let Ok(editor) = env::var(var) {
            if !editor.trim().is_empty() {
                return Ok(editor);
            }
        }
    }

    for editor in ["nano", "vim", "vi", "notepad"] {
        if find_in_path(editor).is_some() {
            return Ok(editor.to_string());
        }
    }

    bail!(
        "No editor found. Set $EDITOR environment variable.\n\
         Example: export EDITOR=nano"
    )
}

/// Locate an executable on PATH
fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{}.exe", program));
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

/// Prompt for confirmation on the terminal
///
/// Without a TTY on stdin the answer is always no.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    confirm_with(prompt, &mut io::stdin().lock(), &mut io::stdout())
}

fn confirm_with(prompt: &str, input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    write!(output, "{} [y/N] ", prompt)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;

    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn note(title: &str, body: &str) -> Note {
        let mut note = Note::new(title);
        note.set_body(body);
        note
    }

    #[test]
    fn test_apply_edit_changes_title_and_body() {
        let original = note("Groceries", "eggs");

        let edited = apply_edit(&original, b"  Shopping  \n\neggs\nmilk\n\n")
            .unwrap()
            .unwrap();
        assert_eq!(edited.id, original.id);
        assert_eq!(edited.title, "Shopping");
        assert_eq!(edited.body, "eggs\nmilk");
    }

    #[test]
    fn test_apply_edit_unchanged() {
        let original = note("Groceries", "eggs");
        let content = original.to_content();
        assert!(apply_edit(&original, &content).unwrap().is_none());
    }

    #[test]
    fn test_apply_edit_rejects_empty_title() {
        let original = note("Groceries", "eggs");
        assert!(apply_edit(&original, b"\n\nbody only").is_err());
        assert!(apply_edit(&original, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_confirm_answers() {
        let mut out = Vec::new();
        assert!(confirm_with("Delete?", &mut Cursor::new("y\n"), &mut out).unwrap());
        assert!(confirm_with("Delete?", &mut Cursor::new("YES\n"), &mut out).unwrap());
        assert!(!confirm_with("Delete?", &mut Cursor::new("\n"), &mut out).unwrap());
        assert!(!confirm_with("Delete?", &mut Cursor::new(""), &mut out).unwrap());
        assert!(String::from_utf8(out).unwrap().starts_with("Delete? [y/N] "));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely_not_a_real_command_12345").is_none());
    }
}
