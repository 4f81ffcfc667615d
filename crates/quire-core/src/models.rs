//! Data models for Quire
//!
//! Defines the note model and the content hash used to detect edits.
//! The sync engine only ever sees note bytes, their hash and a timestamp;
//! the title/body split lives here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Suffix appended to the title of a note created to keep both sides of a conflict
pub const CONFLICT_COPY_SUFFIX: &str = " (conflict copy)";

/// SHA-256 of a note's content, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash note content
    pub fn of(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A text note
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    /// Unique identifier
    pub id: Uuid,
    /// Note title
    pub title: String,
    /// Note body content
    pub body: String,
    /// When this note was last changed on disk
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Create a new note with the given title
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), title)
    }

    /// Create a note with a specific ID (for loading from storage)
    pub fn with_id(id: Uuid, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: String::new(),
            updated_at: Utc::now(),
        }
    }

    /// Update the title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.updated_at = Utc::now();
    }

    /// Update the body
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
        self.updated_at = Utc::now();
    }

    /// Serialize to the on-disk format: title line, blank line, body
    pub fn to_content(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.title.len() + self.body.len() + 2);
        out.push_str(self.title.lines().next().unwrap_or(""));
        out.push_str("\n\n");
        out.push_str(&self.body);
        out.into_bytes()
    }

    /// Parse note content read from a store
    ///
    /// Returns `None` if the content is not valid UTF-8.
    pub fn from_content(id: Uuid, content: &[u8], updated_at: DateTime<Utc>) -> Option<Self> {
        let text = std::str::from_utf8(content).ok()?;
        let (title, body) = match text.split_once('\n') {
            Some((title, rest)) => (title, rest.strip_prefix('\n').unwrap_or(rest)),
            None => (text, ""),
        };
        Some(Self {
            id,
            title: title.to_string(),
            body: body.to_string(),
            updated_at,
        })
    }

    /// Hash of this note's serialized content
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of(&self.to_content())
    }
}

/// Rewrite note content so its title carries the conflict-copy suffix
///
/// Content that is not UTF-8 is returned unchanged.
pub fn conflict_copy_content(content: &[u8]) -> Vec<u8> {
    let Some(mut note) = Note::from_content(Uuid::nil(), content, Utc::now()) else {
        return content.to_vec();
    };
    note.title.push_str(CONFLICT_COPY_SUFFIX);
    note.to_content()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_roundtrip() {
        let mut note = Note::new("Groceries");
        note.set_body("eggs\nmilk\n");

        let parsed = Note::from_content(note.id, &note.to_content(), note.updated_at).unwrap();
        assert_eq!(parsed.title, "Groceries");
        assert_eq!(parsed.body, "eggs\nmilk\n");
    }

    #[test]
    fn test_title_only_content() {
        let note = Note::from_content(Uuid::new_v4(), b"Just a title", Utc::now()).unwrap();
        assert_eq!(note.title, "Just a title");
        assert!(note.body.is_empty());
    }

    #[test]
    fn test_multiline_title_is_truncated() {
        let note = Note::new("first\nsecond");
        let content = String::from_utf8(note.to_content()).unwrap();
        assert!(content.starts_with("first\n\n"));
    }

    #[test]
    fn test_hash_changes_with_body() {
        let mut note = Note::new("Title");
        let before = note.content_hash();
        note.set_body("changed");
        assert_ne!(before, note.content_hash());
        assert_eq!(before.as_str().len(), 64);
        assert_eq!(before.short().len(), 8);
    }

    #[test]
    fn test_conflict_copy_content() {
        let mut note = Note::new("Plans");
        note.set_body("remote body");

        let copy = conflict_copy_content(&note.to_content());
        let parsed = Note::from_content(Uuid::new_v4(), &copy, Utc::now()).unwrap();
        assert_eq!(parsed.title, "Plans (conflict copy)");
        assert_eq!(parsed.body, "remote body");
    }

    #[test]
    fn test_conflict_copy_of_binary_is_unchanged() {
        let bytes = vec![0xff, 0xfe, 0x00];
        assert_eq!(conflict_copy_content(&bytes), bytes);
    }
}
