//! Conflict resolution
//!
//! A conflict is a note that changed on both sides since the last session,
//! or was deleted on one side and changed on the other. The engine never
//! merges note text; a `ConflictResolver` decides which whole version
//! survives.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::manifest::RevisionId;
use crate::models::ContentHash;

/// One version of one note
#[derive(Debug, Clone, PartialEq)]
pub struct NoteSnapshot {
    pub id: Uuid,
    pub content_hash: ContentHash,
    /// Known for local notes only
    pub last_changed: Option<DateTime<Utc>>,
    /// Manifest revision, if the version has ever been published
    pub revision: Option<RevisionId>,
}

/// How a conflict is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Local version wins and is uploaded
    KeepLocal,
    /// Remote version wins and replaces the local one
    KeepRemote,
    /// Local version keeps the id; remote version becomes a new local note
    KeepBoth,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::KeepLocal => "keep-local",
            Resolution::KeepRemote => "keep-remote",
            Resolution::KeepBoth => "keep-both",
        };
        write!(f, "{}", s)
    }
}

/// A note that diverged on both sides
///
/// `None` on either side means the note is deleted there.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub id: Uuid,
    pub local: Option<NoteSnapshot>,
    pub remote: Option<NoteSnapshot>,
    pub resolution: Option<Resolution>,
}

impl Conflict {
    pub fn new(id: Uuid, local: Option<NoteSnapshot>, remote: Option<NoteSnapshot>) -> Self {
        Self {
            id,
            local,
            remote,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn deleted_locally(&self) -> bool {
        self.local.is_none()
    }

    pub fn deleted_remotely(&self) -> bool {
        self.remote.is_none()
    }
}

/// Decides the outcome of a conflict
pub trait ConflictResolver {
    /// Return `None` to defer, which aborts the session without changes
    fn resolve(&mut self, conflict: &Conflict) -> Option<Resolution>;
}

/// Resolver that applies one fixed resolution to every conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyResolver {
    resolution: Resolution,
}

impl PolicyResolver {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Default for PolicyResolver {
    fn default() -> Self {
        Self::new(Resolution::KeepRemote)
    }
}

impl ConflictResolver for PolicyResolver {
    fn resolve(&mut self, _conflict: &Conflict) -> Option<Resolution> {
        Some(self.resolution)
    }
}

/// Configured conflict handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    KeepRemote,
    KeepLocal,
    KeepBoth,
    /// Ask the user for every conflict
    Ask,
}

impl ConflictPolicy {
    /// Fixed resolution for this policy, `None` for `Ask`
    pub fn resolution(self) -> Option<Resolution> {
        match self {
            ConflictPolicy::KeepRemote => Some(Resolution::KeepRemote),
            ConflictPolicy::KeepLocal => Some(Resolution::KeepLocal),
            ConflictPolicy::KeepBoth => Some(Resolution::KeepBoth),
            ConflictPolicy::Ask => None,
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolution() {
            Some(resolution) => resolution.fmt(f),
            None => write!(f, "ask"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep-remote" | "remote" => Ok(ConflictPolicy::KeepRemote),
            "keep-local" | "local" => Ok(ConflictPolicy::KeepLocal),
            "keep-both" | "both" => Ok(ConflictPolicy::KeepBoth),
            "ask" => Ok(ConflictPolicy::Ask),
            _ => Err(format!(
                "unknown conflict policy '{}' (expected keep-remote, keep-local, keep-both or ask)",
                s
            )),
        }
    }
}
