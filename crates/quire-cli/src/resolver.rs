//! Interactive conflict resolution
//!
//! Asks the user about each conflict on a terminal. Reading and writing go
//! through generic streams so the prompt can be driven from tests.

use std::io::{BufRead, Write};

use quire_core::sync::{CancelFlag, Conflict, ConflictResolver, NoteSnapshot, Resolution};

/// Resolver that prompts for every conflict
///
/// End of input, a read error, `c`, or a raised cancel flag all defer the
/// conflict, which aborts the session.
pub struct InteractiveResolver<R: BufRead, W: Write> {
    input: R,
    output: W,
    cancel: Option<CancelFlag>,
}

impl<R: BufRead, W: Write> InteractiveResolver<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            cancel: None,
        }
    }

    /// Stop prompting once `cancel` is raised
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn describe(&mut self, conflict: &Conflict) -> std::io::Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "Conflict on note {}", conflict.id)?;
        writeln!(self.output, "  local:  {}", side(conflict.local.as_ref()))?;
        writeln!(self.output, "  remote: {}", side(conflict.remote.as_ref()))?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> ConflictResolver for InteractiveResolver<R, W> {
    fn resolve(&mut self, conflict: &Conflict) -> Option<Resolution> {
        if self.cancelled() {
            return None;
        }
        self.describe(conflict).ok()?;

        loop {
            write!(self.output, "Keep [l]ocal, [r]emote, [b]oth, or [c]ancel? ").ok()?;
            self.output.flush().ok()?;

            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
            if self.cancelled() {
                return None;
            }

            match line.trim().to_lowercase().as_str() {
                "l" | "local" => return Some(Resolution::KeepLocal),
                "r" | "remote" => return Some(Resolution::KeepRemote),
                "b" | "both" => return Some(Resolution::KeepBoth),
                "c" | "cancel" => return None,
                _ => {
                    writeln!(self.output, "Please answer l, r, b or c.").ok()?;
                }
            }
        }
    }
}

fn side(snapshot: Option<&NoteSnapshot>) -> String {
    let Some(snapshot) = snapshot else {
        return "deleted".to_string();
    };
    let mut parts = vec![format!("content {}", snapshot.content_hash.short())];
    if let Some(revision) = snapshot.revision {
        parts.push(format!("revision {}", revision));
    }
    if let Some(changed) = snapshot.last_changed {
        parts.push(format!("changed {}", changed.format("%Y-%m-%d %H:%M")));
    }
    parts.join(", ")
}
