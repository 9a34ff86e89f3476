//! Installs persistent per-session key bindings that dispatch into this
//! binary's hidden `internal` subcommand surface, so interactive use never
//! needs to type it directly.
//!
//! Grounded on the same pattern the multiplexer backend uses to inject a
//! per-window status format: read/derive the option value, then push it
//! back with `set-option`. Here the target is a key binding rather than a
//! format string, and re-running installation simply overwrites the prior
//! binding for the same chord instead of stacking duplicates.

use anyhow::Result;
use tracing::info;

use crate::multiplexer::Multiplexer;

struct Binding {
    chord: &'static str,
    subcommand: &'static str,
    description: &'static str,
}

const BINDINGS: &[Binding] = &[
    Binding { chord: "N", subcommand: "new-task", description: "create a new task" },
    Binding { chord: "X", subcommand: "cancel-task-ui", description: "cancel the current task" },
    Binding { chord: "E", subcommand: "end-task-ui", description: "end the current task" },
    Binding { chord: "L", subcommand: "toggle-log", description: "toggle the log viewer" },
    Binding { chord: "T", subcommand: "toggle-task-list", description: "toggle the task list" },
    Binding { chord: "G", subcommand: "toggle-git-status", description: "toggle the git status panel" },
    Binding { chord: "?", subcommand: "toggle-help", description: "toggle the help overlay" },
    Binding { chord: "M", subcommand: "merge-completed", description: "merge all completed tasks" },
];

/// Bind every known chord to a `run-shell` invocation of this binary's
/// `internal` subcommand with `session` substituted in. Idempotent.
pub fn install(mux: &dyn Multiplexer, session: &str) -> Result<()> {
    let exe = std::env::current_exe().unwrap_or_else(|_| "taw".into());
    for binding in BINDINGS {
        let shell_command = format!("{} internal {} '{}'", exe.display(), binding.subcommand, session);
        mux.bind_key(binding.chord, &shell_command)?;
        info!(chord = binding.chord, subcommand = binding.subcommand, "installed key binding");
    }
    Ok(())
}

pub fn describe() -> Vec<(&'static str, &'static str)> {
    BINDINGS.iter().map(|b| (b.chord, b.description)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_have_unique_chords() {
        let mut chords: Vec<&str> = BINDINGS.iter().map(|b| b.chord).collect();
        chords.sort_unstable();
        chords.dedup();
        assert_eq!(chords.len(), BINDINGS.len());
    }

    #[test]
    fn describe_matches_binding_count() {
        assert_eq!(describe().len(), BINDINGS.len());
    }
}
