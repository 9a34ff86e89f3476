//! On-disk representation of a task: directories, atomic files, the
//! tab-lock binding barrier, and status transitions.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Working,
    Waiting,
    Done,
    Corrupted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Working => "working",
            Status::Waiting => "waiting",
            Status::Done => "done",
            Status::Corrupted => "corrupted",
        }
    }

    /// Whether transitioning from `self` to `next` is one of the allowed
    /// edges in the task status machine. Violations are logged, not refused:
    /// the write still happens, since the invalid-transition signal only
    /// matters for diagnostics.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Pending, Working | Waiting | Done | Corrupted)
                | (Working, Waiting | Done | Corrupted)
                | (Waiting, Working | Done | Corrupted)
                | (Corrupted, Working)
                | (Done, Working | Waiting)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(Status::Pending),
            "working" => Ok(Status::Working),
            "waiting" => Ok(Status::Waiting),
            "done" => Ok(Status::Done),
            "corrupted" => Ok(Status::Corrupted),
            _ => Err(()),
        }
    }
}

/// Write `contents` to `path` atomically: write to a sibling temp file,
/// then rename over the destination. Tolerates concurrent readers seeing
/// either the old or the new content, never a partial write.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist atomic write to {}", path.display()))?;
    Ok(())
}

pub fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// A task's on-disk state, rooted at `<state_dir>/agents/<name>/`.
pub struct Task {
    pub name: String,
    pub dir: PathBuf,
}

impl Task {
    pub fn new(state_dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            dir: state_dir.join("agents").join(name),
        }
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn content(&self) -> Option<String> {
        read_trimmed(&self.dir.join("task"))
    }

    pub fn write_content(&self, content: &str) -> Result<()> {
        write_atomic(&self.dir.join("task"), content)
    }

    pub fn status(&self) -> Status {
        self.reconcile_status_signal();
        read_trimmed(&self.dir.join(".status"))
            .and_then(|s| Status::from_str(&s).ok())
            .unwrap_or(Status::Pending)
    }

    pub fn set_status(&self, next: Status) -> Result<()> {
        let current = self.status();
        if !current.can_transition_to(next) && current != next {
            warn!(task = %self.name, from = %current, to = %next, "unusual status transition");
        }
        write_atomic(&self.dir.join(".status"), next.as_str())
    }

    /// Reconcile an agent-written `.status-signal` hint into `.status`,
    /// then delete the signal. Invalid signal contents are dropped silently.
    fn reconcile_status_signal(&self) {
        let signal_path = self.dir.join(".status-signal");
        if let Some(raw) = read_trimmed(&signal_path) {
            if let Ok(status) = Status::from_str(&raw) {
                let _ = write_atomic(&self.dir.join(".status"), status.as_str());
            }
            let _ = fs::remove_file(&signal_path);
        }
    }

    pub fn tab_lock_dir(&self) -> PathBuf {
        self.dir.join(".tab-lock")
    }

    pub fn has_tab_lock(&self) -> bool {
        self.tab_lock_dir().is_dir()
    }

    /// Atomically bind this task to a window: the first process whose
    /// `mkdir` of `.tab-lock` succeeds wins. Returns false if another
    /// process already holds the binding.
    pub fn create_tab_lock(&self) -> bool {
        match fs::create_dir(self.tab_lock_dir()) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => {
                warn!(task = %self.name, error = %e, "failed to create tab-lock directory");
                false
            }
        }
    }

    pub fn remove_tab_lock(&self) -> Result<()> {
        let dir = self.tab_lock_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn window_id(&self) -> Option<String> {
        read_trimmed(&self.tab_lock_dir().join("window_id"))
    }

    pub fn save_window_id(&self, window_id: &str) -> Result<()> {
        write_atomic(&self.tab_lock_dir().join("window_id"), window_id)
    }

    pub fn session_started(&self) -> bool {
        self.dir.join(".session-started").exists()
    }

    pub fn mark_session_started(&self) -> Result<()> {
        write_atomic(
            &self.dir.join(".session-started"),
            &std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs().to_string())
                .unwrap_or_default(),
        )
    }

    pub fn pr_number(&self) -> Option<String> {
        read_trimmed(&self.dir.join(".pr"))
    }

    pub fn set_pr_number(&self, pr: &str) -> Result<()> {
        write_atomic(&self.dir.join(".pr"), pr)
    }

    pub fn worktree_dir(&self) -> PathBuf {
        self.dir.join("worktree")
    }

    pub fn system_prompt_path(&self) -> PathBuf {
        self.dir.join(".system-prompt")
    }

    pub fn user_prompt_path(&self) -> PathBuf {
        self.dir.join(".user-prompt")
    }

    pub fn end_task_script_path(&self) -> PathBuf {
        self.dir.join("end-task")
    }

    pub fn start_agent_script_path(&self) -> PathBuf {
        self.dir.join("start-agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_display_and_parse() {
        for s in [Status::Pending, Status::Working, Status::Waiting, Status::Done, Status::Corrupted] {
            assert_eq!(Status::from_str(s.as_str()), Ok(s));
        }
    }

    #[test]
    fn unknown_status_string_decays_to_pending() {
        assert_eq!(Status::from_str("bogus"), Err(()));
    }

    #[test]
    fn allowed_transitions() {
        assert!(Status::Pending.can_transition_to(Status::Working));
        assert!(Status::Working.can_transition_to(Status::Waiting));
        assert!(Status::Waiting.can_transition_to(Status::Working));
        assert!(Status::Corrupted.can_transition_to(Status::Working));
        assert!(Status::Done.can_transition_to(Status::Working));
    }

    #[test]
    fn disallowed_transitions() {
        assert!(!Status::Done.can_transition_to(Status::Corrupted));
        assert!(!Status::Corrupted.can_transition_to(Status::Done));
    }

    #[test]
    fn tab_lock_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let task = Task::new(tmp.path(), "my-task");
        fs::create_dir_all(&task.dir).unwrap();
        assert!(task.create_tab_lock());
        assert!(!task.create_tab_lock());
    }

    #[test]
    fn window_id_persists_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let task = Task::new(tmp.path(), "my-task");
        fs::create_dir_all(task.tab_lock_dir()).unwrap();
        task.save_window_id("@3").unwrap();
        assert_eq!(task.window_id().as_deref(), Some("@3"));
    }

    #[test]
    fn status_signal_is_reconciled_and_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let task = Task::new(tmp.path(), "my-task");
        fs::create_dir_all(&task.dir).unwrap();
        write_atomic(&task.dir.join(".status-signal"), "waiting").unwrap();
        assert_eq!(task.status(), Status::Waiting);
        assert!(!task.dir.join(".status-signal").exists());
    }
}
