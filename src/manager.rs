//! Task creation, lookup, worktree setup, cleanup, and discovery queries.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::config::Config;
use crate::multiplexer::Multiplexer;
use crate::store::{Status, Task};
use crate::vcs::Vcs;

pub struct TaskManager {
    pub state_dir: PathBuf,
    pub repo_root: PathBuf,
    pub config: Config,
    pub vcs: Arc<dyn Vcs>,
}

impl TaskManager {
    pub fn new(state_dir: PathBuf, repo_root: PathBuf, config: Config, vcs: Arc<dyn Vcs>) -> Self {
        Self { state_dir, repo_root, config, vcs }
    }

    fn agents_dir(&self) -> PathBuf {
        self.state_dir.join("agents")
    }

    pub fn task(&self, name: &str) -> Task {
        Task::new(&self.state_dir, name)
    }

    /// Create a new task directory for `content`, naming it via the agent
    /// client when possible and falling back to a pid-derived name.
    pub fn create_task(&self, content: &str, agent: &AgentClient) -> Result<Task> {
        let base = agent
            .generate_task_name(content)
            .unwrap_or_else(|| format!("task-{}", std::process::id()));

        fs::create_dir_all(self.agents_dir())?;

        for i in 0..=100u32 {
            let candidate = if i == 0 { base.clone() } else { format!("{base}-{i}") };
            if self.vcs.branch_exists(&candidate).unwrap_or(false) {
                continue;
            }
            match fs::create_dir(self.agents_dir().join(&candidate)) {
                Ok(()) => {
                    let task = self.task(&candidate);
                    task.write_content(content)?;
                    info!(task = %candidate, "created task");
                    return Ok(task);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).context("failed to create task directory"),
            }
        }
        anyhow::bail!("exhausted naming attempts for base name '{base}'")
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let dir = self.agents_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                tasks.push(self.task(name));
            }
        }
        Ok(tasks)
    }

    pub fn find_by_window_id(&self, window_id: &str) -> Result<Option<Task>> {
        Ok(self
            .list_tasks()?
            .into_iter()
            .find(|t| t.window_id().as_deref() == Some(window_id)))
    }

    /// Match a task whose name, truncated to the window-name limit, equals
    /// the token embedded in a window name (the suffix after the status
    /// emoji).
    pub fn find_by_truncated_name(&self, token: &str) -> Result<Option<Task>> {
        Ok(self
            .list_tasks()?
            .into_iter()
            .find(|t| window_token(&t.name, self.config.window_name_limit) == token))
    }

    fn config_symlink_source(&self) -> PathBuf {
        self.repo_root.join(".taw-agent-config")
    }

    /// Stand up an isolated worktree for a task: stash-snapshot the project
    /// tree, create the worktree off a new branch, re-apply the stash into
    /// it, copy over untracked files, and symlink in the shared agent
    /// config directory.
    pub fn setup_worktree(&self, task: &Task) -> Result<PathBuf> {
        let worktree = task.worktree_dir();
        let base = self.vcs.main_branch().ok();

        let stash_msg = format!("taw: snapshot before starting {}", task.name);
        let stashed = self
            .vcs
            .stash_push(&self.repo_root, &stash_msg, true)
            .unwrap_or(false);

        let untracked = self.vcs.untracked_files(&self.repo_root).unwrap_or_default();

        self.vcs
            .create_worktree(&worktree, &task.name, true, base.as_deref())
            .context("failed to create worktree")?;

        if stashed
            && let Err(e) = self.vcs.stash_pop(&worktree)
        {
            warn!(task = %task.name, error = %e, "failed to reapply stash into worktree");
        }

        for rel in &untracked {
            let src = self.repo_root.join(rel);
            let dst = worktree.join(rel);
            if let Some(parent) = dst.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = fs::copy(&src, &dst) {
                warn!(task = %task.name, file = %rel.display(), error = %e, "failed to copy untracked file into worktree");
            }
        }

        if self.config_symlink_source().exists() {
            let link = task.dir.join(".config");
            let _ = fs::remove_file(&link);
            #[cfg(unix)]
            {
                let _ = std::os::unix::fs::symlink(self.config_symlink_source(), &link);
            }
        }

        if let Some(hook) = &self.config.pre_worktree_hook {
            let status = std::process::Command::new("bash").arg("-c").arg(hook).current_dir(&worktree).status();
            if let Err(e) = status {
                warn!(task = %task.name, error = %e, "pre_worktree_hook failed to run");
            }
        }

        Ok(worktree)
    }

    pub fn working_dir(&self, task: &Task) -> PathBuf {
        let worktree = task.worktree_dir();
        if worktree.is_dir() { worktree } else { self.repo_root.clone() }
    }

    /// Remove a task's worktree, branch, and directory. Best-effort beyond
    /// directory removal: a failed worktree remove falls back to a plain
    /// `rm -rf` followed by `worktree prune`.
    pub fn cleanup_task(&self, task: &Task, keep_branch: bool) -> Result<()> {
        let worktree = task.worktree_dir();
        if worktree.is_dir() {
            if let Err(e) = self.vcs.remove_worktree(&worktree, true) {
                warn!(task = %task.name, error = %e, "worktree remove failed, falling back to rm -rf");
                let _ = fs::remove_dir_all(&worktree);
            }
            if let Ok(common_dir) = self.vcs.common_dir() {
                let _ = self.vcs.prune_worktrees(&common_dir);
            }
        }

        if !keep_branch && self.vcs.branch_exists(&task.name).unwrap_or(false) {
            let _ = self.vcs.delete_branch(&task.name, true);
        }

        fs::remove_dir_all(&task.dir).with_context(|| format!("failed to remove task directory for {}", task.name))
    }

    /// Tasks whose window has disappeared but whose tab-lock or worktree
    /// still exists, excluding tasks whose branch is already merged.
    pub fn find_incomplete(&self, mux: &dyn Multiplexer) -> Result<Vec<Task>> {
        let windows = mux.list_windows()?;
        let live_ids: std::collections::HashSet<&str> = windows.iter().map(|(id, _)| id.as_str()).collect();
        let main = self.vcs.main_branch().ok();

        Ok(self
            .list_tasks()?
            .into_iter()
            .filter(|t| {
                let window_gone = t.window_id().map(|id| !live_ids.contains(id.as_str())).unwrap_or(true);
                let has_state = t.has_tab_lock() || t.worktree_dir().is_dir();
                let merged = main
                    .as_deref()
                    .map(|m| self.vcs.branch_merged(&t.name, m).unwrap_or(false))
                    .unwrap_or(false);
                window_gone && has_state && !merged
            })
            .collect())
    }

    /// Windows whose agent pane shows a bare shell (the agent exited).
    pub fn find_stopped(&self, mux: &dyn Multiplexer, agent: &AgentClient) -> Result<Vec<Task>> {
        let mut stopped = Vec::new();
        for task in self.list_tasks()? {
            if let Some(window_id) = task.window_id()
                && mux.has_window(&window_id).unwrap_or(false)
                && !agent.is_agent_running(mux, &window_id)
            {
                stopped.push(task);
            }
        }
        Ok(stopped)
    }

    /// Windows whose embedded task token has no backing agent directory.
    pub fn find_orphaned_windows(&self, mux: &dyn Multiplexer) -> Result<Vec<(String, String)>> {
        let tasks: Vec<String> = self.list_tasks()?.into_iter().map(|t| t.name).collect();
        Ok(mux
            .list_windows()?
            .into_iter()
            .filter(|(_, name)| {
                let token = strip_status_prefix(name);
                !tasks.iter().any(|t| window_token(t, self.config.window_name_limit) == token)
            })
            .collect())
    }

    /// Tasks whose branch is merged into main, or whose branch+worktree
    /// were both externally removed, or whose PR has merged.
    pub fn find_merged(&self) -> Result<Vec<Task>> {
        let main = self.vcs.main_branch()?;
        Ok(self
            .list_tasks()?
            .into_iter()
            .filter(|t| {
                let branch_merged = self.vcs.branch_merged(&t.name, &main).unwrap_or(false);
                let externally_gone =
                    !self.vcs.branch_exists(&t.name).unwrap_or(true) && !t.worktree_dir().is_dir();
                branch_merged || externally_gone
            })
            .collect())
    }
}

/// The task-name portion of a window name, truncated to `limit` characters.
pub fn window_token(name: &str, limit: usize) -> String {
    name.chars().take(limit).collect()
}

/// `<emoji><truncated-task-token>`.
pub fn window_name(config: &Config, status: Status, task_name: &str) -> String {
    let icon = status_icon(config, status);
    format!("{}{}{}", config.window_prefix, icon, window_token(task_name, config.window_name_limit))
}

pub fn status_icon(config: &Config, status: Status) -> &str {
    match status {
        Status::Working => &config.status_icons.working,
        // corrupted displays as waiting; it is tracked distinctly in `.status`
        Status::Waiting | Status::Corrupted => &config.status_icons.waiting,
        Status::Done => &config.status_icons.done,
        Status::Pending => &config.status_icons.new,
    }
}

/// Strip a leading prefix + one of the known status icons from a window
/// name, returning the embedded task token.
pub fn strip_status_prefix(window_name: &str) -> String {
    window_name
        .chars()
        .skip_while(|c| !c.is_ascii_alphanumeric() && *c != '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_token_truncates() {
        assert_eq!(window_token("a-very-long-task-name-here", 10), "a-very-lon");
    }

    #[test]
    fn window_name_embeds_status_icon() {
        let config = Config::default();
        let name = window_name(&config, Status::Working, "fix-login-bug");
        assert!(name.contains(&config.status_icons.working));
        assert!(name.ends_with("fix-login-bug"));
    }

    #[test]
    fn strip_status_prefix_recovers_token() {
        let config = Config::default();
        let full = window_name(&config, Status::Waiting, "add-retry-logic");
        assert_eq!(strip_status_prefix(&full), "add-retry-logic");
    }
}
