//! Commits, pushes, optionally squash-merges, records history, and cleans
//! up a finished task.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::errors::TaskError;
use crate::manager::TaskManager;
use crate::multiplexer::Multiplexer;
use crate::notify::Notifier;

use super::{MergeLock, save_history};

pub fn run(
    manager: &TaskManager,
    mux: &dyn Multiplexer,
    agent: &AgentClient,
    notifier: &Notifier,
    window_id: &str,
    pane_capture_file: Option<&Path>,
) -> Result<()> {
    let task = manager
        .find_by_window_id(window_id)?
        .ok_or_else(|| TaskError::NotFound(window_id.to_string()))?;

    let is_vcs = manager.vcs.is_repo().unwrap_or(false);
    let worktree = task.worktree_dir();

    if is_vcs && worktree.is_dir() {
        if manager.vcs.has_uncommitted_changes(&worktree).unwrap_or(false) {
            manager.vcs.add_all(&worktree)?;
            let stat = manager.vcs.diff_stat(&worktree, "HEAD").unwrap_or_default();
            manager
                .vcs
                .commit(&worktree, &format!("chore: auto-commit on task end\n\n{stat}"))?;
        }
        if let Err(e) = manager.vcs.push(&worktree, "origin", &task.name, true) {
            warn!(task = %task.name, error = %e, "failed to push task branch");
        }
    }

    if is_vcs && manager.config.auto_merge {
        match attempt_auto_merge(manager, mux, &task) {
            Ok(true) => {}
            Ok(false) => {
                // merge_squash itself failed; window already renamed to a warning
                // state inside attempt_auto_merge. Leave everything in place.
                return Ok(());
            }
            Err(e) => {
                warn!(task = %task.name, error = %e, "auto-merge step failed before squash");
            }
        }
    }

    let capture = crate::multiplexer::clean_capture(&match pane_capture_file {
        Some(path) => std::fs::read_to_string(path).unwrap_or_default(),
        None => mux.capture_pane(window_id, 500).unwrap_or_default(),
    });
    let summary = agent.generate_summary(&capture);
    let content = task.content().unwrap_or_default();
    if let Err(e) = save_history(&manager.state_dir, &task.name, &content, &summary, &capture, "Completed") {
        warn!(task = %task.name, error = %e, "failed to save history record");
    }

    notifier.play_sound("done");
    let _ = mux.display_message(window_id, &format!("taw: {} done", task.name));

    manager.cleanup_task(&task, false)?;
    let _ = mux.kill_window(window_id);

    info!(task = %task.name, "task ended");
    Ok(())
}

/// Returns `Ok(true)` on a clean merge (or nothing to merge), `Ok(false)` if
/// the squash merge itself failed and the window was left in a warning
/// state for manual resolution.
fn attempt_auto_merge(manager: &TaskManager, mux: &dyn Multiplexer, task: &crate::store::Task) -> Result<bool> {
    let _lock = MergeLock::acquire(
        &manager.state_dir,
        &task.name,
        Duration::from_secs(manager.config.merge_lock_timeout_secs),
        Duration::from_secs(manager.config.merge_lock_retry_interval_secs),
    )
    .context("failed to acquire merge lock")?;

    let project_dir = &manager.repo_root;
    let stashed = manager.vcs.stash_push(project_dir, "taw: snapshot before merge", true).unwrap_or(false);
    let original_branch = manager.vcs.current_branch().ok();
    let main = manager.vcs.main_branch()?;

    let merge_result = (|| -> Result<()> {
        manager.vcs.fetch(project_dir, "origin")?;
        manager.vcs.checkout(project_dir, &main)?;
        manager.vcs.pull(project_dir)?;
        manager
            .vcs
            .merge_squash(project_dir, &task.name, &format!("feat: {}", task.name))?;
        Ok(())
    })();

    if let Err(e) = merge_result {
        warn!(task = %task.name, error = %e, "auto-merge failed");
        let _ = manager.vcs.merge_abort(project_dir);
        if let Some(window_id) = task.window_id() {
            let warning_name = window_name_with_icon(manager, &manager.config.status_icons.warning, &task.name);
            let _ = mux.rename_window(&window_id, &warning_name);
        }
        return Ok(false);
    }

    if let Err(e) = manager.vcs.push(project_dir, "origin", &main, false) {
        warn!(task = %task.name, error = %e, "failed to push merged main branch");
    }
    if let Some(branch) = original_branch
        && branch != main
    {
        let _ = manager.vcs.checkout(project_dir, &branch);
    }
    if stashed {
        let _ = manager.vcs.stash_pop(project_dir);
    }

    Ok(true)
}

fn window_name_with_icon(manager: &TaskManager, icon: &str, task_name: &str) -> String {
    format!("{}{}{}", manager.config.window_prefix, icon, crate::manager::window_token(task_name, manager.config.window_name_limit))
}
