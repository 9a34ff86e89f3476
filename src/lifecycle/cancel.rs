//! Cancels a task: if it was already merged, reverts the merge commit
//! before cleaning up. Never runs the auto-merge path.

use std::path::Path;

use anyhow::Result;
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::errors::TaskError;
use crate::manager::TaskManager;
use crate::multiplexer::Multiplexer;
use crate::notify::Notifier;

use super::save_history;

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
    if is_vcs {
        let main = manager.vcs.main_branch()?;
        if manager.vcs.branch_merged(&task.name, &main).unwrap_or(false) {
            let project_dir = &manager.repo_root;
            match manager.vcs.find_merge_commit(project_dir, &task.name, &main)? {
                Some(merge_commit) => {
                    if let Err(e) = manager.vcs.revert_commit(project_dir, &merge_commit, Some(1)) {
                        warn!(task = %task.name, error = %e, "revert of merge commit conflicted");
                        let _ = manager.vcs.revert_abort(project_dir);
                        let warning_name = format!(
                            "{}{}{}",
                            manager.config.window_prefix,
                            manager.config.status_icons.warning,
                            crate::manager::window_token(&task.name, manager.config.window_name_limit)
                        );
                        let _ = mux.rename_window(window_id, &warning_name);
                        return Ok(());
                    }
                    if let Err(e) = manager.vcs.push(project_dir, "origin", &main, false) {
                        warn!(task = %task.name, error = %e, "failed to push revert commit");
                    }
                }
                None => warn!(task = %task.name, "branch appears merged but no merge commit was found"),
            }
        }
    }

    let capture = crate::multiplexer::clean_capture(&match pane_capture_file {
        Some(path) => std::fs::read_to_string(path).unwrap_or_default(),
        None => mux.capture_pane(window_id, 500).unwrap_or_default(),
    });
    let summary = agent.generate_summary(&capture);
    let content = task.content().unwrap_or_default();
    if let Err(e) = save_history(&manager.state_dir, &task.name, &content, &summary, &capture, "Cancelled") {
        warn!(task = %task.name, error = %e, "failed to save history record");
    }

    notifier.play_sound("done");
    manager.cleanup_task(&task, false)?;
    let _ = mux.kill_window(window_id);

    info!(task = %task.name, "task cancelled");
    Ok(())
}
