//! Detects and repairs worktrees whose on-disk state has drifted from what
//! the VCS thinks it owns.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::manager::TaskManager;
use crate::store::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeStatus {
    Healthy,
    MissingWorktree,
    NotInGit,
    InvalidGit,
    MissingBranch,
}

impl WorktreeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorktreeStatus::Healthy => "",
            WorktreeStatus::MissingWorktree => "missing_worktree",
            WorktreeStatus::NotInGit => "not_in_git",
            WorktreeStatus::InvalidGit => "invalid_git",
            WorktreeStatus::MissingBranch => "missing_branch",
        }
    }
}

/// Classify a task's worktree against what the VCS actually lists.
pub fn check_worktree_status(manager: &TaskManager, task: &Task) -> Result<WorktreeStatus> {
    let worktree = task.worktree_dir();
    let branch_exists = manager.vcs.branch_exists(&task.name).unwrap_or(false);

    if !worktree.is_dir() {
        return Ok(if branch_exists { WorktreeStatus::MissingWorktree } else { WorktreeStatus::Healthy });
    }

    let dot_git = worktree.join(".git");
    if !dot_git.exists() {
        return Ok(WorktreeStatus::InvalidGit);
    }

    let listed = manager
        .vcs
        .list_worktrees()?
        .into_iter()
        .any(|(path, _)| paths_match(&path, &worktree));
    if !listed {
        return Ok(WorktreeStatus::NotInGit);
    }

    if fs::read_to_string(&dot_git).is_err() {
        return Ok(WorktreeStatus::InvalidGit);
    }

    if !branch_exists {
        return Ok(WorktreeStatus::MissingBranch);
    }

    Ok(WorktreeStatus::Healthy)
}

fn paths_match(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ra), Ok(rb)) => ra == rb,
        _ => false,
    }
}

/// Repair a task's worktree according to its classified status.
pub fn repair(manager: &TaskManager, task: &Task, status: WorktreeStatus) -> Result<()> {
    let worktree = task.worktree_dir();
    match status {
        WorktreeStatus::Healthy => Ok(()),
        WorktreeStatus::MissingWorktree => {
            info!(task = %task.name, "recreating missing worktree");
            manager.vcs.create_worktree(&worktree, &task.name, false, None)
        }
        WorktreeStatus::NotInGit => {
            info!(task = %task.name, "worktree directory untracked by git, recreating");
            let _ = fs::remove_dir_all(&worktree);
            if let Ok(common_dir) = manager.vcs.common_dir() {
                let _ = manager.vcs.prune_worktrees(&common_dir);
            }
            let create_branch = !manager.vcs.branch_exists(&task.name).unwrap_or(false);
            manager.vcs.create_worktree(&worktree, &task.name, create_branch, None)
        }
        WorktreeStatus::InvalidGit => repair_invalid_git(manager, task, &worktree),
        WorktreeStatus::MissingBranch => repair_missing_branch(manager, task, &worktree),
    }
}

fn repair_invalid_git(manager: &TaskManager, task: &Task, worktree: &Path) -> Result<()> {
    let backup = worktree.with_extension("backup");
    let _ = fs::remove_dir_all(&backup);
    fs::rename(worktree, &backup).context("failed to move invalid worktree aside")?;

    if let Ok(common_dir) = manager.vcs.common_dir() {
        let _ = manager.vcs.prune_worktrees(&common_dir);
    }

    let create_branch = !manager.vcs.branch_exists(&task.name).unwrap_or(false);
    if let Err(e) = manager.vcs.create_worktree(worktree, &task.name, create_branch, None) {
        warn!(task = %task.name, error = %e, "failed to recreate worktree, restoring backup");
        let _ = fs::remove_dir_all(worktree);
        fs::rename(&backup, worktree)?;
        return Err(e);
    }

    copy_dir_except_git(&backup, worktree)?;
    let _ = fs::remove_dir_all(&backup);
    Ok(())
}

fn copy_dir_except_git(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs_extra::dir::copy(entry.path(), dst, &fs_extra::dir::CopyOptions::new().overwrite(true))
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// The worktree's `.git` file still points at a valid gitdir even though its
/// branch was deleted; resolve its current HEAD commit directly rather than
/// parsing the gitdir/HEAD files by hand, and recreate the branch there.
fn repair_missing_branch(manager: &TaskManager, task: &Task, worktree: &Path) -> Result<()> {
    let commit = crate::cmd::Cmd::new("git")
        .args(&["rev-parse", "HEAD"])
        .workdir(worktree)
        .run_and_capture_stdout()
        .context("failed to resolve HEAD commit in orphaned worktree")?;
    manager.vcs.create_branch(&task.name, &commit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_status_is_empty_string() {
        assert_eq!(WorktreeStatus::Healthy.as_str(), "");
        assert_eq!(WorktreeStatus::MissingBranch.as_str(), "missing_branch");
    }

    #[test]
    fn identical_paths_match_without_canonicalizing() {
        let p = Path::new("/tmp/does-not-exist-taw-test");
        assert!(paths_match(p, p));
    }
}
