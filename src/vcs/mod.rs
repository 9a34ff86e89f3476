use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::git;

/// Version-control operations needed by the lifecycle engine.
///
/// Git is the only backend today, but the engine talks to it exclusively
/// through this trait so tests can substitute a fake.
pub trait Vcs: Send + Sync {
    fn is_repo(&self) -> Result<bool>;
    fn repo_root(&self) -> Result<PathBuf>;
    fn common_dir(&self) -> Result<PathBuf>;
    fn main_branch(&self) -> Result<String>;

    fn branch_exists(&self, name: &str) -> Result<bool>;
    fn branch_merged(&self, name: &str, into: &str) -> Result<bool>;
    fn create_branch(&self, name: &str, at: &str) -> Result<()>;
    fn delete_branch(&self, name: &str, force: bool) -> Result<()>;
    fn current_branch(&self) -> Result<String>;
    fn gone_branches(&self) -> Result<HashSet<String>>;

    fn worktree_exists(&self, branch: &str) -> Result<bool>;
    fn worktree_path(&self, branch: &str) -> Result<PathBuf>;
    fn find_worktree(&self, name: &str) -> Result<(PathBuf, String)>;
    fn list_worktrees(&self) -> Result<Vec<(PathBuf, String)>>;
    fn create_worktree(&self, path: &Path, branch: &str, create_branch: bool, base: Option<&str>) -> Result<()>;
    fn remove_worktree(&self, path: &Path, force: bool) -> Result<()>;
    fn prune_worktrees(&self, common_dir: &Path) -> Result<()>;

    fn has_uncommitted_changes(&self, worktree: &Path) -> Result<bool>;
    fn add_all(&self, worktree: &Path) -> Result<()>;
    fn commit(&self, worktree: &Path, message: &str) -> Result<()>;
    fn diff_stat(&self, worktree: &Path, range: &str) -> Result<String>;

    fn push(&self, worktree: &Path, remote: &str, branch: &str, set_upstream: bool) -> Result<()>;
    fn fetch(&self, worktree: &Path, remote: &str) -> Result<()>;
    fn pull(&self, worktree: &Path) -> Result<()>;
    fn checkout(&self, worktree: &Path, branch: &str) -> Result<()>;

    fn merge_squash(&self, worktree: &Path, branch: &str, message: &str) -> Result<()>;
    fn merge_abort(&self, worktree: &Path) -> Result<()>;
    fn find_merge_commit(&self, worktree: &Path, branch: &str, into: &str) -> Result<Option<String>>;
    fn revert_commit(&self, worktree: &Path, commit: &str, mainline: Option<u32>) -> Result<()>;
    fn revert_abort(&self, worktree: &Path) -> Result<()>;

    fn stash_push(&self, worktree: &Path, message: &str, include_untracked: bool) -> Result<bool>;
    fn stash_pop(&self, worktree: &Path) -> Result<()>;

    fn untracked_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        GitVcs
    }
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vcs for GitVcs {
    fn is_repo(&self) -> Result<bool> {
        git::is_repo()
    }
    fn repo_root(&self) -> Result<PathBuf> {
        git::repo_root()
    }
    fn common_dir(&self) -> Result<PathBuf> {
        git::common_dir()
    }
    fn main_branch(&self) -> Result<String> {
        git::main_branch()
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        git::branch_exists(name)
    }
    fn branch_merged(&self, name: &str, into: &str) -> Result<bool> {
        git::branch_merged(name, into)
    }
    fn create_branch(&self, name: &str, at: &str) -> Result<()> {
        git::create_branch(name, at)
    }
    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        git::delete_branch(name, force)
    }
    fn current_branch(&self) -> Result<String> {
        git::current_branch()
    }
    fn gone_branches(&self) -> Result<HashSet<String>> {
        git::get_gone_branches()
    }

    fn worktree_exists(&self, branch: &str) -> Result<bool> {
        git::worktree_exists(branch)
    }
    fn worktree_path(&self, branch: &str) -> Result<PathBuf> {
        git::worktree_path(branch)
    }
    fn find_worktree(&self, name: &str) -> Result<(PathBuf, String)> {
        git::find_worktree(name)
    }
    fn list_worktrees(&self) -> Result<Vec<(PathBuf, String)>> {
        git::list_worktrees()
    }
    fn create_worktree(&self, path: &Path, branch: &str, create_branch: bool, base: Option<&str>) -> Result<()> {
        git::create_worktree(path, branch, create_branch, base)
    }
    fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        git::remove_worktree(path, force)
    }
    fn prune_worktrees(&self, common_dir: &Path) -> Result<()> {
        git::prune_worktrees(common_dir)
    }

    fn has_uncommitted_changes(&self, worktree: &Path) -> Result<bool> {
        git::has_uncommitted_changes(worktree)
    }
    fn add_all(&self, worktree: &Path) -> Result<()> {
        git::add_all(worktree)
    }
    fn commit(&self, worktree: &Path, message: &str) -> Result<()> {
        git::commit(worktree, message)
    }
    fn diff_stat(&self, worktree: &Path, range: &str) -> Result<String> {
        git::diff_stat(worktree, range)
    }

    fn push(&self, worktree: &Path, remote: &str, branch: &str, set_upstream: bool) -> Result<()> {
        git::push(worktree, remote, branch, set_upstream)
    }
    fn fetch(&self, worktree: &Path, remote: &str) -> Result<()> {
        git::fetch(worktree, remote)
    }
    fn pull(&self, worktree: &Path) -> Result<()> {
        git::pull(worktree)
    }
    fn checkout(&self, worktree: &Path, branch: &str) -> Result<()> {
        git::checkout(worktree, branch)
    }

    fn merge_squash(&self, worktree: &Path, branch: &str, message: &str) -> Result<()> {
        git::merge_squash(worktree, branch, message)
    }
    fn merge_abort(&self, worktree: &Path) -> Result<()> {
        git::merge_abort(worktree)
    }
    fn find_merge_commit(&self, worktree: &Path, branch: &str, into: &str) -> Result<Option<String>> {
        git::find_merge_commit(worktree, branch, into)
    }
    fn revert_commit(&self, worktree: &Path, commit: &str, mainline: Option<u32>) -> Result<()> {
        git::revert_commit(worktree, commit, mainline)
    }
    fn revert_abort(&self, worktree: &Path) -> Result<()> {
        git::revert_abort(worktree)
    }

    fn stash_push(&self, worktree: &Path, message: &str, include_untracked: bool) -> Result<bool> {
        git::stash_push(worktree, message, include_untracked)
    }
    fn stash_pop(&self, worktree: &Path) -> Result<()> {
        git::stash_pop(worktree)
    }

    fn untracked_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        git::untracked_files(dir)
    }
}

pub fn detect_vcs() -> Result<Arc<dyn Vcs>> {
    if GitVcs.is_repo()? {
        Ok(Arc::new(GitVcs::new()))
    } else {
        Err(anyhow::anyhow!("not inside a git repository"))
    }
}
