use anyhow::{Context, Result, anyhow};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cmd::Cmd;

/// Error returned when a worktree cannot be located by branch or handle.
#[derive(Debug, thiserror::Error)]
#[error("worktree not found: {0}")]
pub struct WorktreeNotFound(pub String);

pub fn is_repo() -> Result<bool> {
    Cmd::new("git")
        .args(&["rev-parse", "--git-dir"])
        .run_as_check()
}

pub fn repo_root() -> Result<PathBuf> {
    let path = Cmd::new("git")
        .args(&["rev-parse", "--show-toplevel"])
        .run_and_capture_stdout()?;
    Ok(PathBuf::from(path))
}

pub fn common_dir() -> Result<PathBuf> {
    let path = Cmd::new("git")
        .args(&["rev-parse", "--git-common-dir"])
        .run_and_capture_stdout()
        .context("failed to resolve git common dir")?;
    let path = PathBuf::from(path);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(repo_root()?.join(path))
    }
}

/// Resolve the default branch: origin/HEAD, then main, then master.
pub fn main_branch() -> Result<String> {
    if let Ok(out) = Cmd::new("git")
        .args(&["symbolic-ref", "refs/remotes/origin/HEAD"])
        .run_and_capture_stdout()
        && let Some(name) = out.strip_prefix("refs/remotes/origin/")
    {
        return Ok(name.to_string());
    }
    for candidate in ["main", "master"] {
        if branch_exists(candidate)? {
            return Ok(candidate.to_string());
        }
    }
    Err(anyhow!("could not determine main branch"))
}

pub fn branch_exists(name: &str) -> Result<bool> {
    Cmd::new("git")
        .args(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")])
        .run_as_check()
}

pub fn current_branch() -> Result<String> {
    Cmd::new("git")
        .args(&["rev-parse", "--abbrev-ref", "HEAD"])
        .run_and_capture_stdout()
}

pub fn branch_merged(name: &str, into: &str) -> Result<bool> {
    let merged = Cmd::new("git")
        .args(&["branch", "--merged", into])
        .run_and_capture_stdout()?;
    Ok(merged.lines().any(|l| l.trim_start_matches('*').trim() == name))
}

pub fn create_branch(name: &str, at: &str) -> Result<()> {
    Cmd::new("git")
        .args(&["branch", name, at])
        .run()
        .with_context(|| format!("failed to create branch {name}"))?;
    Ok(())
}

pub fn delete_branch(name: &str, force: bool) -> Result<()> {
    let flag = if force { "-D" } else { "-d" };
    Cmd::new("git")
        .args(&["branch", flag, name])
        .run()
        .with_context(|| format!("failed to delete branch {name}"))?;
    Ok(())
}

fn parse_worktree_list_porcelain(output: &str) -> Vec<(PathBuf, String)> {
    let mut worktrees = Vec::new();
    for block in output.trim().split("\n\n") {
        let mut path: Option<PathBuf> = None;
        let mut branch: Option<String> = None;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                branch = Some(b.to_string());
            } else if line.trim() == "detached" {
                branch = Some("(detached)".to_string());
            }
        }
        if let (Some(p), Some(b)) = (path, branch) {
            worktrees.push((p, b));
        }
    }
    worktrees
}

pub fn list_worktrees() -> Result<Vec<(PathBuf, String)>> {
    let out = Cmd::new("git")
        .args(&["worktree", "list", "--porcelain"])
        .run_and_capture_stdout()
        .context("failed to list worktrees")?;
    Ok(parse_worktree_list_porcelain(&out))
}

pub fn worktree_exists(branch_name: &str) -> Result<bool> {
    match worktree_path(branch_name) {
        Ok(_) => Ok(true),
        Err(e) if e.is::<WorktreeNotFound>() => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn worktree_path(branch_name: &str) -> Result<PathBuf> {
    list_worktrees()?
        .into_iter()
        .find(|(_, b)| b == branch_name)
        .map(|(p, _)| p)
        .ok_or_else(|| WorktreeNotFound(branch_name.to_string()).into())
}

/// Find a worktree by directory handle first, then by branch name.
pub fn find_worktree(name: &str) -> Result<(PathBuf, String)> {
    let worktrees = list_worktrees()?;
    for (path, branch) in &worktrees {
        if path.file_name().map(|n| n.to_string_lossy() == name).unwrap_or(false) {
            return Ok((path.clone(), branch.clone()));
        }
    }
    worktrees
        .into_iter()
        .find(|(_, b)| b == name)
        .ok_or_else(|| WorktreeNotFound(name.to_string()).into())
}

pub fn create_worktree(
    worktree_path: &Path,
    branch_name: &str,
    create_branch: bool,
    base_branch: Option<&str>,
) -> Result<()> {
    let path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow!("invalid worktree path"))?;

    let mut cmd = Cmd::new("git").arg("worktree").arg("add");
    if create_branch {
        cmd = cmd.arg("-b").arg(branch_name).arg(path_str);
        if let Some(base) = base_branch {
            cmd = cmd.arg(base);
        }
    } else {
        cmd = cmd.arg(path_str).arg(branch_name);
    }
    cmd.run().context("failed to create worktree")?;
    Ok(())
}

pub fn remove_worktree(worktree_path: &Path, force: bool) -> Result<()> {
    let mut cmd = Cmd::new("git").args(&["worktree", "remove"]);
    if force {
        cmd = cmd.arg("--force");
    }
    cmd.arg(worktree_path.to_string_lossy().as_ref())
        .run()
        .context("failed to remove worktree")?;
    Ok(())
}

pub fn prune_worktrees(git_common_dir: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(git_common_dir)
        .args(&["worktree", "prune"])
        .run()
        .context("failed to prune worktrees")?;
    Ok(())
}

pub fn has_uncommitted_changes(worktree: &Path) -> Result<bool> {
    let out = Cmd::new("git")
        .workdir(worktree)
        .args(&["status", "--porcelain"])
        .run_and_capture_stdout()?;
    Ok(!out.trim().is_empty())
}

pub fn add_all(worktree: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["add", "-A"])
        .run()
        .context("git add -A failed")?;
    Ok(())
}

pub fn commit(worktree: &Path, message: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["commit", "-m", message])
        .run()
        .context("git commit failed")?;
    Ok(())
}

pub fn diff_stat(worktree: &Path, range: &str) -> Result<String> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["diff", "--stat", range])
        .run_and_capture_stdout()
}

pub fn push(worktree: &Path, remote: &str, branch: &str, set_upstream: bool) -> Result<()> {
    let mut cmd = Cmd::new("git").workdir(worktree).arg("push");
    if set_upstream {
        cmd = cmd.arg("-u");
    }
    cmd.arg(remote)
        .arg(branch)
        .run()
        .with_context(|| format!("git push {remote} {branch} failed"))?;
    Ok(())
}

pub fn fetch(worktree: &Path, remote: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["fetch", remote])
        .run()
        .context("git fetch failed")?;
    Ok(())
}

pub fn pull(worktree: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["pull"])
        .run()
        .context("git pull failed")?;
    Ok(())
}

pub fn checkout(worktree: &Path, branch: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["checkout", branch])
        .run()
        .with_context(|| format!("git checkout {branch} failed"))?;
    Ok(())
}

pub fn merge_squash(worktree: &Path, branch: &str, message: &str) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["merge", "--squash", branch])
        .run()
        .with_context(|| format!("git merge --squash {branch} failed"))?;

    if !has_staged_changes(worktree)? {
        debug!(branch, "squash produced no staged changes, nothing to commit");
        return Ok(());
    }
    commit(worktree, message)
}

pub fn has_staged_changes(worktree: &Path) -> Result<bool> {
    let ok = Cmd::new("git")
        .workdir(worktree)
        .args(&["diff", "--cached", "--quiet"])
        .run_as_check()?;
    Ok(!ok)
}

pub fn merge_abort(worktree: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["merge", "--abort"])
        .run()
        .context("git merge --abort failed")?;
    Ok(())
}

pub fn stash_push(worktree: &Path, message: &str, include_untracked: bool) -> Result<bool> {
    let mut cmd = Cmd::new("git")
        .workdir(worktree)
        .args(&["stash", "push", "-m", message]);
    if include_untracked {
        cmd = cmd.arg("-u");
    }
    let out = cmd.run_and_capture_stdout()?;
    Ok(!out.contains("No local changes to save"))
}

pub fn stash_pop(worktree: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["stash", "pop"])
        .run()
        .context("git stash pop failed")?;
    Ok(())
}

/// Find the merge commit that brought `branch` into `into`, by grep first, then ancestry-path.
pub fn find_merge_commit(worktree: &Path, branch: &str, into: &str) -> Result<Option<String>> {
    let grep = format!("--grep=Merge.*{branch}");
    if let Ok(out) = Cmd::new("git")
        .workdir(worktree)
        .args(&["log", into, "--merges", "--format=%H", &grep, "-n", "1"])
        .run_and_capture_stdout()
        && !out.trim().is_empty()
    {
        return Ok(Some(out.trim().to_string()));
    }

    let range = format!("{into}");
    let out = Cmd::new("git")
        .workdir(worktree)
        .args(&[
            "log",
            &range,
            "--merges",
            "--ancestry-path",
            "--format=%H",
        ])
        .run_and_capture_stdout()?;
    Ok(out.lines().next().map(|s| s.trim().to_string()))
}

pub fn revert_commit(worktree: &Path, commit: &str, mainline: Option<u32>) -> Result<()> {
    let mainline_str = mainline.map(|m| m.to_string());
    let mut cmd = Cmd::new("git").workdir(worktree).arg("revert");
    if let Some(m) = &mainline_str {
        cmd = cmd.arg("-m").arg(m);
    }
    cmd.arg("--no-edit")
        .arg(commit)
        .run()
        .with_context(|| format!("git revert {commit} failed"))?;
    Ok(())
}

pub fn revert_abort(worktree: &Path) -> Result<()> {
    Cmd::new("git")
        .workdir(worktree)
        .args(&["revert", "--abort"])
        .run()
        .context("git revert --abort failed")?;
    Ok(())
}

/// Untracked files under `dir`, relative to `dir`.
pub fn untracked_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let out = Cmd::new("git")
        .workdir(dir)
        .args(&["ls-files", "--others", "--exclude-standard"])
        .run_and_capture_stdout()?;
    Ok(out.lines().map(PathBuf::from).collect())
}

pub fn get_gone_branches() -> Result<HashSet<String>> {
    let out = Cmd::new("git")
        .args(&["for-each-ref", "--format=%(refname:short) %(upstream:track)", "refs/heads"])
        .run_and_capture_stdout()?;
    Ok(out
        .lines()
        .filter(|l| l.contains("[gone]"))
        .filter_map(|l| l.split_whitespace().next().map(str::to_string))
        .collect())
}

pub fn remote_head_ref(gitdir: &Path) -> Result<String> {
    std::fs::read_to_string(gitdir.join("HEAD"))
        .context("failed to read HEAD file")
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worktree_porcelain_blocks() {
        let out = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.taw/agents/foo/worktree\nHEAD def456\nbranch refs/heads/foo\n";
        let parsed = parse_worktree_list_porcelain(out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].1, "foo");
    }

    #[test]
    fn parses_detached_worktree() {
        let out = "worktree /repo\nHEAD abc123\ndetached\n";
        let parsed = parse_worktree_list_porcelain(out);
        assert_eq!(parsed[0].1, "(detached)");
    }
}
