//! Prepares a task's window and starts (or resumes) its agent session.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::agent::prompt::{compose_system_prompt, compose_user_prompt};
use crate::manager::{TaskManager, window_name};
use crate::multiplexer::Multiplexer;
use crate::notify::Notifier;
use crate::store::Status;

pub fn run(
    manager: &TaskManager,
    mux: &dyn Multiplexer,
    agent: &AgentClient,
    notifier: &Notifier,
    session: &str,
    agent_dir: &Path,
) -> Result<()> {
    let task_name = agent_dir
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("invalid agent directory: {}", agent_dir.display()))?;
    let task = manager.task(task_name);

    if !task.create_tab_lock() {
        info!(task = task_name, "task already bound to a window, skipping");
        return Ok(());
    }

    let result = handle_inner(manager, mux, agent, notifier, session, &task);
    if result.is_err() {
        let _ = task.remove_tab_lock();
    }
    result
}

fn handle_inner(
    manager: &TaskManager,
    mux: &dyn Multiplexer,
    agent: &AgentClient,
    notifier: &Notifier,
    session: &str,
    task: &crate::store::Task,
) -> Result<()> {
    let is_resume = task.session_started();
    let is_vcs = manager.vcs.is_repo().unwrap_or(false);

    if is_vcs && !task.worktree_dir().is_dir() {
        manager.setup_worktree(task).context("failed to set up worktree")?;
    }
    let work_dir = manager.working_dir(task);

    setup_project_symlink(manager, task);

    let window_name = window_name(&manager.config, Status::Pending, &task.name);
    let window_id = mux
        .new_window(&window_name, &work_dir, true)
        .context("failed to create window")?;
    task.save_window_id(&window_id)?;

    let user_pane = mux
        .split_window(&window_id, true, Some(30), &work_dir)
        .unwrap_or_else(|_| window_id.clone());
    if let Some(content) = task.content() {
        let shown = content.replace('\'', "'\\''");
        let _ = mux.send_keys_literal(&user_pane, &format!("clear; printf '%s\\n' '{shown}'"));
        let _ = mux.send_keys(&user_pane, "Enter");
    }

    let system_prompt = compose_system_prompt(
        manager.repo_root.join(".taw-system-prompt.md").exists().then(|| manager.repo_root.join(".taw-system-prompt.md")).as_deref(),
        None,
    );
    let worktree_for_prompt = if is_vcs { Some(task.worktree_dir()) } else { None };
    let user_prompt = compose_user_prompt(task, worktree_for_prompt.as_deref())?;
    crate::store::write_atomic(&task.system_prompt_path(), &system_prompt)?;
    crate::store::write_atomic(&task.user_prompt_path(), &user_prompt)?;

    write_end_task_script(task, session, &window_id)?;
    write_start_agent_script(task, manager, &system_prompt, session, &window_id, is_resume)?;

    let agent_pane = window_id.clone();
    mux.respawn_pane(&agent_pane, &work_dir, Some(&task.start_agent_script_path().to_string_lossy()))
        .context("failed to respawn agent pane")?;

    let ready_timeout = Duration::from_secs(manager.config.agent_ready_timeout_secs);
    if let Err(e) = agent.wait_for_ready(mux, &agent_pane, ready_timeout) {
        warn!(task = %task.name, error = %e, "agent did not report readiness in time");
    }
    if !agent.verify_pane_alive(mux, &agent_pane, Duration::from_secs(5)) {
        warn!(task = %task.name, "agent pane appears dead after startup");
    }
    agent.send_trust_response(mux, &agent_pane);

    if !is_resume {
        let _ = mux.clear_history(&agent_pane);
        let _ = mux.send_keys(&agent_pane, "C-l");
        let instruction = format!("Read and execute the task from {}", task.user_prompt_path().display());
        if let Err(e) = agent.send_input_with_retry(mux, &agent_pane, &instruction, 5) {
            warn!(task = %task.name, error = %e, "failed to deliver initial instruction to agent");
        }
        task.mark_session_started()?;
    }

    spawn_watch(task, session, &window_id)?;

    notifier.play_sound("start");
    let _ = mux.display_message(&window_id, &format!("taw: started {}", task.name));

    info!(task = %task.name, window_id = %window_id, "task handle complete");
    Ok(())
}

fn setup_project_symlink(manager: &TaskManager, task: &crate::store::Task) {
    let link = task.dir.join("project");
    if link.exists() {
        return;
    }
    #[cfg(unix)]
    {
        if let Err(e) = std::os::unix::fs::symlink(&manager.repo_root, &link) {
            warn!(task = %task.name, error = %e, "failed to create project symlink");
        }
    }
}

fn write_end_task_script(task: &crate::store::Task, session: &str, window_id: &str) -> Result<()> {
    let exe = std::env::current_exe().unwrap_or_else(|_| "taw".into());
    let script = format!(
        "#!/bin/sh\nexec '{}' internal end-task '{}' '{}'\n",
        exe.display(),
        session,
        window_id,
    );
    let path = task.end_task_script_path();
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

/// Exports the task's environment per the agent-facing contract (task name,
/// state dir, project dir, worktree dir if any, window id, on-complete
/// script, this binary's install location, and the tmux session name) then
/// execs the agent, resuming its prior conversation or launching fresh with
/// a base64-encoded system prompt to defeat shell interpretation.
fn write_start_agent_script(
    task: &crate::store::Task,
    manager: &TaskManager,
    system_prompt: &str,
    session: &str,
    window_id: &str,
    is_resume: bool,
) -> Result<()> {
    let encoded = BASE64.encode(system_prompt.as_bytes());
    let agent_invocation = if is_resume {
        format!("exec '{}' --continue", manager.config.agent_command)
    } else {
        format!(
            "exec '{}' --system-prompt \"$(printf '%s' '{encoded}' | base64 -d)\"",
            manager.config.agent_command
        )
    };
    let exe = std::env::current_exe().unwrap_or_else(|_| "taw".into());
    let worktree_export = if task.worktree_dir().is_dir() {
        format!("export WORKTREE_DIR='{}'\n", task.worktree_dir().display())
    } else {
        String::new()
    };
    let script = format!(
        "#!/bin/sh\n\
         export TASK_NAME='{task_name}'\n\
         export STATE_DIR='{state_dir}'\n\
         export PROJECT_DIR='{project_dir}'\n\
         {worktree_export}\
         export WINDOW_ID='{window_id}'\n\
         export ON_COMPLETE='{end_task_script}'\n\
         export APP_HOME='{state_dir}'\n\
         export APP_BIN='{app_bin}'\n\
         export SESSION_NAME='{session}'\n\
         {agent_invocation}\n",
        task_name = task.name,
        state_dir = manager.state_dir.display(),
        project_dir = manager.repo_root.display(),
        end_task_script = task.end_task_script_path().display(),
        app_bin = exe.display(),
    );
    let path = task.start_agent_script_path();
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn spawn_watch(task: &crate::store::Task, session: &str, window_id: &str) -> Result<()> {
    let exe = std::env::current_exe().unwrap_or_else(|_| "taw".into());
    std::process::Command::new(exe)
        .args(["internal", "watch-wait", session, window_id, &task.name])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to spawn watch-wait process")?;
    Ok(())
}
