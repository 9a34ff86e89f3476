use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use crate::agent::AgentClient;
use crate::config::{self, Config};
use crate::keybindings;
use crate::lifecycle;
use crate::manager::TaskManager;
use crate::multiplexer::{self, Multiplexer};
use crate::notify::Notifier;
use crate::recovery;
use crate::store::Task;
use crate::vcs;

#[derive(Parser)]
#[command(name = "taw")]
#[command(about = "Orchestrates concurrent coding-agent sessions across tmux windows and git worktrees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example .taw.yaml to the current directory
    Init,
    /// Hidden command group driving key-bound interactive actions
    #[command(subcommand, hide = true)]
    Internal(InternalCommands),
}

#[derive(Subcommand)]
enum InternalCommands {
    ToggleNew { session: String },
    NewTask { session: String },
    SpawnTask { session: String, content_file: PathBuf },
    HandleTask { session: String, agent_dir: PathBuf },
    WatchWait { session: String, window_id: String, task_name: String },
    EndTask {
        session: String,
        window_id: String,
        #[arg(long)]
        pane_capture_file: Option<PathBuf>,
    },
    EndTaskUi { session: String, window_id: String },
    CancelTask {
        session: String,
        window_id: String,
        #[arg(long)]
        pane_capture_file: Option<PathBuf>,
    },
    CancelTaskUi { session: String, window_id: String },
    DoneTask { session: String },
    ProcessQueue { session: String },
    MergeCompleted { session: String },
    RecoverTask { session: String, task_name: String },
    PopupShell { session: String },
    ToggleLog { session: String },
    ToggleHelp { session: String },
    ToggleTaskList { session: String },
    ToggleGitStatus { session: String },
    LoadingScreen { session: String },
    LogViewer { session: String },
    TaskListViewer { session: String },
    InstallKeybindings { session: String },
}

struct RuntimeContext {
    manager: TaskManager,
    mux: Arc<dyn Multiplexer>,
    agent: AgentClient,
    notifier: Notifier,
}

fn build_context() -> Result<RuntimeContext> {
    let config = Config::load()?;
    let repo_root = config::repo_root_or_cwd();
    let state_dir = config.state_dir_path(&repo_root);
    crate::logger::init(&state_dir)?;

    let vcs = vcs::detect_vcs().unwrap_or_else(|_| Arc::new(vcs::GitVcs::new()));
    let mux = multiplexer::create_backend();
    let agent = AgentClient::new(config.agent_command.clone(), config.agent_models.clone());
    let notifier = Notifier::new(config.notification.clone());
    let manager = TaskManager::new(state_dir, repo_root, config, vcs);

    Ok(RuntimeContext { manager, mux, agent, notifier })
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init => Config::init(),
        Commands::Internal(cmd) => run_internal(cmd),
    }
}

fn run_internal(cmd: InternalCommands) -> Result<()> {
    let ctx = build_context()?;
    let RuntimeContext { manager, mux, agent, notifier } = ctx;
    let mux: &dyn Multiplexer = mux.as_ref();

    match cmd {
        InternalCommands::ToggleNew { session } => toggle_new(&manager, mux, &session),
        InternalCommands::NewTask { session } => new_task_loop(&manager, &agent, &session),
        InternalCommands::SpawnTask { session, content_file } => spawn_task(&manager, mux, &agent, &session, &content_file),
        InternalCommands::HandleTask { session, agent_dir } => {
            lifecycle::handle::run(&manager, mux, &agent, &notifier, &session, &agent_dir)
        }
        InternalCommands::WatchWait { session: _, window_id, task_name } => {
            let mut watcher = crate::watcher::Watcher::new(&manager, mux, &notifier, window_id, task_name);
            watcher.run()
        }
        InternalCommands::EndTask { session: _, window_id, pane_capture_file } => {
            lifecycle::end::run(&manager, mux, &agent, &notifier, &window_id, pane_capture_file.as_deref())
        }
        InternalCommands::EndTaskUi { session: _, window_id } => {
            let capture = mux.capture_pane(&window_id, 500).unwrap_or_default();
            let tmp = tempfile::NamedTempFile::new()?;
            std::fs::write(tmp.path(), &capture)?;
            lifecycle::end::run(&manager, mux, &agent, &notifier, &window_id, Some(tmp.path()))
        }
        InternalCommands::CancelTask { session: _, window_id, pane_capture_file } => {
            lifecycle::cancel::run(&manager, mux, &agent, &notifier, &window_id, pane_capture_file.as_deref())
        }
        InternalCommands::CancelTaskUi { session: _, window_id } => {
            let capture = mux.capture_pane(&window_id, 500).unwrap_or_default();
            let tmp = tempfile::NamedTempFile::new()?;
            std::fs::write(tmp.path(), &capture)?;
            lifecycle::cancel::run(&manager, mux, &agent, &notifier, &window_id, Some(tmp.path()))
        }
        InternalCommands::DoneTask { session: _ } => {
            let window_id = mux.session_name().ok_or_else(|| anyhow!("not running inside tmux"))?;
            lifecycle::end::run(&manager, mux, &agent, &notifier, &window_id, None)
        }
        InternalCommands::ProcessQueue { session: _ } => process_queue(&manager, mux, &agent, &notifier),
        InternalCommands::MergeCompleted { session: _ } => lifecycle::merge_completed(&manager, mux, &agent, &notifier),
        InternalCommands::RecoverTask { session: _, task_name } => recover_task(&manager, &task_name),
        InternalCommands::PopupShell { session: _ } => {
            let opts = multiplexer::PopupOptions { title: "taw shell", width: "80%", height: "80%", close_on_exit: false, start_dir: None };
            mux.display_popup(&opts, "$SHELL")
        }
        InternalCommands::ToggleLog { session: _ } => render_log_viewer(&manager),
        InternalCommands::LogViewer { session: _ } => render_log_viewer(&manager),
        InternalCommands::ToggleHelp { session: _ } => {
            for (chord, desc) in keybindings::describe() {
                println!("{chord}: {desc}");
            }
            Ok(())
        }
        InternalCommands::ToggleTaskList { session: _ } => render_task_list(&manager),
        InternalCommands::TaskListViewer { session: _ } => render_task_list(&manager),
        InternalCommands::ToggleGitStatus { session: _ } => render_git_status(&manager),
        InternalCommands::LoadingScreen { session: _ } => {
            println!("taw: working...");
            Ok(())
        }
        InternalCommands::InstallKeybindings { session } => keybindings::install(mux, &session),
    }
}

fn toggle_new(manager: &TaskManager, mux: &dyn Multiplexer, session: &str) -> Result<()> {
    let name = format!("{}new-task", manager.config.window_prefix);
    if let Some((window_id, _)) = mux.list_windows()?.into_iter().find(|(_, n)| n == &name) {
        mux.select_window(&window_id)?;
    } else {
        let window_id = mux.new_window(&name, &manager.repo_root, false)?;
        let exe = std::env::current_exe().unwrap_or_else(|_| "taw".into());
        mux.send_keys_literal(&window_id, &format!("{} internal new-task '{}'", exe.display(), session))?;
        mux.send_keys(&window_id, "Enter")?;
    }
    Ok(())
}

/// Collects content via an external editor in a loop, spawning a task per
/// accepted (non-empty) submission.
fn new_task_loop(manager: &TaskManager, agent: &AgentClient, session: &str) -> Result<()> {
    loop {
        let content = edit::edit("").unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(());
        }
        let task = manager.create_task(&content, agent)?;
        spawn_handle_process(manager, session, &task)?;
    }
}

fn spawn_task(manager: &TaskManager, _mux: &dyn Multiplexer, agent: &AgentClient, session: &str, content_file: &std::path::Path) -> Result<()> {
    let content = std::fs::read_to_string(content_file).context("failed to read spawned task content")?;
    let _ = std::fs::remove_file(content_file);
    let task = manager.create_task(&content, agent)?;
    spawn_handle_process(manager, session, &task)
}

fn spawn_handle_process(manager: &TaskManager, session: &str, task: &Task) -> Result<()> {
    let exe = std::env::current_exe().unwrap_or_else(|_| "taw".into());
    std::process::Command::new(exe)
        .args(["internal", "handle-task", session, &task.dir.to_string_lossy()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to spawn handle-task process")?;
    Ok(())
}

fn process_queue(manager: &TaskManager, mux: &dyn Multiplexer, agent: &AgentClient, _notifier: &Notifier) -> Result<()> {
    let queue_dir = manager.state_dir.join("queue");
    if !queue_dir.is_dir() {
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(&queue_dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    if let Some(entry) = entries.into_iter().next() {
        let content = std::fs::read_to_string(entry.path())?;
        let task = manager.create_task(&content, agent)?;
        let _ = std::fs::remove_file(entry.path());
        let session = mux.session_name().unwrap_or_default();
        spawn_handle_process(manager, &session, &task)?;
    }
    Ok(())
}

fn recover_task(manager: &TaskManager, task_name: &str) -> Result<()> {
    let task = manager.task(task_name);
    if !task.exists() {
        return Err(anyhow!("no such task: {task_name}"));
    }
    let status = recovery::check_worktree_status(manager, &task)?;
    if status != recovery::WorktreeStatus::Healthy {
        recovery::repair(manager, &task, status)?;
    }
    Ok(())
}

fn render_log_viewer(manager: &TaskManager) -> Result<()> {
    let log_path = manager.state_dir.join("taw.log");
    match std::fs::read_to_string(&log_path) {
        Ok(contents) => {
            for line in contents.lines().rev().take(200) {
                println!("{line}");
            }
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

fn render_task_list(manager: &TaskManager) -> Result<()> {
    for task in manager.list_tasks()? {
        println!("{}\t{}", task.name, task.status());
    }
    Ok(())
}

fn render_git_status(manager: &TaskManager) -> Result<()> {
    for task in manager.list_tasks()? {
        let worktree = task.worktree_dir();
        if !worktree.is_dir() {
            continue;
        }
        let dirty = manager.vcs.has_uncommitted_changes(&worktree).unwrap_or(false);
        println!("{}\t{}", task.name, if dirty { "dirty" } else { "clean" });
    }
    Ok(())
}
