use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use which::{which, which_in};

use crate::git;

fn default_state_dir() -> String {
    ".taw".to_string()
}

fn default_window_prefix() -> String {
    "".to_string()
}

fn default_window_name_limit() -> usize {
    20
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_models() -> Vec<String> {
    vec!["haiku".to_string(), "sonnet".to_string(), "sonnet-thinking".to_string()]
}

fn default_merge_lock_timeout_secs() -> u64 {
    30
}

fn default_merge_lock_retry_interval_secs() -> u64 {
    1
}

fn default_watch_poll_interval_secs() -> u64 {
    2
}

fn default_agent_ready_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatusIcons {
    #[serde(default = "StatusIcons::default_working")]
    pub working: String,
    #[serde(default = "StatusIcons::default_waiting")]
    pub waiting: String,
    #[serde(default = "StatusIcons::default_done")]
    pub done: String,
    #[serde(default = "StatusIcons::default_warning")]
    pub warning: String,
    #[serde(default = "StatusIcons::default_new")]
    pub new: String,
}

impl StatusIcons {
    fn default_working() -> String {
        "\u{2699}".to_string() // gear
    }
    fn default_waiting() -> String {
        "\u{23F8}".to_string() // pause
    }
    fn default_done() -> String {
        "\u{2705}".to_string() // check
    }
    fn default_warning() -> String {
        "\u{26A0}".to_string() // warning triangle
    }
    fn default_new() -> String {
        "\u{1F195}".to_string() // NEW
    }
}

impl Default for StatusIcons {
    fn default() -> Self {
        Self {
            working: Self::default_working(),
            waiting: Self::default_waiting(),
            done: Self::default_done(),
            warning: Self::default_warning(),
            new: Self::default_new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct NotificationConfig {
    #[serde(default)]
    pub desktop: Option<bool>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_url_2: Option<String>,
}

impl NotificationConfig {
    pub fn desktop_enabled(&self) -> bool {
        self.desktop.unwrap_or(true)
    }
}

/// Project and global configuration for the task lifecycle engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub main_branch: Option<String>,

    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default = "default_window_prefix")]
    pub window_prefix: String,

    #[serde(default = "default_window_name_limit")]
    pub window_name_limit: usize,

    #[serde(default)]
    pub status_icons: StatusIcons,

    #[serde(default = "default_agent_command")]
    pub agent_command: String,

    #[serde(default = "default_agent_models")]
    pub agent_models: Vec<String>,

    #[serde(default)]
    pub auto_merge: bool,

    #[serde(default)]
    pub pre_worktree_hook: Option<String>,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default = "default_merge_lock_timeout_secs")]
    pub merge_lock_timeout_secs: u64,

    #[serde(default = "default_merge_lock_retry_interval_secs")]
    pub merge_lock_retry_interval_secs: u64,

    #[serde(default = "default_watch_poll_interval_secs")]
    pub watch_poll_interval_secs: u64,

    #[serde(default = "default_agent_ready_timeout_secs")]
    pub agent_ready_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main_branch: None,
            state_dir: default_state_dir(),
            window_prefix: default_window_prefix(),
            window_name_limit: default_window_name_limit(),
            status_icons: StatusIcons::default(),
            agent_command: default_agent_command(),
            agent_models: default_agent_models(),
            auto_merge: false,
            pre_worktree_hook: None,
            notification: NotificationConfig::default(),
            merge_lock_timeout_secs: default_merge_lock_timeout_secs(),
            merge_lock_retry_interval_secs: default_merge_lock_retry_interval_secs(),
            watch_poll_interval_secs: default_watch_poll_interval_secs(),
            agent_ready_timeout_secs: default_agent_ready_timeout_secs(),
        }
    }
}

impl Config {
    /// Load and merge global (`~/.config/taw/config.yaml`) and project
    /// (`.taw.yaml`) configuration. Project values win on scalars.
    pub fn load() -> anyhow::Result<Self> {
        let global = Self::load_global()?;
        let project = Self::load_project()?;
        Ok(match (global, project) {
            (Some(g), Some(p)) => g.merge(p),
            (Some(g), None) => g,
            (None, Some(p)) => p,
            (None, None) => Self::default(),
        })
    }

    fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    fn load_global() -> anyhow::Result<Option<Self>> {
        if let Some(home_dir) = home::home_dir() {
            for candidate in ["config.yaml", "config.yml"] {
                let path = home_dir.join(".config/taw").join(candidate);
                if path.exists() {
                    return Self::load_from_path(&path);
                }
            }
        }
        Ok(None)
    }

    fn load_project() -> anyhow::Result<Option<Self>> {
        for candidate in [".taw.yaml", ".taw.yml"] {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }
        Ok(None)
    }

    /// Project config (`project`) wins over global config (`self`) on every
    /// scalar; the caller passes `self=global`.
    fn merge(self, project: Self) -> Self {
        let default = Self::default();
        Self {
            main_branch: project.main_branch.or(self.main_branch),
            state_dir: pick_non_default(project.state_dir, self.state_dir, &default.state_dir),
            window_prefix: pick_non_default(
                project.window_prefix,
                self.window_prefix,
                &default.window_prefix,
            ),
            window_name_limit: project.window_name_limit,
            status_icons: project.status_icons,
            agent_command: pick_non_default(
                project.agent_command,
                self.agent_command,
                &default.agent_command,
            ),
            agent_models: splice_global(project.agent_models, self.agent_models),
            auto_merge: project.auto_merge || self.auto_merge,
            pre_worktree_hook: project.pre_worktree_hook.or(self.pre_worktree_hook),
            notification: project.notification,
            merge_lock_timeout_secs: project.merge_lock_timeout_secs,
            merge_lock_retry_interval_secs: project.merge_lock_retry_interval_secs,
            watch_poll_interval_secs: project.watch_poll_interval_secs,
            agent_ready_timeout_secs: project.agent_ready_timeout_secs,
        }
    }

    pub fn state_dir_path(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.state_dir)
    }

    /// Write an example `.taw.yaml` to the current directory.
    pub fn init() -> anyhow::Result<()> {
        let config_path = PathBuf::from(".taw.yaml");
        if config_path.exists() {
            return Err(anyhow::anyhow!(
                ".taw.yaml already exists. Remove it first if you want to regenerate it."
            ));
        }

        let example_config = r#"# taw project configuration
# For global settings, edit ~/.config/taw/config.yaml

# The primary branch to merge completed tasks into.
# Default: auto-detected from origin/HEAD, falling back to main or master.
# main_branch: main

# Directory (relative to the repo root) holding all task state.
# state_dir: .taw

# Prefix applied before the status emoji in tmux window names.
# window_prefix: ""

# The agent binary to launch for each task.
# agent_command: claude

# Models tried in order when generating a task name or summary, fastest first.
# agent_models: [haiku, sonnet, sonnet-thinking]

# Automatically squash-merge a task into main_branch when it ends.
# auto_merge: false

# Shell command to run inside a freshly created worktree before the agent starts.
# pre_worktree_hook: "mise install"

notification:
  desktop: true
  # webhook_url: https://example.com/hooks/taw
"#;

        fs::write(&config_path, example_config)?;
        println!("Created .taw.yaml");
        Ok(())
    }
}

fn pick_non_default(project: String, global: String, default: &str) -> String {
    if project != default { project } else if global != default { global } else { project }
}

/// Splice the `<global>` placeholder in a project list-valued field with the
/// global config's list, so a project can prepend/append to the inherited
/// defaults instead of replacing them outright.
fn splice_global(project: Vec<String>, global: Vec<String>) -> Vec<String> {
    if !project.iter().any(|entry| entry == "<global>") {
        return project;
    }
    project
        .into_iter()
        .flat_map(|entry| if entry == "<global>" { global.clone() } else { vec![entry] })
        .collect()
}

/// Resolve an executable name or path to its full path, searching tmux's
/// global `PATH` (panes run inside tmux's environment) before the caller's
/// own `PATH`.
pub fn resolve_executable_path(executable: &str, tmux_path: Option<&str>) -> Option<String> {
    let exec_path = Path::new(executable);

    if exec_path.is_absolute() {
        return Some(exec_path.to_string_lossy().into_owned());
    }

    if executable.contains('/') || executable.contains(std::path::MAIN_SEPARATOR) {
        let cwd = std::env::current_dir().ok()?;
        return Some(cwd.join(exec_path).to_string_lossy().into_owned());
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(tmux_path) = tmux_path
        && let Ok(found) = which_in(executable, Some(tmux_path), &cwd)
    {
        return Some(found.to_string_lossy().into_owned());
    }

    which(executable).ok().map(|p| p.to_string_lossy().into_owned())
}

pub fn repo_root_or_cwd() -> PathBuf {
    git::repo_root().unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_project_scalar_wins() {
        let mut global = Config::default();
        global.auto_merge = false;
        global.agent_command = "claude".to_string();

        let mut project = Config::default();
        project.agent_command = "gemini".to_string();
        project.auto_merge = true;

        let merged = global.merge(project);
        assert_eq!(merged.agent_command, "gemini");
        assert!(merged.auto_merge);
    }

    #[test]
    fn default_status_icons_are_distinct() {
        let icons = StatusIcons::default();
        assert_ne!(icons.working, icons.waiting);
        assert_ne!(icons.waiting, icons.done);
    }

    #[test]
    fn agent_models_global_placeholder_splices_in_global_list() {
        let global = Config { agent_models: vec!["haiku".into(), "sonnet".into()], ..Config::default() };
        let project = Config { agent_models: vec!["opus".into(), "<global>".into()], ..Config::default() };
        let merged = global.merge(project);
        assert_eq!(merged.agent_models, vec!["opus", "haiku", "sonnet"]);
    }

    #[test]
    fn agent_models_without_placeholder_replaces_outright() {
        let global = Config { agent_models: vec!["haiku".into()], ..Config::default() };
        let project = Config { agent_models: vec!["gemini".into()], ..Config::default() };
        let merged = global.merge(project);
        assert_eq!(merged.agent_models, vec!["gemini"]);
    }
}
