//! Terminal-multiplexer abstraction.
//!
//! tmux is the only backend, but the lifecycle engine and the wait watcher
//! talk to it exclusively through this trait so tests can substitute a fake.

pub mod tmux;

use anyhow::Result;
use std::path::Path;

pub use tmux::TmuxBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

pub struct PopupOptions<'a> {
    pub title: &'a str,
    pub width: &'a str,
    pub height: &'a str,
    pub close_on_exit: bool,
    pub start_dir: Option<&'a Path>,
}

pub trait Multiplexer: Send + Sync {
    fn is_running(&self) -> Result<bool>;

    fn list_windows(&self) -> Result<Vec<(String, String)>>;
    fn new_window(&self, name: &str, start_dir: &Path, detached: bool) -> Result<String>;
    fn kill_window(&self, window_id: &str) -> Result<()>;
    fn select_window(&self, window_id: &str) -> Result<()>;
    fn rename_window(&self, window_id: &str, name: &str) -> Result<()>;
    fn window_name(&self, window_id: &str) -> Result<Option<String>>;
    fn has_window(&self, window_id: &str) -> Result<bool>;

    fn split_window(
        &self,
        window_id: &str,
        horizontal: bool,
        percentage: Option<u8>,
        start_dir: &Path,
    ) -> Result<String>;
    fn respawn_pane(&self, pane_id: &str, start_dir: &Path, command: Option<&str>) -> Result<String>;
    fn send_keys(&self, pane_id: &str, keys: &str) -> Result<()>;
    fn send_keys_literal(&self, pane_id: &str, text: &str) -> Result<()>;
    fn capture_pane(&self, pane_id: &str, lines: u32) -> Result<String>;
    fn clear_history(&self, pane_id: &str) -> Result<()>;
    fn has_pane(&self, pane_id: &str) -> Result<bool>;
    fn get_pane_command(&self, pane_id: &str) -> Result<String>;

    fn display_popup(&self, opts: &PopupOptions<'_>, command: &str) -> Result<()>;
    fn display_message(&self, pane_id: &str, message: &str) -> Result<()>;

    fn get_option(&self, name: &str) -> Result<Option<String>>;
    fn set_option(&self, name: &str, value: &str, global: bool) -> Result<()>;
    fn bind_key(&self, chord: &str, shell_command: &str) -> Result<()>;

    fn session_name(&self) -> Option<String>;
    fn global_path(&self) -> Result<Option<String>>;
}

/// Window names that hint at shell return (agent exited) rather than agent activity.
pub const SHELL_COMMANDS: &[&str] = &["bash", "zsh", "sh", "fish", "-bash", "-zsh", "-sh", "-fish"];

pub fn is_shell_command(cmd: &str) -> bool {
    SHELL_COMMANDS.contains(&cmd) || SHELL_COMMANDS.iter().any(|s| cmd.ends_with(s))
}

/// Strip terminal escape sequences from a pane capture before running text
/// classifiers over it; tmux's `-e` capture preserves styling codes that
/// would otherwise break substring/prefix matching.
pub fn clean_capture(raw: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(raw.as_bytes())).into_owned()
}

pub fn windows_by_prefix_suffix<'a>(
    windows: &'a [(String, String)],
    token: &str,
) -> Option<&'a (String, String)> {
    windows.iter().find(|(_, name)| name.ends_with(token))
}

pub fn create_backend() -> std::sync::Arc<dyn Multiplexer> {
    std::sync::Arc::new(TmuxBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_detection() {
        assert!(is_shell_command("bash"));
        assert!(is_shell_command("-zsh"));
        assert!(!is_shell_command("claude"));
    }

    #[test]
    fn find_window_by_token_suffix() {
        let windows = vec![
            ("@1".to_string(), "⚙fix-login-bug".to_string()),
            ("@2".to_string(), "⏸add-retry-logic".to_string()),
        ];
        let found = windows_by_prefix_suffix(&windows, "add-retry-logic");
        assert_eq!(found.unwrap().0, "@2");
    }
}
