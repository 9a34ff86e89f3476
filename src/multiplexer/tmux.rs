use anyhow::{Context, Result, anyhow};
use std::path::Path;

use crate::cmd::Cmd;

use super::{Multiplexer, PopupOptions};

#[derive(Debug, Default)]
pub struct TmuxBackend;

impl TmuxBackend {
    pub fn new() -> Self {
        Self
    }

    fn tmux_cmd(&self, args: &[&str]) -> Result<()> {
        Cmd::new("tmux")
            .args(args)
            .run()
            .with_context(|| format!("tmux command failed: {args:?}"))?;
        Ok(())
    }

    fn tmux_query(&self, args: &[&str]) -> Result<String> {
        Cmd::new("tmux")
            .args(args)
            .run_and_capture_stdout()
            .with_context(|| format!("tmux query failed: {args:?}"))
    }
}

impl Multiplexer for TmuxBackend {
    fn is_running(&self) -> Result<bool> {
        Cmd::new("tmux").arg("has-session").run_as_check()
    }

    fn list_windows(&self) -> Result<Vec<(String, String)>> {
        let out = self
            .tmux_query(&["list-windows", "-F", "#{window_id} #{window_name}"])
            .unwrap_or_default();
        Ok(out
            .lines()
            .filter_map(|l| l.split_once(' '))
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect())
    }

    fn new_window(&self, name: &str, start_dir: &Path, detached: bool) -> Result<String> {
        let dir = start_dir
            .to_str()
            .ok_or_else(|| anyhow!("start_dir is not valid UTF-8"))?;
        let mut cmd = Cmd::new("tmux").args(&["new-window"]);
        if detached {
            cmd = cmd.arg("-d");
        }
        let id = cmd
            .args(&["-n", name, "-c", dir, "-P", "-F", "#{window_id}"])
            .run_and_capture_stdout()
            .context("failed to create tmux window")?;
        Ok(id.trim().to_string())
    }

    fn kill_window(&self, window_id: &str) -> Result<()> {
        if !self.has_window(window_id)? {
            return Ok(());
        }
        self.tmux_cmd(&["kill-window", "-t", window_id])
    }

    fn select_window(&self, window_id: &str) -> Result<()> {
        self.tmux_cmd(&["select-window", "-t", window_id])
    }

    fn rename_window(&self, window_id: &str, name: &str) -> Result<()> {
        self.tmux_cmd(&["rename-window", "-t", window_id, name])
    }

    fn window_name(&self, window_id: &str) -> Result<Option<String>> {
        match self.tmux_query(&["display-message", "-p", "-t", window_id, "#{window_name}"]) {
            Ok(name) => Ok(Some(name.trim().to_string())),
            Err(_) => Ok(None),
        }
    }

    fn has_window(&self, window_id: &str) -> Result<bool> {
        Ok(self.list_windows()?.iter().any(|(id, _)| id == window_id))
    }

    fn split_window(
        &self,
        window_id: &str,
        horizontal: bool,
        percentage: Option<u8>,
        start_dir: &Path,
    ) -> Result<String> {
        let dir = start_dir
            .to_str()
            .ok_or_else(|| anyhow!("start_dir is not valid UTF-8"))?;
        let split_flag = if horizontal { "-h" } else { "-v" };
        let mut cmd = Cmd::new("tmux").args(&[
            "split-window",
            split_flag,
            "-t",
            window_id,
            "-c",
            dir,
            "-P",
            "-F",
            "#{pane_id}",
        ]);
        let pct;
        if let Some(p) = percentage {
            pct = format!("{p}%");
            cmd = cmd.args(&["-l", &pct]);
        }
        let pane_id = cmd.run_and_capture_stdout().context("failed to split window")?;
        Ok(pane_id.trim().to_string())
    }

    fn respawn_pane(&self, pane_id: &str, start_dir: &Path, command: Option<&str>) -> Result<String> {
        let dir = start_dir
            .to_str()
            .ok_or_else(|| anyhow!("start_dir is not valid UTF-8"))?;
        let mut cmd = Cmd::new("tmux").args(&["respawn-pane", "-t", pane_id, "-c", dir, "-k"]);
        if let Some(c) = command {
            cmd = cmd.arg(c);
        }
        cmd.run().context("failed to respawn pane")?;
        Ok(pane_id.to_string())
    }

    fn send_keys(&self, pane_id: &str, keys: &str) -> Result<()> {
        self.tmux_cmd(&["send-keys", "-t", pane_id, keys])
    }

    fn send_keys_literal(&self, pane_id: &str, text: &str) -> Result<()> {
        self.tmux_cmd(&["send-keys", "-t", pane_id, "-l", text])
    }

    fn capture_pane(&self, pane_id: &str, lines: u32) -> Result<String> {
        let start = format!("-{lines}");
        self.tmux_query(&["capture-pane", "-p", "-e", "-S", &start, "-t", pane_id])
    }

    fn clear_history(&self, pane_id: &str) -> Result<()> {
        self.tmux_cmd(&["clear-history", "-t", pane_id])
    }

    fn has_pane(&self, pane_id: &str) -> Result<bool> {
        Ok(self
            .tmux_query(&["list-panes", "-a", "-F", "#{pane_id}"])
            .unwrap_or_default()
            .lines()
            .any(|l| l == pane_id))
    }

    fn get_pane_command(&self, pane_id: &str) -> Result<String> {
        self.tmux_query(&["display-message", "-p", "-t", pane_id, "#{pane_current_command}"])
            .map(|s| s.trim().to_string())
    }

    fn display_popup(&self, opts: &PopupOptions<'_>, command: &str) -> Result<()> {
        let mut cmd = Cmd::new("tmux").args(&[
            "display-popup",
            "-w",
            opts.width,
            "-h",
            opts.height,
            "-T",
            opts.title,
        ]);
        if let Some(dir) = opts.start_dir {
            cmd = cmd.args(&["-d", dir.to_str().unwrap_or(".")]);
        }
        if opts.close_on_exit {
            cmd = cmd.arg("-E");
        }
        cmd.arg(command).run().context("failed to display popup")?;
        Ok(())
    }

    fn display_message(&self, pane_id: &str, message: &str) -> Result<()> {
        self.tmux_cmd(&["display-message", "-t", pane_id, message])
    }

    fn get_option(&self, name: &str) -> Result<Option<String>> {
        match self.tmux_query(&["show-option", "-gqv", name]) {
            Ok(v) if !v.trim().is_empty() => Ok(Some(v.trim().to_string())),
            _ => Ok(None),
        }
    }

    fn set_option(&self, name: &str, value: &str, global: bool) -> Result<()> {
        let mut args = vec!["set-option"];
        if global {
            args.push("-g");
        }
        args.push(name);
        args.push(value);
        self.tmux_cmd(&args)
    }

    fn bind_key(&self, chord: &str, shell_command: &str) -> Result<()> {
        self.tmux_cmd(&["bind-key", chord, "run-shell", shell_command])
    }

    fn session_name(&self) -> Option<String> {
        std::env::var("TMUX").ok()?;
        self.tmux_query(&["display-message", "-p", "#{session_name}"])
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn global_path(&self) -> Result<Option<String>> {
        Ok(self
            .tmux_query(&["show-environment", "-g", "PATH"])
            .ok()
            .and_then(|s| s.strip_prefix("PATH=").map(str::to_string)))
    }
}
