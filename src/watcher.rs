//! The long-lived per-task wait watcher: detects when an agent pane is
//! blocked on user input, renames the window, notifies, and (for choice
//! prompts) solicits and forwards a selection.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::manager::{TaskManager, status_icon, window_token};
use crate::multiplexer::Multiplexer;
use crate::notify::Notifier;
use crate::store::Status;

const WAIT_MARKER: &str = "@@TAW_WAITING@@";
const K_MARKER: usize = 8;
const K_ASK: usize = 32;
const UI_MARKERS: &[&str] = &["Enter to select", "Esc to cancel", "Type something."];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Marker,
    AskUserQuestion,
    AskUserQuestionUi,
    Prompt,
}

impl WaitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitKind::Marker => "marker",
            WaitKind::AskUserQuestion => "AskUserQuestion",
            WaitKind::AskUserQuestionUi => "AskUserQuestionUI",
            WaitKind::Prompt => "prompt",
        }
    }
}

/// Classify a pane capture for a waiting condition, checking in order: the
/// exact sentinel, an `AskUserQuestion` line, a UI marker string, then a
/// trailing `>` prompt line.
pub fn detect_wait(content: &str) -> Option<WaitKind> {
    let lines: Vec<&str> = content.lines().rev().skip_while(|l| l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }

    if lines.iter().take(K_MARKER).any(|l| l.trim() == WAIT_MARKER) {
        return Some(WaitKind::Marker);
    }
    if lines.iter().take(K_ASK).any(|l| l.trim_start().starts_with("AskUserQuestion")) {
        return Some(WaitKind::AskUserQuestion);
    }
    if lines.iter().take(K_ASK).any(|l| UI_MARKERS.iter().any(|m| l.contains(m))) {
        return Some(WaitKind::AskUserQuestionUi);
    }
    if lines.first().map(|l| l.trim_start().starts_with('>')).unwrap_or(false) {
        return Some(WaitKind::Prompt);
    }
    None
}

/// Parse a 2-5 option choice prompt out of a capture, if one is present.
/// Options are numbered lines near the tail, e.g. `1. Yes` / `2) No`.
pub fn parse_choice_options(content: &str) -> Option<Vec<String>> {
    let tail: Vec<&str> = content.lines().rev().take(K_ASK).collect();
    let mut options = Vec::new();
    for line in tail.iter().rev() {
        let trimmed = line.trim();
        let rest = trimmed
            .strip_prefix(|c: char| c.is_ascii_digit())
            .and_then(|s| s.strip_prefix('.').or_else(|| s.strip_prefix(')')))
            .map(|s| s.trim());
        if let Some(label) = rest
            && !label.is_empty()
        {
            options.push(label.to_string());
        }
    }
    if (2..=5).contains(&options.len()) { Some(options) } else { None }
}

pub struct Watcher<'a> {
    manager: &'a TaskManager,
    mux: &'a dyn Multiplexer,
    notifier: &'a Notifier,
    window_id: String,
    task_name: String,
    poll_interval: Duration,
    last_capture: String,
    notified_waiting: bool,
}

impl<'a> Watcher<'a> {
    pub fn new(manager: &'a TaskManager, mux: &'a dyn Multiplexer, notifier: &'a Notifier, window_id: String, task_name: String) -> Self {
        let poll_interval = Duration::from_secs(manager.config.watch_poll_interval_secs);
        Self { manager, mux, notifier, window_id, task_name, poll_interval, last_capture: String::new(), notified_waiting: false }
    }

    /// Runs until the pane or window disappears, or the watcher is
    /// reassigned away from its task by an externally renamed window.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if !self.mux.has_pane(&self.window_id).unwrap_or(false) {
                debug!(task = %self.task_name, "pane gone, watcher exiting");
                return Ok(());
            }
            if !self.mux.has_window(&self.window_id).unwrap_or(false) {
                debug!(task = %self.task_name, "window gone, watcher exiting");
                return Ok(());
            }

            let Some(name) = self.mux.window_name(&self.window_id)? else {
                return Ok(());
            };
            let token = crate::manager::strip_status_prefix(&name);
            if token != window_token(&self.task_name, self.manager.config.window_name_limit) {
                info!(task = %self.task_name, "window reassigned to another task, watcher exiting");
                return Ok(());
            }

            if self.is_terminal(&name) {
                std::thread::sleep(self.poll_interval);
                continue;
            }

            if self.is_waiting_icon(&name) {
                if !self.notified_waiting {
                    self.notifier.send_all("taw", &format!("{} is waiting", self.task_name));
                    self.notifier.play_sound("waiting");
                    self.notified_waiting = true;
                }
                std::thread::sleep(self.poll_interval);
                continue;
            }

            let capture = crate::multiplexer::clean_capture(&self.mux.capture_pane(&self.window_id, 200).unwrap_or_default());
            if capture == self.last_capture {
                std::thread::sleep(self.poll_interval);
                continue;
            }
            self.last_capture = capture.clone();

            if let Some(kind) = detect_wait(&capture) {
                debug!(task = %self.task_name, kind = kind.as_str(), "detected waiting state");
                self.enter_waiting(&capture)?;
            } else {
                self.notified_waiting = false;
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    fn is_terminal(&self, window_name: &str) -> bool {
        window_name.contains(&self.manager.config.status_icons.done) || window_name.contains(&self.manager.config.status_icons.warning)
    }

    fn is_waiting_icon(&self, window_name: &str) -> bool {
        window_name.contains(status_icon(&self.manager.config, Status::Waiting))
    }

    fn enter_waiting(&mut self, capture: &str) -> Result<()> {
        let waiting_name = format!(
            "{}{}{}",
            self.manager.config.window_prefix,
            status_icon(&self.manager.config, Status::Waiting),
            window_token(&self.task_name, self.manager.config.window_name_limit)
        );
        if let Err(e) = self.mux.rename_window(&self.window_id, &waiting_name) {
            warn!(task = %self.task_name, error = %e, "failed to rename window to waiting state");
        }

        if !self.notified_waiting {
            self.notifier.send_all("taw", &format!("{} is waiting for input", self.task_name));
            self.notifier.play_sound("waiting");
            self.notified_waiting = true;
        }

        if let Some(options) = parse_choice_options(capture) {
            self.dispatch_choice(&options)?;
        }
        Ok(())
    }

    fn dispatch_choice(&self, options: &[String]) -> Result<()> {
        let refs: Vec<&str> = options.iter().map(String::as_str).collect();
        let chosen = self
            .notifier
            .send_with_actions("taw: choose an option", &self.task_name, &refs, Duration::from_secs(30))
            .and_then(|i| options.get(i).cloned())
            .or_else(|| self.popup_choice(options));

        if let Some(label) = chosen {
            self.mux.send_keys_literal(&self.window_id, &label)?;
            self.mux.send_keys(&self.window_id, "Escape")?;
            self.mux.send_keys(&self.window_id, "Enter")?;
        }
        Ok(())
    }

    /// Fallback when no notification action was chosen: a modal popup
    /// driven by a generated shell script that writes the pick to a temp
    /// file, which we then read back.
    fn popup_choice(&self, options: &[String]) -> Option<String> {
        let tmp = tempfile::NamedTempFile::new().ok()?;
        let result_path = tmp.path().to_path_buf();
        let mut script = format!("#!/bin/sh\nset -e\nresult_file='{}'\n", result_path.display());
        script.push_str("echo 'Choose an option:'\n");
        for (i, opt) in options.iter().enumerate() {
            script.push_str(&format!("echo '{}) {}'\n", i + 1, opt.replace('\'', "'\\''")));
        }
        script.push_str("read -r choice\ncase \"$choice\" in\n");
        for (i, opt) in options.iter().enumerate() {
            script.push_str(&format!("  {}) printf '%s' '{}' > \"$result_file\" ;;\n", i + 1, opt.replace('\'', "'\\''")));
        }
        script.push_str("esac\n");

        let script_path = result_path.with_extension("sh");
        std::fs::write(&script_path, script).ok()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755));
        }

        let opts = crate::multiplexer::PopupOptions {
            title: "taw: choose an option",
            width: "60%",
            height: "40%",
            close_on_exit: true,
            start_dir: None,
        };
        self.mux.display_popup(&opts, &script_path.to_string_lossy()).ok()?;
        std::fs::read_to_string(&result_path).ok().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_exact_marker_near_tail() {
        let content = format!("some output\n{WAIT_MARKER}\n");
        assert_eq!(detect_wait(&content), Some(WaitKind::Marker));
    }

    #[test]
    fn marker_too_far_from_tail_is_missed() {
        let mut content = String::new();
        content.push_str(&format!("{WAIT_MARKER}\n"));
        for i in 0..20 {
            content.push_str(&format!("line {i}\n"));
        }
        assert_eq!(detect_wait(&content), None);
    }

    #[test]
    fn detects_ask_user_question() {
        let content = "thinking...\nAskUserQuestion: pick one\n";
        assert_eq!(detect_wait(content), Some(WaitKind::AskUserQuestion));
    }

    #[test]
    fn detects_ui_marker() {
        let content = "Pick an item\nEnter to select, Esc to cancel\n";
        assert_eq!(detect_wait(content), Some(WaitKind::AskUserQuestionUi));
    }

    #[test]
    fn detects_trailing_prompt_line() {
        let content = "Done with step 1.\n> ";
        assert_eq!(detect_wait(content), Some(WaitKind::Prompt));
    }

    #[test]
    fn no_wait_state_on_plain_output() {
        let content = "compiling...\nfinished in 1.2s\n";
        assert_eq!(detect_wait(content), None);
    }

    #[test]
    fn parses_numbered_choice_options() {
        let content = "Pick one:\n1. Yes\n2. No\n3. Cancel\n";
        let options = parse_choice_options(content).unwrap();
        assert_eq!(options, vec!["Yes", "No", "Cancel"]);
    }

    #[test]
    fn rejects_too_few_options() {
        let content = "1. Only one\n";
        assert_eq!(parse_choice_options(content), None);
    }
}
