//! The interactive coding-agent subprocess: readiness detection, input
//! injection, and the one-shot invocations used for task naming/summaries.

pub mod prompt;

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

use crate::multiplexer::Multiplexer;

const TASK_NAME_RE: &str = r"^[a-z0-9][a-z0-9-]{6,30}[a-z0-9]$";

/// Readiness patterns: substrings seen in an agent's pane once it has
/// finished booting and is ready to receive the task prompt.
const READY_PATTERNS: &[&str] = &[
    "Trust the files",
    "? for shortcuts",
    "\u{2502}", // box-drawing vertical bar used by framed prompt UIs
    "\u{256d}", // rounded box-drawing corner
];

pub struct AgentClient {
    pub command: String,
    pub models: Vec<String>,
}

impl AgentClient {
    pub fn new(command: String, models: Vec<String>) -> Self {
        Self { command, models }
    }

    /// Invoke the agent non-interactively with an escalating model list,
    /// each attempt bounded by `timeout`. Returns the first attempt whose
    /// output is non-empty.
    fn one_shot(&self, prompt: &str, timeout: Duration) -> Result<String> {
        for model in &self.models {
            match self.one_shot_attempt(prompt, model, timeout) {
                Ok(out) if !out.trim().is_empty() => return Ok(out.trim().to_string()),
                Ok(_) => debug!(model, "one-shot invocation returned empty output"),
                Err(e) => warn!(model, error = %e, "one-shot invocation failed"),
            }
        }
        Err(anyhow!("all model attempts failed or returned empty output"))
    }

    fn one_shot_attempt(&self, prompt: &str, model: &str, timeout: Duration) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["-p", prompt, "--model", model])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.command))?;

        match child.wait_timeout(timeout)? {
            Some(_status) => {
                let output = child.wait_with_output()?;
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(anyhow!("one-shot invocation timed out after {:?}", timeout))
            }
        }
    }

    /// Generate a task name from its content. Falls back to the caller on
    /// all-attempts failure (the caller uses a pid-derived name).
    pub fn generate_task_name(&self, content: &str) -> Option<String> {
        let prompt = format!(
            "Summarize the following task as a short kebab-case slug (7-30 lowercase \
             letters/digits/hyphens, no leading/trailing hyphen). Reply with only the slug.\n\n{content}"
        );
        let raw = self.one_shot(&prompt, Duration::from_secs(20)).ok()?;
        sanitize_task_name(&raw)
    }

    /// Summarize a pane capture for the task's history record. Best-effort:
    /// empty string on failure.
    pub fn generate_summary(&self, capture: &str) -> String {
        let tail: String = capture.lines().rev().take(200).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n");
        let prompt = format!(
            "Summarize in one sentence what this coding session accomplished:\n\n{tail}"
        );
        self.one_shot(&prompt, Duration::from_secs(15)).unwrap_or_default()
    }

    /// Poll a pane until its content matches a readiness pattern, using
    /// exponential backoff capped at 2s, bounded by `timeout`.
    pub fn wait_for_ready(&self, mux: &dyn Multiplexer, pane_id: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let mut backoff = Duration::from_millis(100);
        let mut empty_polls = 0;

        loop {
            if start.elapsed() > timeout {
                return Err(anyhow!("agent pane did not become ready within {:?}", timeout));
            }
            match mux.capture_pane(pane_id, 100).map(|c| crate::multiplexer::clean_capture(&c)) {
                Ok(capture) if capture.trim().is_empty() => {
                    empty_polls += 1;
                    if empty_polls % 10 == 0 {
                        debug!(pane_id, empty_polls, "agent pane still empty");
                    }
                }
                Ok(capture) => {
                    if READY_PATTERNS.iter().any(|p| capture.contains(p)) {
                        return Ok(());
                    }
                }
                Err(e) => trace!(pane_id, error = %e, "capture_pane failed while waiting for ready"),
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_secs(2));
        }
    }

    /// Verify the pane exists and shows any non-whitespace content.
    pub fn verify_pane_alive(&self, mux: &dyn Multiplexer, pane_id: &str, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if let Ok(true) = mux.has_pane(pane_id)
                && let Ok(capture) = mux.capture_pane(pane_id, 20)
                && !capture.trim().is_empty()
            {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    /// If the pane shows a trust-workspace prompt, answer it.
    pub fn send_trust_response(&self, mux: &dyn Multiplexer, pane_id: &str) {
        if let Ok(capture) = mux.capture_pane(pane_id, 40)
            && capture.contains("Do you trust the files")
        {
            let _ = mux.send_keys_literal(pane_id, "y");
            let _ = mux.send_keys(pane_id, "Enter");
        }
    }

    /// Send `text` to the pane, retrying up to `max_retries` times if the
    /// pane content doesn't change after sending (the agent's multi-line
    /// submit convention is literal text, then Escape, then Enter).
    pub fn send_input_with_retry(
        &self,
        mux: &dyn Multiplexer,
        pane_id: &str,
        text: &str,
        max_retries: u32,
    ) -> Result<()> {
        for attempt in 0..max_retries {
            let before = mux.capture_pane(pane_id, 20).unwrap_or_default();
            mux.send_keys_literal(pane_id, text)?;
            mux.send_keys(pane_id, "Escape")?;
            mux.send_keys(pane_id, "Enter")?;
            std::thread::sleep(Duration::from_millis(300));
            let after = mux.capture_pane(pane_id, 20).unwrap_or_default();
            if after != before {
                return Ok(());
            }
            warn!(pane_id, attempt, "send_input appears to have had no effect, retrying");
        }
        Err(anyhow!("failed to deliver input to pane {pane_id} after {max_retries} attempts"))
    }

    /// True unless the pane's foreground process looks like a bare shell
    /// (meaning the agent exited and control returned to the shell).
    pub fn is_agent_running(&self, mux: &dyn Multiplexer, pane_id: &str) -> bool {
        match mux.get_pane_command(pane_id) {
            Ok(cmd) => !crate::multiplexer::is_shell_command(&cmd),
            Err(_) => false,
        }
    }
}

/// Lowercase, strip to `[a-z0-9-]`, collapse/trim hyphens, truncate to 32
/// chars, and accept only if the task-name grammar matches.
pub fn sanitize_task_name(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut cleaned = String::new();
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            cleaned.push(c);
        } else if c.is_whitespace() || c == '_' {
            cleaned.push('-');
        }
    }
    let collapsed = Regex::new("-{2,}").unwrap().replace_all(&cleaned, "-").to_string();
    let trimmed = collapsed.trim_matches('-');
    let truncated: String = trimmed.chars().take(32).collect();
    let truncated = truncated.trim_end_matches('-');

    let re = Regex::new(TASK_NAME_RE).unwrap();
    if re.is_match(truncated) {
        Some(truncated.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_spaces_and_case() {
        assert_eq!(sanitize_task_name("Fix Login Bug"), Some("fix-login-bug".to_string()));
    }

    #[test]
    fn collapses_repeated_separators() {
        assert_eq!(
            sanitize_task_name("fix___login---bug"),
            Some("fix-login-bug".to_string())
        );
    }

    #[test]
    fn rejects_too_short_names() {
        assert_eq!(sanitize_task_name("fix"), None);
    }

    #[test]
    fn truncates_long_names() {
        let long = "a-very-very-very-long-task-name-that-exceeds-the-limit";
        let result = sanitize_task_name(long).unwrap();
        assert!(result.len() <= 32);
        assert!(!result.ends_with('-'));
    }

    #[test]
    fn rejects_leading_digit_only_if_grammar_violated() {
        assert_eq!(sanitize_task_name("   "), None);
    }
}
