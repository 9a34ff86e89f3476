//! Best-effort notification fan-out: desktop popups, a terminal bell, and
//! up to two webhook endpoints. Every path here swallows and logs its own
//! failures — nothing in this module should ever abort a lifecycle flow.

use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::warn;

use crate::config::NotificationConfig;

pub struct Notifier {
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    pub fn send(&self, title: &str, body: &str) {
        if !self.config.desktop_enabled() {
            return;
        }
        if let Err(e) = send_desktop(title, body, &[]) {
            warn!(error = %e, "desktop notification failed");
        }
    }

    /// Send a desktop notification with action buttons; returns the index of
    /// the chosen action, or `None` on timeout/failure/no desktop support.
    #[cfg(target_os = "linux")]
    pub fn send_with_actions(&self, title: &str, body: &str, actions: &[&str], timeout: Duration) -> Option<usize> {
        if !self.config.desktop_enabled() {
            return None;
        }
        let mut notification = notify_rust::Notification::new();
        notification
            .summary(title)
            .body(body)
            .timeout(notify_rust::Timeout::Milliseconds(timeout.as_millis() as u32));
        let action_ids: Vec<String> = (0..actions.len()).map(|i| i.to_string()).collect();
        for (id, label) in action_ids.iter().zip(actions.iter()) {
            notification.action(id, label);
        }
        match notification.show() {
            Ok(handle) => {
                let mut chosen = None;
                handle.wait_for_action(|id| {
                    if let Ok(idx) = id.parse::<usize>() {
                        chosen = Some(idx);
                    }
                });
                chosen
            }
            Err(e) => {
                warn!(error = %e, "desktop notification with actions failed");
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn send_with_actions(&self, _title: &str, _body: &str, _actions: &[&str], _timeout: Duration) -> Option<usize> {
        None
    }

    /// Play a named sound by shelling out to the platform's bell/alert
    /// utility. Best-effort: missing utilities are silently ignored.
    pub fn play_sound(&self, kind: &str) {
        let cmd = if cfg!(target_os = "macos") {
            let sound = match kind {
                "start" => "Pop",
                "done" => "Glass",
                "waiting" => "Ping",
                _ => "Tink",
            };
            format!("afplay /System/Library/Sounds/{sound}.aiff")
        } else {
            "printf '\\a'".to_string()
        };
        if let Err(e) = Command::new("sh").arg("-c").arg(&cmd).stdout(Stdio::null()).stderr(Stdio::null()).status() {
            warn!(kind, error = %e, "failed to play notification sound");
        }
    }

    /// Fan out `title`/`body` to desktop and both configured webhooks,
    /// independently and without blocking on one failing the others.
    pub fn send_all(&self, title: &str, body: &str) {
        self.send(title, body);
        if let Some(url) = &self.config.webhook_url {
            send_webhook(url, title, body);
        }
        if let Some(url) = &self.config.webhook_url_2 {
            send_webhook(url, title, body);
        }
    }
}

fn send_desktop(title: &str, body: &str, actions: &[&str]) -> anyhow::Result<()> {
    let _ = actions;
    #[cfg(target_os = "linux")]
    {
        notify_rust::Notification::new().summary(title).body(body).show()?;
    }
    #[cfg(target_os = "macos")]
    {
        mac_notification_sys::send_notification(title, None, body, None)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    Ok(())
}

fn send_webhook(url: &str, title: &str, body: &str) {
    let payload = serde_json::json!({ "title": title, "body": body }).to_string();
    let result = Command::new("curl")
        .args(["-fsS", "-X", "POST", "-H", "Content-Type: application/json", "-d", &payload, "--max-time", "5", url])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(url, code = ?status.code(), "webhook notification returned non-zero exit"),
        Err(e) => warn!(url, error = %e, "failed to send webhook notification"),
    }
}
