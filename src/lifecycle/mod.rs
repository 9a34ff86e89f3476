//! The end-to-end task flows: spawn, handle, end, cancel, and the
//! merge-completed sweep. Each flow is its own short-lived process;
//! state is communicated exclusively through the on-disk task directory.

pub mod cancel;
pub mod end;
pub mod handle;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::warn;

use crate::errors::TaskError;

/// Holds `merge.lock` in the state directory for the lifetime of the guard,
/// releasing it on drop regardless of how the scope exits. `O_CREATE|O_EXCL`
/// makes acquisition atomic across the multiple short-lived processes that
/// can race to merge at once.
pub struct MergeLock {
    path: PathBuf,
}

impl MergeLock {
    /// Retry for up to `timeout`, sleeping `interval` between attempts.
    pub fn acquire(state_dir: &Path, holder: &str, timeout: Duration, interval: Duration) -> Result<Self> {
        let path = state_dir.join("merge.lock");
        let start = Instant::now();
        loop {
            use std::fs::OpenOptions;
            use std::io::Write;
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(mut f) => {
                    if write!(f, "{}\n{}", holder, std::process::id()).is_err() {
                        let _ = fs::remove_file(&path);
                    } else {
                        return Ok(Self { path });
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e).context("failed to create merge lock"),
            }
            if start.elapsed() > timeout {
                return Err(TaskError::TimedOut("merge lock".to_string()).into());
            }
            std::thread::sleep(interval);
        }
    }
}

impl Drop for MergeLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to release merge lock");
        }
    }
}

/// Save a combined history record for a finished or cancelled task.
pub fn save_history(
    state_dir: &Path,
    task_name: &str,
    content: &str,
    summary: &str,
    capture: &str,
    label: &str,
) -> Result<()> {
    let history_dir = state_dir.join("history");
    fs::create_dir_all(&history_dir)?;
    let ts = now_as_yymmdd_hhmmss();
    let path = history_dir.join(format!("{ts}_{task_name}"));
    let record = format!(
        "# {label}: {task_name}\n\n## Task\n\n{content}\n\n## Summary\n\n{summary}\n\n## Session capture\n\n{capture}\n"
    );
    crate::store::write_atomic(&path, &record)
}

/// Calendar timestamp in `YYMMDD_HHMMSS` (UTC), matching the history-record
/// naming convention. Converts the epoch seconds by hand since this isn't
/// otherwise a project that carries a date/time crate.
fn now_as_yymmdd_hhmmss() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let day_secs = secs % 86_400;
    let (hour, minute, second) = (day_secs / 3600, (day_secs % 3600) / 60, day_secs % 60);
    format!("{:02}{:02}{:02}_{:02}{:02}{:02}", year % 100, month, day, hour, minute, second)
}

/// Howard Hinnant's days-since-epoch-to-civil-date algorithm, returns
/// `(year, month, day)`.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { y + 1 } else { y };
    (year, month, day)
}

/// Scan windows for the *done* emoji prefix and run the End flow for each.
pub fn merge_completed(
    manager: &crate::manager::TaskManager,
    mux: &dyn crate::multiplexer::Multiplexer,
    agent: &crate::agent::AgentClient,
    notifier: &crate::notify::Notifier,
) -> Result<()> {
    let done_icon = manager.config.status_icons.done.clone();
    for (window_id, name) in mux.list_windows()? {
        if !name.contains(&done_icon) {
            continue;
        }
        if let Err(e) = end::run(manager, mux, agent, notifier, &window_id, None) {
            warn!(window_id, error = %e, "failed to end a completed task during sweep");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::civil_from_days;

    #[test]
    fn civil_from_days_matches_known_epoch_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_716), (2023, 12, 25));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
    }
}
