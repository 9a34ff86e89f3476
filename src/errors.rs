use std::fmt;

/// The small set of error kinds the lifecycle engine branches on.
///
/// Most failures just propagate as `anyhow::Error` with `.context()`; this
/// enum exists only for the handful of call sites that need to match on
/// *why* something failed rather than just log and bail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    VcsConflict,
    SubprocessFailure,
    Timeout,
    Corruption,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::VcsConflict => "vcs-conflict",
            ErrorKind::SubprocessFailure => "subprocess-failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Corruption => "corruption",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task already bound to a window")]
    AlreadyBound,

    #[error("merge lock held by another process")]
    MergeLockHeld,

    #[error("vcs operation left a conflict requiring manual resolution: {0}")]
    VcsConflict(String),

    #[error("worktree is corrupted: {0}")]
    Corrupted(String),

    #[error("timed out waiting for {0}")]
    TimedOut(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::NotFound(_) => ErrorKind::NotFound,
            TaskError::AlreadyBound => ErrorKind::Conflict,
            TaskError::MergeLockHeld => ErrorKind::Conflict,
            TaskError::VcsConflict(_) => ErrorKind::VcsConflict,
            TaskError::Corrupted(_) => ErrorKind::Corruption,
            TaskError::TimedOut(_) => ErrorKind::Timeout,
        }
    }
}
