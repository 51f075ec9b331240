//! Error taxonomy for the judging core
//!
//! Everything here is *system-caused*: a problem with the service, not with
//! the submitted program. Submission-caused failures never become a
//! `JudgeError`; they are verdicts.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = JudgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid submission id {0:?}")]
    InvalidSubmissionId(String),

    #[error("workspace already exists for submission {id} at {path}")]
    WorkspaceConflict { id: String, path: PathBuf },

    #[error("toolchain binary `{0}` is not installed")]
    ToolchainMissing(String),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("illegal pipeline transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("job {0} was cancelled before it started")]
    Cancelled(String),

    #[error("scheduler is shut down")]
    SchedulerClosed,

    #[error("worker crashed while judging {0}")]
    WorkerPanicked(String),
}

impl JudgeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        JudgeError::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the workspace should be kept on disk for post-mortem.
    ///
    /// Only filesystem and executor faults qualify; configuration problems
    /// (unknown language, missing compiler) would otherwise leave one
    /// directory behind per submission.
    pub fn retains_workspace(&self) -> bool {
        matches!(
            self,
            JudgeError::Io { .. } | JudgeError::Spawn { .. } | JudgeError::IllegalTransition { .. }
        )
    }

    /// Short machine-readable cause, used in operator logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            JudgeError::UnsupportedLanguage(_) => "unsupported_language",
            JudgeError::InvalidSubmissionId(_) => "invalid_submission_id",
            JudgeError::WorkspaceConflict { .. } => "workspace_conflict",
            JudgeError::ToolchainMissing(_) => "toolchain_missing",
            JudgeError::Spawn { .. } => "spawn_failed",
            JudgeError::Io { .. } => "filesystem",
            JudgeError::IllegalTransition { .. } => "illegal_transition",
            JudgeError::Cancelled(_) => "cancelled",
            JudgeError::SchedulerClosed => "scheduler_closed",
            JudgeError::WorkerPanicked(_) => "worker_panicked",
        }
    }
}
