//! Runner module - Execution abstraction layer
//!
//! This module provides a unified interface for running one external
//! process (compiler or submitted program) under resource limits:
//! - `SandboxedRunner`: process-group isolated, rlimit-bounded execution
//!
//! The runner module does NOT:
//! - Compare outputs or determine verdicts
//! - Know about languages or compilation
//! - Create or delete workspaces

pub mod process_group;
pub mod sandboxed;
pub mod usage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::utils::lossy;
use crate::core::Result;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self {
            program,
            args: iter.cloned().collect(),
            work_dir: None,
        }
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Resource limits for one process invocation
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// CPU and wall-clock time limit in milliseconds
    pub time_ms: u32,
    /// Memory limit (peak resident set) in MB
    pub memory_mb: u32,
    /// Captured stdout cap; exceeding it kills the process
    pub output_bytes: usize,
    /// Captured stderr cap; overflow is dropped
    pub stderr_bytes: usize,
    /// RLIMIT_FSIZE in KB
    pub file_size_kb: u32,
}

impl RunLimits {
    pub fn new(time_ms: u32, memory_mb: u32) -> Self {
        Self {
            time_ms,
            memory_mb,
            ..Self::default()
        }
    }

    pub fn with_output_limit(mut self, output_bytes: usize, stderr_bytes: usize) -> Self {
        self.output_bytes = output_bytes;
        self.stderr_bytes = stderr_bytes;
        self
    }

    pub fn with_file_size_limit(mut self, file_size_kb: u32) -> Self {
        self.file_size_kb = file_size_kb;
        self
    }

    pub fn memory_kb(&self) -> u64 {
        u64::from(self.memory_mb) * 1024
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            time_ms: 1000,
            memory_mb: 256,
            output_bytes: 64 * 1024 * 1024,
            stderr_bytes: 64 * 1024,
            file_size_kb: 262144,
        }
    }
}

/// Outcome tag of a single process run (raw, no verdict interpretation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Exited with status 0 within all limits
    Completed,
    /// Wall-clock or CPU time limit exceeded
    TimedOut,
    MemoryExceeded,
    /// Stdout exceeded its cap
    OutputTooLarge,
    CrashedNonZeroExit(i32),
    KilledBySignal(i32),
}

/// Result of running one process
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    /// Captured stdout (bounded)
    pub stdout: Vec<u8>,
    /// Captured stderr (bounded)
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Wall-clock duration in milliseconds
    pub wall_time_ms: u64,
    /// CPU time used in milliseconds (sampled)
    pub cpu_time_ms: u64,
    /// Peak resident memory in KB (sampled)
    pub peak_memory_kb: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    pub fn stdout_text(&self) -> String {
        lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> String {
        lossy(&self.stderr)
    }
}

/// Runner trait for executing programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command with the given limits and optional stdin
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&[u8]>,
    ) -> Result<ExecutionResult>;
}

// Re-exports
pub use sandboxed::SandboxedRunner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_from_vec() {
        let cmd = CommandSpec::from_vec(&["python3".to_string(), "main.py".to_string()]);
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["main.py"]);
        assert_eq!(cmd.to_vec(), vec!["python3", "main.py"]);
    }

    #[test]
    fn test_run_limits_builder() {
        let limits = RunLimits::new(500, 64)
            .with_output_limit(1024, 512);
        assert_eq!(limits.memory_kb(), 64 * 1024);
        assert_eq!(limits.output_bytes, 1024);
        assert_eq!(limits.file_size_kb, RunLimits::default().file_size_kb);
    }
}
