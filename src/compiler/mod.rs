//! Compiler module - Source code compilation
//!
//! Runs a toolchain's compile step inside the submission's workspace
//! through the same `Runner` as user programs, with the compile limits from
//! the configuration. Interpreted toolchains never get here.

use tracing::debug;

use crate::config::JudgeConfig;
use crate::core::Result;
use crate::languages::Toolchain;
use crate::runner::{CommandSpec, ExecutionResult, Outcome, RunLimits, Runner};
use crate::workspace::Workspace;

/// Result of a compilation attempt
#[derive(Debug)]
pub struct CompileResult {
    pub success: bool,
    /// Compiler diagnostics on failure
    pub message: Option<String>,
    /// Raw execution of the compiler
    pub execution: ExecutionResult,
}

/// Compile user-submitted code
///
/// Success means exit status zero *and* the expected artifact on disk.
/// A compile that fails for any other reason is the submission's fault;
/// only spawn and filesystem problems come back as `Err`.
pub async fn compile_user_code(
    runner: &dyn Runner,
    workspace: &Workspace,
    toolchain: &Toolchain,
    config: &JudgeConfig,
) -> Result<Option<CompileResult>> {
    let Some(compile_cmd) = &toolchain.compile_command else {
        return Ok(None);
    };

    debug!("Compiling with {:?} in {:?}", compile_cmd, workspace.path());

    let spec = CommandSpec::from_vec(compile_cmd).with_work_dir(workspace.path());
    let limits = RunLimits::new(config.compile_time_limit_ms, config.compile_memory_limit_mb)
        .with_output_limit(
            config.compile_output_limit_kb as usize * 1024,
            config.compile_output_limit_kb as usize * 1024,
        )
        .with_file_size_limit(config.file_size_limit_kb);

    let execution = runner.run(&spec, &limits, None).await?;

    let artifact_present = match &toolchain.artifact {
        Some(artifact) => workspace.contains(artifact).await,
        None => true,
    };
    let success = execution.outcome == Outcome::Completed && artifact_present;

    let message = (!success).then(|| compile_error_message(&execution, artifact_present));
    Ok(Some(CompileResult {
        success,
        message,
        execution,
    }))
}

fn compile_error_message(execution: &ExecutionResult, artifact_present: bool) -> String {
    let stderr = execution.stderr_text();
    if !stderr.trim().is_empty() {
        return stderr;
    }
    let stdout = execution.stdout_text();
    if !stdout.trim().is_empty() {
        return stdout;
    }
    match execution.outcome {
        Outcome::TimedOut => "Compilation timed out".to_string(),
        Outcome::MemoryExceeded => "Compiler exceeded its memory limit".to_string(),
        Outcome::OutputTooLarge => "Compiler output too large".to_string(),
        Outcome::KilledBySignal(sig) => format!("Compiler crashed (signal {})", sig),
        Outcome::CrashedNonZeroExit(code) => {
            format!("Compilation failed with exit code {}", code)
        }
        Outcome::Completed if !artifact_present => "Executable file was not created".to_string(),
        Outcome::Completed => "Compilation failed".to_string(),
    }
}
