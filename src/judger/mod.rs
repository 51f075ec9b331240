//! Judger module for processing submissions
//!
//! One `Judger` is shared by all workers. Every `judge` / `run_program`
//! call owns a fresh workspace and pipeline, so concurrent submissions
//! share nothing but the runner.

pub mod state;

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::comparator::{compare, Comparison};
use crate::compiler::compile_user_code;
use crate::config::JudgeConfig;
use crate::core::utils::excerpt;
use crate::core::{JudgeError, ProgramRun, ResourceLimits, Result, Submission, TestCase, Verdict};
use crate::languages::{Language, Toolchain, ToolchainKind};
use crate::runner::{CommandSpec, ExecutionResult, Outcome, RunLimits, Runner, SandboxedRunner};
use crate::workspace::{Workspace, WorkspaceManager};
use state::{FailureReason, Pipeline, PipelineState};

/// What a submitter sees for a system-caused failure; details go to the log
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Internal error while judging this submission. It has been reported to the operator.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseReport {
    /// 1-based position in the submission's test list
    pub test: usize,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used_kb: Option<u64>,
    /// Program output preview, capped like the other excerpts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl TestCaseReport {
    fn skipped(test: usize) -> Self {
        Self {
            test,
            verdict: Verdict::Skipped,
            execution_time_ms: None,
            memory_used_kb: None,
            output: None,
        }
    }
}

/// Verdict delivery record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub id: String,
    pub verdict: Verdict,
    pub execution_time_ms: Option<u64>,
    pub memory_used_mb: Option<u64>,
    pub stdout_excerpt: Option<String>,
    pub stderr_excerpt: Option<String>,
    pub diagnostic_message: Option<String>,
    /// Cause of an InternalError (`unsupported_language`, `filesystem`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub passed_tests: usize,
    pub total_tests: usize,
    pub failed_test: Option<usize>,
    pub test_results: Vec<TestCaseReport>,
}

impl JudgeReport {
    fn without_run(id: &str, verdict: Verdict, total_tests: usize) -> Self {
        Self {
            id: id.to_string(),
            verdict,
            execution_time_ms: None,
            memory_used_mb: None,
            stdout_excerpt: None,
            stderr_excerpt: None,
            diagnostic_message: None,
            error_kind: None,
            passed_tests: 0,
            total_tests,
            failed_test: None,
            test_results: (1..=total_tests).map(TestCaseReport::skipped).collect(),
        }
    }

    /// Report for a system-caused failure; carries no fault details
    pub fn internal(id: &str, err: &JudgeError, total_tests: usize) -> Self {
        Self {
            diagnostic_message: Some(INTERNAL_ERROR_MESSAGE.to_string()),
            error_kind: Some(err.kind().to_string()),
            ..Self::without_run(id, Verdict::InternalError, total_tests)
        }
    }

    fn compile_error(id: &str, message: String, total_tests: usize) -> Self {
        Self {
            diagnostic_message: Some(message),
            ..Self::without_run(id, Verdict::CompileError, total_tests)
        }
    }
}

/// Result of a run-only job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub id: String,
    /// Compiled and exited with status 0 within all limits
    pub success: bool,
    pub outcome: Option<Outcome>,
    pub stdout: String,
    pub stderr: String,
    /// Compiler diagnostics (errors, or warnings of a successful build)
    pub compile_output: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub memory_used_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl RunReport {
    fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            outcome: None,
            stdout: String::new(),
            stderr: String::new(),
            compile_output: None,
            execution_time_ms: None,
            memory_used_mb: None,
            diagnostic_message: None,
            error_kind: None,
        }
    }

    pub fn internal(id: &str, err: &JudgeError) -> Self {
        Self {
            diagnostic_message: Some(INTERNAL_ERROR_MESSAGE.to_string()),
            error_kind: Some(err.kind().to_string()),
            ..Self::empty(id)
        }
    }
}

enum Build {
    Ready {
        toolchain: Toolchain,
        compile_output: Option<String>,
    },
    CompileError(String),
}

pub struct Judger {
    config: Arc<JudgeConfig>,
    workspaces: WorkspaceManager,
    runner: Arc<dyn Runner>,
}

impl Judger {
    /// Judger backed by the sandboxed process runner
    pub async fn new(config: JudgeConfig) -> Result<Self> {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone()).await?;
        let runner = Arc::new(SandboxedRunner::new(Duration::from_millis(
            config.memory_poll_interval_ms,
        )));
        Ok(Self::with_runner(config, workspaces, runner))
    }

    pub fn with_runner(
        config: JudgeConfig,
        workspaces: WorkspaceManager,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            workspaces,
            runner,
        }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Judge one submission. Never fails: system faults become an
    /// InternalError report.
    pub async fn judge(&self, mut submission: Submission) -> JudgeReport {
        if submission.test_cases.is_empty() {
            submission.test_cases.push(TestCase {
                input: String::new(),
                expected_output: String::new(),
            });
        }
        let total = submission.test_cases.len();
        let mut pipeline = Pipeline::new(&submission.id);

        // Rejected before any workspace exists
        let language = match Language::from_tag(&submission.language) {
            Ok(language) => language,
            Err(e) => {
                self.record_internal(&submission.id, &mut pipeline, &e);
                return JudgeReport::internal(&submission.id, &e, total);
            }
        };
        let workspace = match self.workspaces.acquire_with_retry(&submission.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                self.record_internal(&submission.id, &mut pipeline, &e);
                return JudgeReport::internal(&submission.id, &e, total);
            }
        };

        let result = self
            .judge_in(&mut pipeline, &workspace, language, &submission)
            .await;
        self.close_workspace(workspace, result.as_ref().err()).await;

        result.unwrap_or_else(|e| {
            self.record_internal(&submission.id, &mut pipeline, &e);
            JudgeReport::internal(&submission.id, &e, total)
        })
    }

    /// Compile and run a program on the given input without judging it
    pub async fn run_program(&self, program: ProgramRun) -> RunReport {
        let mut pipeline = Pipeline::new(&program.id);

        let language = match Language::from_tag(&program.language) {
            Ok(language) => language,
            Err(e) => {
                self.record_internal(&program.id, &mut pipeline, &e);
                return RunReport::internal(&program.id, &e);
            }
        };
        let workspace = match self.workspaces.acquire_with_retry(&program.id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                self.record_internal(&program.id, &mut pipeline, &e);
                return RunReport::internal(&program.id, &e);
            }
        };

        let result = self
            .run_in(&mut pipeline, &workspace, language, &program)
            .await;
        self.close_workspace(workspace, result.as_ref().err()).await;

        result.unwrap_or_else(|e| {
            self.record_internal(&program.id, &mut pipeline, &e);
            RunReport::internal(&program.id, &e)
        })
    }

    async fn judge_in(
        &self,
        pipeline: &mut Pipeline,
        workspace: &Workspace,
        language: Language,
        submission: &Submission,
    ) -> Result<JudgeReport> {
        let total = submission.test_cases.len();
        let excerpt_limit = self.config.excerpt_limit_bytes();

        let toolchain = match self
            .build(pipeline, workspace, language, &submission.source_code)
            .await?
        {
            Build::Ready { toolchain, .. } => toolchain,
            Build::CompileError(message) => {
                info!("Job summary: submission_id={}, verdict=compile_error", submission.id);
                return Ok(JudgeReport::compile_error(
                    &submission.id,
                    excerpt(&message, excerpt_limit),
                    total,
                ));
            }
        };

        let limits = self.run_limits(
            &toolchain,
            &submission.limits,
            submission.ignore_limit_bonus,
        );
        let command = run_command(&toolchain, &limits, workspace);

        let mut test_results = Vec::with_capacity(total);
        let mut verdict = Verdict::Accepted;
        let mut last_run: Option<ExecutionResult> = None;
        let mut max_time = 0u64;
        let mut max_memory_kb = 0u64;

        for (index, case) in submission.test_cases.iter().enumerate() {
            let execution = self
                .runner
                .run(&command, &limits, Some(case.input.as_bytes()))
                .await?;
            let case_verdict = verdict_for(execution.outcome, || {
                compare(
                    &execution.stdout,
                    case.expected_output.as_bytes(),
                    submission.comparison_mode,
                )
            });

            max_time = max_time.max(execution.wall_time_ms);
            max_memory_kb = max_memory_kb.max(execution.peak_memory_kb);

            let output_preview = if execution.stdout.is_empty() {
                None
            } else {
                Some(excerpt(&execution.stdout_text(), excerpt_limit))
            };
            test_results.push(TestCaseReport {
                test: index + 1,
                verdict: case_verdict,
                execution_time_ms: Some(execution.wall_time_ms),
                memory_used_kb: Some(execution.peak_memory_kb),
                output: output_preview,
            });
            last_run = Some(execution);

            if case_verdict != Verdict::Accepted {
                verdict = case_verdict;
                break;
            }
        }

        // Mark remaining test cases as skipped after early termination
        for index in test_results.len()..total {
            test_results.push(TestCaseReport::skipped(index + 1));
        }

        pipeline.advance(PipelineState::Completed(verdict))?;

        let passed_tests = test_results
            .iter()
            .filter(|r| r.verdict == Verdict::Accepted)
            .count();
        let failed_test = test_results
            .iter()
            .find(|r| !matches!(r.verdict, Verdict::Accepted | Verdict::Skipped))
            .map(|r| r.test);

        info!(
            "Job summary: submission_id={}, verdict={}, passed={}/{}, max_time_ms={}, max_memory_kb={}",
            submission.id, verdict, passed_tests, total, max_time, max_memory_kb
        );

        let (stdout_excerpt, stderr_excerpt, diagnostic_message) = match &last_run {
            Some(run) => (
                Some(excerpt(&run.stdout_text(), excerpt_limit)),
                Some(excerpt(&run.stderr_text(), excerpt_limit)),
                diagnostic(verdict, run, &limits, failed_test.unwrap_or(total))
                    .map(|message| excerpt(&message, excerpt_limit)),
            ),
            None => (None, None, None),
        };

        Ok(JudgeReport {
            id: submission.id.clone(),
            verdict,
            execution_time_ms: Some(max_time),
            memory_used_mb: Some(max_memory_kb.div_ceil(1024)),
            stdout_excerpt,
            stderr_excerpt,
            diagnostic_message,
            error_kind: None,
            passed_tests,
            total_tests: total,
            failed_test,
            test_results,
        })
    }

    async fn run_in(
        &self,
        pipeline: &mut Pipeline,
        workspace: &Workspace,
        language: Language,
        program: &ProgramRun,
    ) -> Result<RunReport> {
        let (toolchain, compile_output) = match self
            .build(pipeline, workspace, language, &program.source_code)
            .await?
        {
            Build::Ready {
                toolchain,
                compile_output,
            } => (toolchain, compile_output),
            Build::CompileError(message) => {
                return Ok(RunReport {
                    compile_output: Some(excerpt(&message, self.config.excerpt_limit_bytes())),
                    ..RunReport::empty(&program.id)
                });
            }
        };

        let limits = self.run_limits(&toolchain, &program.limits, false);
        let command = run_command(&toolchain, &limits, workspace);
        let execution = self
            .runner
            .run(&command, &limits, Some(program.stdin.as_bytes()))
            .await?;

        pipeline.advance(PipelineState::Completed(verdict_for(
            execution.outcome,
            || Comparison::Match,
        )))?;
        info!(
            "Run summary: id={}, outcome={:?}, time_ms={}",
            program.id, execution.outcome, execution.wall_time_ms
        );

        Ok(RunReport {
            id: program.id.clone(),
            success: execution.is_success(),
            outcome: Some(execution.outcome),
            stdout: execution.stdout_text(),
            stderr: execution.stderr_text(),
            compile_output,
            execution_time_ms: Some(execution.wall_time_ms),
            memory_used_mb: Some(execution.peak_memory_kb.div_ceil(1024)),
            diagnostic_message: None,
            error_kind: None,
        })
    }

    /// Materialize the source and compile it if the toolchain needs to.
    /// Leaves the pipeline in `Running` or `Failed(CompileError)`.
    async fn build(
        &self,
        pipeline: &mut Pipeline,
        workspace: &Workspace,
        language: Language,
        source: &str,
    ) -> Result<Build> {
        let toolchain = Toolchain::resolve(language, source, &self.config);
        workspace
            .materialize(&toolchain.source_file, source.as_bytes())
            .await?;

        if toolchain.kind() != ToolchainKind::Interpreted {
            pipeline.advance(PipelineState::Compiling)?;
        }
        let mut compile_output = None;
        match compile_user_code(self.runner.as_ref(), workspace, &toolchain, &self.config).await? {
            None => {}
            Some(result) if result.success => {
                pipeline.advance(PipelineState::Compiled)?;
                let warnings = result.execution.stderr_text();
                compile_output = (!warnings.trim().is_empty()).then_some(warnings);
            }
            Some(result) => {
                pipeline.advance(PipelineState::Failed(FailureReason::CompileError))?;
                return Ok(Build::CompileError(result.message.unwrap_or_default()));
            }
        }

        pipeline.advance(PipelineState::Running)?;
        Ok(Build::Ready {
            toolchain,
            compile_output,
        })
    }

    fn run_limits(
        &self,
        toolchain: &Toolchain,
        limits: &ResourceLimits,
        ignore_bonus: bool,
    ) -> RunLimits {
        let (time_ms, memory_mb) = if ignore_bonus {
            (limits.time_limit_ms, limits.memory_limit_mb)
        } else {
            (
                toolchain.calculate_time_limit(limits.time_limit_ms),
                toolchain.calculate_memory_limit(limits.memory_limit_mb),
            )
        };
        RunLimits::new(time_ms, memory_mb)
            .with_output_limit(
                limits.output_limit_kb as usize * 1024,
                self.config.stderr_limit_kb as usize * 1024,
            )
            .with_file_size_limit(self.config.file_size_limit_kb)
    }

    /// Release the workspace, or keep it for post-mortem after a fault
    /// that calls for it
    async fn close_workspace(&self, mut workspace: Workspace, fault: Option<&JudgeError>) {
        let closed = match fault {
            Some(e) if e.retains_workspace() => workspace.retain(&e.to_string()).await,
            _ => workspace.release().await,
        };
        if let Err(e) = closed {
            error!("Failed to clean up workspace {}: {}", workspace.id(), e);
        }
    }

    fn record_internal(&self, id: &str, pipeline: &mut Pipeline, err: &JudgeError) {
        error!(
            "Internal error while processing {} in state {} [{}]: {}",
            id,
            pipeline.state(),
            err.kind(),
            err
        );
        pipeline.fail(FailureReason::Internal(err.kind()));
    }
}

fn run_command(toolchain: &Toolchain, limits: &RunLimits, workspace: &Workspace) -> CommandSpec {
    CommandSpec::from_vec(&toolchain.run_command(limits.memory_mb, workspace.path()))
        .with_work_dir(workspace.path())
}

/// Map a run's outcome tag to a verdict; output is only compared for a
/// clean exit
pub fn verdict_for(outcome: Outcome, compare_output: impl FnOnce() -> Comparison) -> Verdict {
    match outcome {
        Outcome::Completed => match compare_output() {
            Comparison::Match => Verdict::Accepted,
            Comparison::Mismatch => Verdict::WrongAnswer,
        },
        Outcome::TimedOut => Verdict::TimeLimitExceeded,
        Outcome::MemoryExceeded => Verdict::MemoryLimitExceeded,
        Outcome::OutputTooLarge => Verdict::OutputLimitExceeded,
        Outcome::CrashedNonZeroExit(_) | Outcome::KilledBySignal(_) => Verdict::RuntimeError,
    }
}

fn diagnostic(
    verdict: Verdict,
    execution: &ExecutionResult,
    limits: &RunLimits,
    test: usize,
) -> Option<String> {
    let message = match verdict {
        Verdict::Accepted | Verdict::Skipped | Verdict::CompileError | Verdict::InternalError => {
            return None
        }
        Verdict::WrongAnswer => format!("Wrong answer on test {}", test),
        Verdict::TimeLimitExceeded => {
            format!("Time limit of {}ms exceeded on test {}", limits.time_ms, test)
        }
        Verdict::MemoryLimitExceeded => {
            format!("Memory limit of {}MB exceeded on test {}", limits.memory_mb, test)
        }
        Verdict::OutputLimitExceeded => format!(
            "Output limit of {}KB exceeded on test {}",
            limits.output_bytes / 1024,
            test
        ),
        Verdict::RuntimeError => {
            let cause = match execution.outcome {
                Outcome::KilledBySignal(sig) => format!("killed by {}", signal_name(sig)),
                Outcome::CrashedNonZeroExit(code) => format!("exited with code {}", code),
                _ => "crashed".to_string(),
            };
            let stderr = execution.stderr_text();
            if stderr.trim().is_empty() {
                format!("Runtime error on test {}: {}", test, cause)
            } else {
                format!("Runtime error on test {}: {}\n{}", test, cause, stderr)
            }
        }
    };
    Some(message)
}

fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {}", sig))
}
