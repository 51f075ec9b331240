//! Sandboxed runner implementation
//!
//! Executes one untrusted process (compiler or submitted program) as the
//! leader of its own process group, under rlimits, a wall-clock deadline,
//! a sampled memory ceiling and a stdout cap. Whatever ends the run, the
//! whole group is killed before `run` returns.

use async_trait::async_trait;
use nix::libc;
use nix::sys::signal::Signal;
use std::io::ErrorKind;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::process_group::{enter_sandbox, ChildLimits, ProcessGroup};
use super::usage::{own_high_water_kb, Usage, UsageMonitor};
use super::{CommandSpec, ExecutionResult, Outcome, RunLimits, Runner};
use crate::core::{JudgeError, Result};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How long pipe readers may keep draining after the group was killed
const READER_GRACE: Duration = Duration::from_millis(500);

/// Runner that executes code under process-group isolation and resource limits
pub struct SandboxedRunner {
    /// Memory/CPU sampling period
    poll_interval: Duration,
}

impl SandboxedRunner {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Run a command in the sandbox
    pub async fn execute(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin_content: Option<&[u8]>,
    ) -> Result<ExecutionResult> {
        let mut command = self.build_command(cmd, limits, stdin_content.is_some())?;

        debug!("Spawning {:?} with limits {:?}", cmd.to_vec(), limits);
        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => JudgeError::ToolchainMissing(cmd.program.clone()),
            _ => JudgeError::Spawn {
                program: cmd.program.clone(),
                source: e,
            },
        })?;

        let pid = child.id();
        let group = ProcessGroup::new(pid);
        // The leader is reaped by this task alone; wait4 also hands back
        // its resource usage
        let mut waiter = tokio::task::spawn_blocking(move || reap(pid as libc::pid_t));
        let spawner_hwm_kb = own_high_water_kb();
        let monitor = UsageMonitor::spawn(group.id(), limits.memory_kb(), self.poll_interval);

        let pipe_err = |e: std::io::Error| JudgeError::io(format!("attach pipes of `{}`", cmd.program), e);

        // Feed stdin from a separate task; a program that never reads its
        // input must not block us on a full pipe.
        let stdin_task = match (child.stdin.take(), stdin_content) {
            (Some(pipe), Some(data)) => {
                let mut pipe = ChildStdin::from_std(pipe).map_err(pipe_err)?;
                let data = data.to_vec();
                Some(tokio::spawn(async move {
                    if let Err(e) = pipe.write_all(&data).await {
                        debug!("Stdin not fully consumed: {}", e);
                    }
                }))
            }
            _ => None,
        };

        let overflow = Arc::new(Notify::new());
        let stdout = Arc::new(Mutex::new(Capture::default()));
        let stderr = Arc::new(Mutex::new(Capture::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(
                ChildStdout::from_std(pipe).map_err(pipe_err)?,
                limits.output_bytes,
                stdout.clone(),
                Some(overflow.clone()),
            ));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(
                ChildStderr::from_std(pipe).map_err(pipe_err)?,
                limits.stderr_bytes,
                stderr.clone(),
                None,
            ));
        }

        let deadline = Duration::from_millis(u64::from(limits.time_ms));
        let mut killed_for = None;
        let reaped = tokio::select! {
            reaped = &mut waiter => Some(reaped),
            _ = tokio::time::sleep(deadline) => {
                killed_for = Some(Outcome::TimedOut);
                None
            }
            _ = monitor.exceeded() => {
                killed_for = Some(Outcome::MemoryExceeded);
                None
            }
            _ = overflow.notified() => {
                killed_for = Some(Outcome::OutputTooLarge);
                None
            }
        };
        if let Some(reason) = killed_for {
            debug!("Killing process group {} ({:?})", group.id(), reason);
        }

        // Background members may outlive a leader that exited on its own
        group.kill();
        let wait_err = |e: std::io::Error| JudgeError::io(format!("wait for `{}`", cmd.program), e);
        let reaped = match reaped {
            Some(reaped) => reaped,
            None => (&mut waiter).await,
        }
        .map_err(|e| wait_err(std::io::Error::other(e)))?
        .map_err(wait_err)?;
        let wall_time_ms = start.elapsed().as_millis() as u64;

        let sampled = monitor.finish();
        let usage = Usage {
            peak_memory_kb: peak_memory_kb(sampled.peak_memory_kb, reaped.max_rss_kb, spawner_hwm_kb),
            cpu_time_ms: sampled.cpu_time_ms.max(reaped.cpu_time_ms),
        };
        let status = reaped.status;
        if let Some(task) = stdin_task {
            task.abort();
        }
        for reader in readers {
            join_reader(reader).await;
        }

        let stdout = take_capture(&stdout);
        let stderr = take_capture(&stderr);
        let exit_code = status.code();
        let signal = status.signal();
        let outcome = classify(
            killed_for,
            exit_code,
            signal,
            stdout.truncated,
            &usage,
            limits,
        );

        debug!(
            "Process {} finished: {:?}, wall {}ms, cpu {}ms, peak {}KB",
            pid, outcome, wall_time_ms, usage.cpu_time_ms, usage.peak_memory_kb
        );

        Ok(ExecutionResult {
            outcome,
            exit_code,
            signal,
            stdout: stdout.data,
            stderr: stderr.data,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            wall_time_ms,
            cpu_time_ms: usage.cpu_time_ms,
            peak_memory_kb: usage.peak_memory_kb,
        })
    }

    fn build_command(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        with_stdin: bool,
    ) -> Result<Command> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .env_clear()
            .env(
                "PATH",
                std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into()),
            )
            .env("LANG", "C.UTF-8");

        if let Some(dir) = &cmd.work_dir {
            // Checked up front so that a spawn NotFound always means the
            // program itself is missing
            if !dir.is_dir() {
                return Err(JudgeError::io(
                    format!("working directory {:?}", dir),
                    std::io::Error::new(ErrorKind::NotFound, "directory does not exist"),
                ));
            }
            command.current_dir(dir).env("HOME", dir);
        }

        command
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child_limits = ChildLimits::from_run_limits(limits);
        // SAFETY: enter_sandbox only issues setpgid/setrlimit syscalls on
        // values computed before the fork.
        unsafe {
            command.pre_exec(move || enter_sandbox(&child_limits));
        }
        Ok(command)
    }
}

/// Exit status and rusage of the reaped leader
struct Reaped {
    status: ExitStatus,
    max_rss_kb: u64,
    cpu_time_ms: u64,
}

/// Block until `pid` exits and reap it
fn reap(pid: libc::pid_t) -> std::io::Result<Reaped> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; all-zero is a valid value
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: both out-pointers are valid for the duration of the call
        let ret = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if ret == pid {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(Reaped {
        status: ExitStatus::from_raw(status),
        max_rss_kb: usage.ru_maxrss.max(0) as u64,
        cpu_time_ms: timeval_ms(usage.ru_utime) + timeval_ms(usage.ru_stime),
    })
}

fn timeval_ms(tv: libc::timeval) -> u64 {
    tv.tv_sec.max(0) as u64 * 1000 + tv.tv_usec.max(0) as u64 / 1000
}

/// Combine sampled and rusage peaks. A forked child starts out with the
/// spawner's resident set, which ru_maxrss keeps across exec; the rusage
/// peak is only the program's own when it lies above the spawner's mark.
fn peak_memory_kb(sampled_kb: u64, rusage_kb: u64, spawner_hwm_kb: u64) -> u64 {
    if rusage_kb > spawner_hwm_kb {
        sampled_kb.max(rusage_kb)
    } else {
        sampled_kb
    }
}

/// Map the raw termination data to an outcome tag
fn classify(
    killed_for: Option<Outcome>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    stdout_truncated: bool,
    usage: &Usage,
    limits: &RunLimits,
) -> Outcome {
    if let Some(reason) = killed_for {
        return reason;
    }
    if stdout_truncated {
        return Outcome::OutputTooLarge;
    }

    // RLIMIT_CPU: SIGXCPU at the soft limit, SIGKILL at the hard one
    let cpu_exhausted = usage.cpu_time_ms >= u64::from(limits.time_ms);
    match signal {
        Some(sig) if sig == Signal::SIGXCPU as i32 => return Outcome::TimedOut,
        Some(sig) if sig == Signal::SIGKILL as i32 && cpu_exhausted => {
            return Outcome::TimedOut
        }
        _ => {}
    }
    if usage.peak_memory_kb > limits.memory_kb() {
        return Outcome::MemoryExceeded;
    }

    match (signal, exit_code) {
        (Some(sig), _) => Outcome::KilledBySignal(sig),
        (None, Some(0)) => Outcome::Completed,
        (None, Some(code)) => Outcome::CrashedNonZeroExit(code),
        (None, None) => Outcome::CrashedNonZeroExit(-1),
    }
}

#[derive(Debug, Default)]
struct Capture {
    data: Vec<u8>,
    truncated: bool,
}

/// Read `reader` into `capture` up to `cap` bytes. With `overflow`, stop
/// and notify once the cap is hit; without, keep draining and drop the rest.
fn spawn_reader<R>(
    mut reader: R,
    cap: usize,
    capture: Arc<Mutex<Capture>>,
    overflow: Option<Arc<Notify>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let hit_cap = {
                let mut capture = capture.lock().unwrap_or_else(|p| p.into_inner());
                let room = cap.saturating_sub(capture.data.len());
                capture.data.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    capture.truncated = true;
                }
                n > room
            };
            if hit_cap {
                if let Some(notify) = &overflow {
                    notify.notify_one();
                    break;
                }
            }
        }
    })
}

/// A process that escaped the group can hold the pipe open forever
async fn join_reader(mut reader: JoinHandle<()>) {
    if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
        warn!("Output pipe still open after the process group was killed");
        reader.abort();
    }
}

fn take_capture(capture: &Mutex<Capture>) -> Capture {
    std::mem::take(&mut *capture.lock().unwrap_or_else(|p| p.into_inner()))
}

impl Default for SandboxedRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

#[async_trait]
impl Runner for SandboxedRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&[u8]>,
    ) -> Result<ExecutionResult> {
        self.execute(cmd, limits, stdin).await
    }
}
