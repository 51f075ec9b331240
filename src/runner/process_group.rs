//! Process-group lifetime for spawned children
//!
//! Every child becomes the leader of a fresh process group before exec, so
//! that everything it forks can be killed with one `killpg`.

use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setpgid, Pid};
use tracing::warn;

use super::RunLimits;

/// rlimits applied inside the child, precomputed so the pre-exec hook does
/// no allocation
#[derive(Debug, Clone, Copy)]
pub struct ChildLimits {
    cpu_secs: u64,
    file_size_bytes: u64,
}

impl ChildLimits {
    pub fn from_run_limits(limits: &RunLimits) -> Self {
        // whole seconds, rounded up, plus one second of slack: the
        // wall-clock timer is the precise limit, RLIMIT_CPU is the backstop
        let cpu_secs = u64::from(limits.time_ms).div_ceil(1000) + 1;
        // No RLIMIT_AS: a refused allocation shows up as a crash
        // (bad_alloc, NULL deref), not as a memory verdict. Resident memory
        // is enforced by the usage monitor.
        Self {
            cpu_secs,
            file_size_bytes: u64::from(limits.file_size_kb) * 1024,
        }
    }
}

/// Runs in the forked child before exec. Only async-signal-safe calls.
pub fn enter_sandbox(limits: &ChildLimits) -> std::io::Result<()> {
    setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
    setrlimit(Resource::RLIMIT_CPU, limits.cpu_secs, limits.cpu_secs + 1)?;
    setrlimit(
        Resource::RLIMIT_FSIZE,
        limits.file_size_bytes,
        limits.file_size_bytes,
    )?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    Ok(())
}

/// Owns a process group; kills it explicitly via `kill()` and again on drop
#[derive(Debug)]
pub struct ProcessGroup {
    pgid: Pid,
}

impl ProcessGroup {
    /// `leader_pid` must have called `setpgid(0, 0)` (see `enter_sandbox`)
    pub fn new(leader_pid: u32) -> Self {
        Self {
            pgid: Pid::from_raw(leader_pid as i32),
        }
    }

    pub fn id(&self) -> u32 {
        self.pgid.as_raw() as u32
    }

    /// SIGKILL every process in the group
    pub fn kill(&self) {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to kill process group {}: {}", self.pgid, e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
