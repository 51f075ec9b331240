//! Resource usage sampling from procfs
//!
//! Usage of a whole process group is sampled periodically while it runs:
//! resident memory is summed over members, CPU time includes reaped
//! children. Where procfs is unavailable the samples are simply empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Kernel clock ticks per second as exposed in /proc/<pid>/stat (USER_HZ)
const USER_HZ: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSample {
    /// Sum of VmRSS over the group, or the largest VmHWM if higher
    pub memory_kb: u64,
    pub cpu_ms: u64,
}

/// Final usage figures of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub peak_memory_kb: u64,
    pub cpu_time_ms: u64,
}

#[derive(Debug, Default)]
struct UsageStats {
    peak_kb: AtomicU64,
    cpu_ms: AtomicU64,
}

/// Background sampler for one process group
pub struct UsageMonitor {
    handle: JoinHandle<()>,
    stats: Arc<UsageStats>,
    exceeded: Arc<Notify>,
}

impl UsageMonitor {
    /// Start sampling group `pgid`; `exceeded()` resolves once peak memory
    /// goes above `memory_limit_kb`
    pub fn spawn(pgid: u32, memory_limit_kb: u64, interval: Duration) -> Self {
        let stats = Arc::new(UsageStats::default());
        let exceeded = Arc::new(Notify::new());

        let handle = {
            let stats = stats.clone();
            let exceeded = exceeded.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let Some(sample) = sample_group(pgid) else {
                        continue;
                    };
                    stats.peak_kb.fetch_max(sample.memory_kb, Ordering::Relaxed);
                    stats.cpu_ms.fetch_max(sample.cpu_ms, Ordering::Relaxed);
                    if sample.memory_kb > memory_limit_kb {
                        exceeded.notify_one();
                        break;
                    }
                }
            })
        };

        Self {
            handle,
            stats,
            exceeded,
        }
    }

    /// Resolves when the memory limit has been exceeded
    pub async fn exceeded(&self) {
        self.exceeded.notified().await
    }

    /// Stop sampling and return what was observed
    pub fn finish(self) -> Usage {
        self.handle.abort();
        Usage {
            peak_memory_kb: self.stats.peak_kb.load(Ordering::Relaxed),
            cpu_time_ms: self.stats.cpu_ms.load(Ordering::Relaxed),
        }
    }
}

impl Drop for UsageMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Sample every live process whose process group is `pgid`
pub fn sample_group(pgid: u32) -> Option<UsageSample> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let mut total = UsageSample::default();
    let mut hwm_max = 0;
    let mut members = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            continue;
        };
        let Some(fields) = parse_stat(&stat) else {
            continue;
        };
        if fields.pgrp != pgid {
            continue;
        }
        members += 1;
        total.cpu_ms += fields.cpu_ticks * 1000 / USER_HZ;

        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mem = parse_status(&status);
            total.memory_kb += mem.rss_kb;
            hwm_max = hwm_max.max(mem.hwm_kb);
        }
    }

    if members == 0 {
        return None;
    }
    total.memory_kb = total.memory_kb.max(hwm_max);
    Some(total)
}

/// VmHWM of the current process, 0 where procfs is unavailable
pub fn own_high_water_kb() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| parse_status(&status).hwm_kb)
        .unwrap_or(0)
}

#[derive(Debug, PartialEq, Eq)]
pub struct StatFields {
    pub pgrp: u32,
    /// utime + stime + cutime + cstime
    pub cpu_ticks: u64,
}

/// Parse /proc/<pid>/stat. The command name (field 2) may contain spaces
/// and parentheses, so fields are counted from the last ')'.
pub fn parse_stat(content: &str) -> Option<StatFields> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state)
    let field = |n: usize| fields.get(n - 3).copied();
    let pgrp = field(5)?.parse().ok()?;
    let cpu_ticks = [14, 15, 16, 17]
        .iter()
        .map(|&n| field(n).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0).max(0) as u64)
        .sum();
    Some(StatFields { pgrp, cpu_ticks })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusMemory {
    pub rss_kb: u64,
    pub hwm_kb: u64,
}

/// Parse VmRSS / VmHWM out of /proc/<pid>/status
pub fn parse_status(content: &str) -> StatusMemory {
    let mut mem = StatusMemory::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let kb = || {
            value
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        match key {
            "VmRSS" => mem.rss_kb = kb(),
            "VmHWM" => mem.hwm_kb = kb(),
            _ => {}
        }
    }
    mem
}
