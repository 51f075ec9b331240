//! Full pipeline against the real toolchains. Each test skips itself when
//! the binaries it needs are not on PATH.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use oj_compiler::config::JudgeConfig;
use oj_compiler::core::{ProgramRun, ResourceLimits};
use oj_compiler::{ComparisonMode, Judger, Scheduler, Submission, Verdict};

const SORT_C: &str = include_str!("../test-codes/01_sort.c");
const CLASS_NAME_MISMATCH: &str = include_str!("../test-codes/02_class_name_mismatch.java");
const INFINITE_LOOP: &str = include_str!("../test-codes/03_infinite_loop.py");
const FORK_AND_SPIN: &str = include_str!("../test-codes/04_fork_and_spin.c");
const TRAILING_SPACES: &str = include_str!("../test-codes/05_trailing_spaces.cpp");
const MEMORY_HOG: &str = include_str!("../test-codes/06_memory_hog.c");
const SOLUTION_JAVA: &str = include_str!("../test-codes/07_solution.java");
const LARGE_VECTOR: &str = include_str!("../test-codes/08_large_vector.cpp");

macro_rules! require {
    ($($binary:expr),+) => {
        for binary in [$($binary),+] {
            if which::which(binary).is_err() {
                eprintln!("skipping: `{}` is not installed", binary);
                return;
            }
        }
    };
}

async fn judger() -> (tempfile::TempDir, Judger) {
    let dir = tempfile::tempdir().unwrap();
    let config = JudgeConfig {
        workspace_root: dir.path().join("workspaces"),
        ..JudgeConfig::default()
    };
    let judger = Judger::new(config).await.unwrap();
    (dir, judger)
}

fn limits(time_limit_ms: u32, memory_limit_mb: u32) -> ResourceLimits {
    ResourceLimits {
        time_limit_ms,
        memory_limit_mb,
        output_limit_kb: 1024,
    }
}

async fn assert_no_workspaces(judger: &Judger) {
    let left = judger.workspaces().subdirectories().await.unwrap();
    assert!(left.is_empty(), "leftover workspaces: {:?}", left);
}

/// Dead, or a zombie waiting for init to reap it
async fn wait_until_gone(pid: &str) -> bool {
    let stat = Path::new("/proc").join(pid).join("stat");
    for _ in 0..50 {
        match std::fs::read_to_string(&stat) {
            Err(_) => return true,
            Ok(content) if content.contains(") Z") => return true,
            Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    false
}

#[tokio::test]
async fn sorted_output_is_accepted() {
    require!("gcc");
    let (_dir, judger) = judger().await;

    let report = judger
        .judge(Submission::new("e2e-sort", "c", SORT_C, "6 5 4", "4 5 6"))
        .await;

    assert_eq!(report.verdict, Verdict::Accepted, "{:?}", report);
    assert_eq!(report.stdout_excerpt.as_deref(), Some("4 5 6\n"));
    assert_eq!(report.diagnostic_message, None);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn mismatched_public_type_is_compile_error() {
    require!("javac");
    let (_dir, judger) = judger().await;

    let report = judger
        .judge(Submission::new(
            "e2e-javac",
            "java",
            CLASS_NAME_MISMATCH,
            "",
            "42",
        ))
        .await;

    assert_eq!(report.verdict, Verdict::CompileError);
    let diagnostic = report.diagnostic_message.unwrap_or_default();
    assert!(diagnostic.contains("Helper"), "{}", diagnostic);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn java_file_is_named_after_public_class() {
    require!("javac", "java");
    let (_dir, judger) = judger().await;

    let submission = Submission::new("e2e-java", "java", SOLUTION_JAVA, "6 5 4", "4 5 6")
        .with_limits(limits(10_000, 512));
    let report = judger.judge(submission).await;

    assert_eq!(report.verdict, Verdict::Accepted, "{:?}", report);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn infinite_loop_is_time_limit_exceeded() {
    require!("python3");
    let (_dir, judger) = judger().await;

    // Correct output is printed before the loop starts
    let submission = Submission::new("e2e-loop", "python", INFINITE_LOOP, "", "4 5 6")
        .with_limits(limits(1000, 256));
    let report = judger.judge(submission).await;

    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
    assert!(report.execution_time_ms.unwrap() >= 1000);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn timeout_kills_the_whole_process_tree() {
    require!("gcc");
    let (_dir, judger) = judger().await;

    let submission = Submission::new("e2e-fork", "c", FORK_AND_SPIN, "", "")
        .with_limits(limits(500, 256));
    let report = judger.judge(submission).await;

    assert_eq!(report.verdict, Verdict::TimeLimitExceeded);
    let stderr = report.stderr_excerpt.unwrap_or_default();
    let child = stderr.trim();
    assert!(!child.is_empty(), "child pid was not reported");
    assert!(wait_until_gone(child).await, "forked child {} survived", child);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn trailing_whitespace_depends_on_comparison_mode() {
    require!("g++");
    let (_dir, judger) = judger().await;

    let lenient = Submission::new("e2e-ws", "cpp", TRAILING_SPACES, "6 5 4", "4 5 6\n");
    let strict = Submission::new("e2e-exact", "cpp", TRAILING_SPACES, "6 5 4", "4 5 6\n")
        .with_comparison_mode(ComparisonMode::Exact);

    assert_eq!(judger.judge(lenient).await.verdict, Verdict::Accepted);
    assert_eq!(judger.judge(strict).await.verdict, Verdict::WrongAnswer);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn memory_hog_is_memory_limit_exceeded() {
    require!("gcc");
    let (_dir, judger) = judger().await;

    let submission =
        Submission::new("e2e-mem", "c", MEMORY_HOG, "", "").with_limits(limits(5000, 64));
    let report = judger.judge(submission).await;

    assert_eq!(report.verdict, Verdict::MemoryLimitExceeded, "{:?}", report);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn oversized_vector_is_memory_limit_exceeded() {
    require!("g++");
    let (_dir, judger) = judger().await;

    // 400MB requested at once under 64MB: no bad_alloc crash
    let submission = Submission::new("e2e-vector", "cpp", LARGE_VECTOR, "", "7")
        .with_limits(limits(5000, 64));
    let report = judger.judge(submission).await;

    assert_eq!(report.verdict, Verdict::MemoryLimitExceeded, "{:?}", report);
    assert_no_workspaces(&judger).await;
}

#[tokio::test]
async fn run_only_job_through_scheduler() {
    require!("python3");
    let (_dir, judger) = judger().await;
    let scheduler = Scheduler::new(Arc::new(judger), 2);

    let report = scheduler
        .run(ProgramRun {
            id: "e2e-run".into(),
            language: "py".into(),
            source_code: "name = input()\nprint('hello', name)\n".into(),
            stdin: "judge\n".into(),
            limits: limits(2000, 128),
        })
        .await;

    assert!(report.success, "{:?}", report);
    assert_eq!(report.stdout, "hello judge\n");
    scheduler.shutdown().await;
}
