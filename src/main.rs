use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oj_compiler::config::JudgeConfig;
use oj_compiler::jobs::{Job, JobReport, WorkerJob};
use oj_compiler::languages::Language;
use oj_compiler::{Judger, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the report stream, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("oj_compiler=info".parse()?))
        .init();

    let config = JudgeConfig::load().context("Failed to load judge configuration")?;
    info!(
        "Starting judge: workers={}, workspace_root={:?}",
        config.workers, config.workspace_root
    );

    probe_toolchains(&config);

    let judger = Judger::new(config.clone())
        .await
        .context("Failed to prepare workspace root")?;

    // Nothing is running yet, so unmarked leftovers belong to a dead process
    judger.workspaces().reclaim_stale().await?;
    judger
        .workspaces()
        .reclaim_retained(Duration::from_secs(config.retained_max_age_secs))
        .await?;

    let scheduler = Arc::new(Scheduler::new(Arc::new(judger), config.workers));

    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<JobReport>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(report) = report_rx.recv().await {
            match serde_json::to_string(&report) {
                Ok(line) => {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                Err(e) => error!("Failed to serialize report {:?}: {}", report.id(), e),
            }
        }
        Ok::<_, std::io::Error>(())
    });

    info!("Waiting for jobs on stdin...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = JoinSet::new();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read job from stdin")?
    {
        if line.trim().is_empty() {
            continue;
        }

        let job = match serde_json::from_str::<WorkerJob>(&line) {
            Ok(worker_job) => worker_job.into_job(&config.defaults),
            Err(e) => {
                warn!("Rejected malformed job: {}", e);
                let _ = report_tx.send(JobReport::invalid());
                continue;
            }
        };
        match &job {
            Job::Judge(submission) => info!(
                "Received judge job: id={}, language={}, tests={}",
                submission.id,
                submission.language,
                submission.test_cases.len()
            ),
            Job::Run(program) => info!(
                "Received run job: id={}, language={}",
                program.id, program.language
            ),
        }

        let ticket = match scheduler.enqueue(job) {
            Ok(ticket) => ticket,
            Err(e) => {
                error!("Scheduler refused job: {}", e);
                break;
            }
        };
        let report_tx = report_tx.clone();
        pending.spawn(async move {
            let _ = report_tx.send(ticket.wait().await);
        });
    }

    while let Some(joined) = pending.join_next().await {
        if let Err(e) = joined {
            error!("Report task failed: {}", e);
        }
    }
    drop(report_tx);
    scheduler.shutdown().await;
    writer.await??;

    info!("Input closed, all jobs answered");
    Ok(())
}

/// Log which languages can actually be judged on this host
fn probe_toolchains(config: &JudgeConfig) {
    for language in Language::ALL {
        let missing: Vec<String> = language
            .binaries(config)
            .into_iter()
            .filter(|binary| which::which(binary).is_err())
            .collect();
        if missing.is_empty() {
            info!("Language {} available", language);
        } else {
            warn!(
                "Language {} unavailable: {} not found on PATH",
                language,
                missing.join(", ")
            );
        }
    }
}
