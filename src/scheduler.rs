//! Submission scheduler
//!
//! A FIFO job queue drained by a fixed pool of worker tasks. The pool size
//! is the only bound on concurrent pipelines: each worker runs one job to
//! completion before it takes the next. Jobs still in the queue can be
//! withdrawn; running jobs cannot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::{JudgeError, ProgramRun, Result, Submission};
use crate::jobs::{Job, JobReport};
use crate::judger::{JudgeReport, Judger, RunReport};

struct QueuedJob {
    ticket: u64,
    job: Job,
    reply: oneshot::Sender<JobReport>,
}

impl QueuedJob {
    /// Answer without running the job
    fn reject(self, err: JudgeError) {
        let _ = self.reply.send(self.job.failed(&err));
    }
}

struct JobQueue {
    queue: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedJob>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, job: QueuedJob) -> std::result::Result<(), QueuedJob> {
        {
            let mut queue = self.lock();
            // checked under the lock so close() cannot miss this job
            if self.closed.load(Ordering::Acquire) {
                return Err(job);
            }
            queue.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next job in arrival order; `None` once the queue is closed
    async fn pop(&self) -> Option<QueuedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.lock();
                if let Some(job) = queue.pop_front() {
                    return Some(job);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn cancel(&self, ticket: u64) -> Option<QueuedJob> {
        let mut queue = self.lock();
        let position = queue.iter().position(|j| j.ticket == ticket)?;
        queue.remove(position)
    }

    /// Stop accepting jobs; returns whatever was still waiting
    fn close(&self) -> Vec<QueuedJob> {
        let pending = {
            let mut queue = self.lock();
            self.closed.store(true, Ordering::Release);
            queue.drain(..).collect()
        };
        self.notify.notify_waiters();
        pending
    }
}

/// Handle to an enqueued job
pub struct JobTicket {
    ticket: u64,
    id: String,
    queue: Arc<JobQueue>,
    reply: oneshot::Receiver<JobReport>,
    /// Delivered if the job is dropped without an answer
    fallback: JobReport,
}

impl JobTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Withdraw the job if no worker has picked it up yet
    pub fn cancel(&self) -> bool {
        match self.queue.cancel(self.ticket) {
            Some(queued) => {
                info!("Cancelled queued job {}", self.id);
                queued.reject(JudgeError::Cancelled(self.id.clone()));
                true
            }
            None => false,
        }
    }

    /// Wait for the job's report
    pub async fn wait(self) -> JobReport {
        self.reply.await.unwrap_or(self.fallback)
    }
}

pub struct Scheduler {
    queue: Arc<JobQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_ticket: AtomicU64,
}

impl Scheduler {
    /// Start `workers` worker tasks (at least one) on the current runtime
    pub fn new(judger: Arc<Judger>, workers: usize) -> Self {
        let queue = Arc::new(JobQueue::new());
        let handles = (0..workers.max(1))
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, queue.clone(), judger.clone())))
            .collect();
        info!("Started {} judge workers", workers.max(1));

        Self {
            queue,
            workers: Mutex::new(handles),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Queue a job; it is admitted in arrival order as workers free up
    pub fn enqueue(&self, job: Job) -> Result<JobTicket> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let id = job.id().to_string();
        let fallback = job.failed(&JudgeError::SchedulerClosed);
        let (reply, receiver) = oneshot::channel();

        self.queue
            .push(QueuedJob { ticket, job, reply })
            .map_err(|_| JudgeError::SchedulerClosed)?;
        debug!("Queued job {} (ticket {})", id, ticket);

        Ok(JobTicket {
            ticket,
            id,
            queue: self.queue.clone(),
            reply: receiver,
            fallback,
        })
    }

    /// Queue a job and wait for its report
    pub async fn dispatch(&self, job: Job) -> JobReport {
        let fallback = job.failed(&JudgeError::SchedulerClosed);
        match self.enqueue(job) {
            Ok(ticket) => ticket.wait().await,
            Err(_) => fallback,
        }
    }

    /// Judge a submission, suspending until a worker is free and judging
    /// has finished
    pub async fn submit(&self, submission: Submission) -> JudgeReport {
        let id = submission.id.clone();
        let total = submission.test_cases.len().max(1);
        match self.dispatch(Job::Judge(submission)).await {
            JobReport::Judge(report) => report,
            _ => JudgeReport::internal(&id, &JudgeError::SchedulerClosed, total),
        }
    }

    pub async fn run(&self, program: ProgramRun) -> RunReport {
        let id = program.id.clone();
        match self.dispatch(Job::Run(program)).await {
            JobReport::Run(report) => report,
            _ => RunReport::internal(&id, &JudgeError::SchedulerClosed),
        }
    }

    /// Stop accepting jobs, answer queued ones with SchedulerClosed and
    /// wait for running ones to finish
    pub async fn shutdown(&self) {
        let pending = self.queue.close();
        if !pending.is_empty() {
            info!("Rejecting {} queued jobs on shutdown", pending.len());
        }
        for queued in pending {
            queued.reject(JudgeError::SchedulerClosed);
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for queued in self.queue.close() {
            queued.reject(JudgeError::SchedulerClosed);
        }
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<JobQueue>, judger: Arc<Judger>) {
    while let Some(QueuedJob { job, reply, .. }) = queue.pop().await {
        let id = job.id().to_string();
        debug!("Worker {} picked up job {}", worker_id, id);
        let crashed = job.failed(&JudgeError::WorkerPanicked(id.clone()));

        // A panicking pipeline only takes down its own task; the worker
        // and its slot survive
        let task = {
            let judger = judger.clone();
            tokio::spawn(async move { execute(&judger, job).await })
        };
        let report = match task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Worker {} crashed while processing {}: {}", worker_id, id, e);
                crashed
            }
        };

        if reply.send(report).is_err() {
            debug!("Caller of job {} is gone, dropping its report", id);
        }
    }
    debug!("Worker {} stopped", worker_id);
}

async fn execute(judger: &Judger, job: Job) -> JobReport {
    match job {
        Job::Judge(submission) => JobReport::Judge(judger.judge(submission).await),
        Job::Run(program) => JobReport::Run(judger.run_program(program).await),
    }
}
