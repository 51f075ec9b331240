//! Online-judge compiler backend
//!
//! Takes a submitted program plus test input, compiles it, runs it under
//! resource limits in a per-submission workspace and produces a verdict.

pub mod comparator;
pub mod compiler;
pub mod config;
pub mod core;
pub mod jobs;
pub mod judger;
pub mod languages;
pub mod runner;
pub mod scheduler;
pub mod workspace;

pub use crate::comparator::{compare, Comparison, ComparisonMode};
pub use crate::config::JudgeConfig;
pub use crate::core::{JudgeError, ProgramRun, Submission, Verdict};
pub use crate::jobs::{Job, JobReport, WorkerJob};
pub use crate::judger::{JudgeReport, Judger, RunReport};
pub use crate::scheduler::{JobTicket, Scheduler};
