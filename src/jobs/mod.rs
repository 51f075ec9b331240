use serde::{Deserialize, Serialize};

use crate::config::LimitDefaults;
use crate::core::{JudgeError, ProgramRun, RunRequest, Submission, SubmissionRequest, Verdict};
use crate::judger::{JudgeReport, RunReport, INTERNAL_ERROR_MESSAGE};

/// Worker job enum - represents the job kinds the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Judge a submission against its test cases
    #[serde(rename = "judge")]
    Judge(SubmissionRequest),
    /// Compile and run on the given input, no judging
    #[serde(rename = "run")]
    Run(RunRequest),
}

impl WorkerJob {
    /// Fill in defaults and generate a missing id
    pub fn into_job(self, defaults: &LimitDefaults) -> Job {
        match self {
            WorkerJob::Judge(request) => Job::Judge(request.into_submission(defaults)),
            WorkerJob::Run(request) => Job::Run(request.into_program(defaults)),
        }
    }
}

/// Accepted job, ready for the scheduler
#[derive(Debug, Clone)]
pub enum Job {
    Judge(Submission),
    Run(ProgramRun),
}

impl Job {
    pub fn id(&self) -> &str {
        match self {
            Job::Judge(submission) => &submission.id,
            Job::Run(program) => &program.id,
        }
    }

    /// Report for a job that never produced one of its own
    pub fn failed(&self, err: &JudgeError) -> JobReport {
        match self {
            Job::Judge(submission) => JobReport::Judge(JudgeReport::internal(
                &submission.id,
                err,
                submission.test_cases.len().max(1),
            )),
            Job::Run(program) => JobReport::Run(RunReport::internal(&program.id, err)),
        }
    }
}

/// One line of output per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobReport {
    Judge(JudgeReport),
    Run(RunReport),
    /// Input that could not be parsed into a job; there is no id to echo
    Invalid {
        verdict: Verdict,
        diagnostic_message: String,
    },
}

impl JobReport {
    pub fn invalid() -> Self {
        JobReport::Invalid {
            verdict: Verdict::InternalError,
            diagnostic_message: INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            JobReport::Judge(report) => Some(&report.id),
            JobReport::Run(report) => Some(&report.id),
            JobReport::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::ComparisonMode;

    #[test]
    fn test_parse_judge_job() {
        let line = r#"{"job_type":"judge","id":"1684d576","language":"java","sourceCode":"public class Main {}","stdinData":"6 5 4","expectedOutput":"4 5 6","timeLimitMs":1000,"comparisonMode":"exact"}"#;
        let job: WorkerJob = serde_json::from_str(line).unwrap();
        let Job::Judge(submission) = job.into_job(&LimitDefaults::default()) else {
            panic!("expected a judge job");
        };
        assert_eq!(submission.id, "1684d576");
        assert_eq!(submission.limits.time_limit_ms, 1000);
        assert_eq!(submission.limits.memory_limit_mb, 256);
        assert_eq!(submission.comparison_mode, ComparisonMode::Exact);
        assert_eq!(submission.test_cases[0].input, "6 5 4");
    }

    #[test]
    fn test_parse_run_job_generates_id() {
        let line = r#"{"job_type":"run","language":"py","code":"print(input())","input":"hi"}"#;
        let job: WorkerJob = serde_json::from_str(line).unwrap();
        let job = job.into_job(&LimitDefaults::default());
        assert!(matches!(job, Job::Run(_)));
        assert_eq!(job.id().len(), 36);
    }

    #[test]
    fn test_unknown_job_type_is_rejected() {
        let line = r#"{"job_type":"validate","language":"c","code":""}"#;
        assert!(serde_json::from_str::<WorkerJob>(line).is_err());
    }

    #[test]
    fn test_report_tagging() {
        let json = serde_json::to_value(JobReport::invalid()).unwrap();
        assert_eq!(json["job_type"], "invalid");
        assert_eq!(json["verdict"], "internal_error");
        assert!(json.get("id").is_none());

        let job = Job::Run(
            RunRequest {
                id: Some("r1".into()),
                language: "c".into(),
                source_code: String::new(),
                stdin: String::new(),
                time_limit_ms: None,
                memory_limit_mb: None,
                output_limit_kb: None,
            }
            .into_program(&LimitDefaults::default()),
        );
        let report = job.failed(&JudgeError::Cancelled("r1".into()));
        assert_eq!(report.id(), Some("r1"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["job_type"], "run");
        assert_eq!(json["error_kind"], "cancelled");
    }
}
