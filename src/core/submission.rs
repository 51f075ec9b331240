//! Submission intake records
//!
//! Wire records accept both snake_case and the camelCase names used by the
//! API layer (`sourceCode`, `stdinData`, ...).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::comparator::ComparisonMode;
use crate::config::LimitDefaults;

/// Resource limits applied to every run step of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub time_limit_ms: u32,
    pub memory_limit_mb: u32,
    pub output_limit_kb: u32,
}

impl ResourceLimits {
    fn from_parts(
        time_limit_ms: Option<u32>,
        memory_limit_mb: Option<u32>,
        output_limit_kb: Option<u32>,
        defaults: &LimitDefaults,
    ) -> Self {
        Self {
            time_limit_ms: time_limit_ms.unwrap_or(defaults.time_limit_ms),
            memory_limit_mb: memory_limit_mb.unwrap_or(defaults.memory_limit_mb),
            output_limit_kb: output_limit_kb.unwrap_or(defaults.output_limit_kb),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(alias = "output", alias = "expectedOutput")]
    pub expected_output: String,
}

/// One judging request, immutable once accepted
#[derive(Debug, Clone)]
pub struct Submission {
    /// Unique identifier, also the workspace directory name
    pub id: String,
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    pub limits: ResourceLimits,
    pub comparison_mode: ComparisonMode,
    /// Skip the per-language time/memory adjustment
    pub ignore_limit_bonus: bool,
}

impl Submission {
    /// Single-test-case submission with default limits
    pub fn new(
        id: impl Into<String>,
        language: impl Into<String>,
        source_code: impl Into<String>,
        stdin: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            language: language.into(),
            source_code: source_code.into(),
            test_cases: vec![TestCase {
                input: stdin.into(),
                expected_output: expected_output.into(),
            }],
            limits: ResourceLimits::from_parts(None, None, None, &LimitDefaults::default()),
            comparison_mode: ComparisonMode::default(),
            ignore_limit_bonus: false,
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_comparison_mode(mut self, mode: ComparisonMode) -> Self {
        self.comparison_mode = mode;
        self
    }

    pub fn with_test_cases(mut self, test_cases: Vec<TestCase>) -> Self {
        self.test_cases = test_cases;
        self
    }
}

/// Submission as received from the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Generated (UUID v4) when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "extension")]
    pub language: String,
    #[serde(alias = "sourceCode", alias = "code")]
    pub source_code: String,
    #[serde(default, alias = "stdinData", alias = "input")]
    pub stdin_data: String,
    #[serde(default, alias = "expectedOutput")]
    pub expected_output: Option<String>,
    /// Additional test cases; when present they replace the single
    /// `stdin_data`/`expected_output` pair
    #[serde(default)]
    pub testcases: Option<Vec<TestCase>>,
    #[serde(default, alias = "timeLimitMs", alias = "timeLimit")]
    pub time_limit_ms: Option<u32>,
    #[serde(default, alias = "memoryLimitMb", alias = "memoryLimit")]
    pub memory_limit_mb: Option<u32>,
    #[serde(default, alias = "outputLimitKb")]
    pub output_limit_kb: Option<u32>,
    #[serde(default, alias = "comparisonMode")]
    pub comparison_mode: ComparisonMode,
    #[serde(default, alias = "ignoreLimitBonus")]
    pub ignore_limit_bonus: bool,
}

impl SubmissionRequest {
    pub fn into_submission(self, defaults: &LimitDefaults) -> Submission {
        let test_cases = match self.testcases {
            Some(cases) if !cases.is_empty() => cases,
            _ => vec![TestCase {
                input: self.stdin_data,
                expected_output: self.expected_output.unwrap_or_default(),
            }],
        };

        Submission {
            id: self.id.unwrap_or_else(generate_id),
            language: self.language,
            source_code: self.source_code,
            test_cases,
            limits: ResourceLimits::from_parts(
                self.time_limit_ms,
                self.memory_limit_mb,
                self.output_limit_kb,
                defaults,
            ),
            comparison_mode: self.comparison_mode,
            ignore_limit_bonus: self.ignore_limit_bonus,
        }
    }
}

/// Run-only request: compile and execute on the given input, no judging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "extension")]
    pub language: String,
    #[serde(alias = "sourceCode", alias = "code")]
    pub source_code: String,
    #[serde(default, alias = "input", alias = "stdinData")]
    pub stdin: String,
    #[serde(default, alias = "timeLimitMs", alias = "timeLimit")]
    pub time_limit_ms: Option<u32>,
    #[serde(default, alias = "memoryLimitMb", alias = "memoryLimit")]
    pub memory_limit_mb: Option<u32>,
    #[serde(default, alias = "outputLimitKb")]
    pub output_limit_kb: Option<u32>,
}

impl RunRequest {
    pub fn into_program(self, defaults: &LimitDefaults) -> ProgramRun {
        ProgramRun {
            id: self.id.unwrap_or_else(generate_id),
            language: self.language,
            source_code: self.source_code,
            stdin: self.stdin,
            limits: ResourceLimits::from_parts(
                self.time_limit_ms,
                self.memory_limit_mb,
                self.output_limit_kb,
                defaults,
            ),
        }
    }
}

/// Accepted run-only job
#[derive(Debug, Clone)]
pub struct ProgramRun {
    pub id: String,
    pub language: String,
    pub source_code: String,
    pub stdin: String,
    pub limits: ResourceLimits,
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_camel_case_intake() {
        let raw = r#"{
            "id": "1684d576-9866-4688-9bc1-2a436d3a6e80",
            "language": "java",
            "sourceCode": "public class Main {}",
            "stdinData": "6 5 4",
            "expectedOutput": "4 5 6",
            "timeLimitMs": 1500,
            "memoryLimitMb": 128,
            "outputLimitKb": 64,
            "comparisonMode": "exact"
        }"#;
        let request: SubmissionRequest = serde_json::from_str(raw).unwrap();
        let submission = request.into_submission(&LimitDefaults::default());

        assert_eq!(submission.id, "1684d576-9866-4688-9bc1-2a436d3a6e80");
        assert_eq!(
            submission.test_cases,
            vec![TestCase {
                input: "6 5 4".into(),
                expected_output: "4 5 6".into(),
            }]
        );
        assert_eq!(
            submission.limits,
            ResourceLimits {
                time_limit_ms: 1500,
                memory_limit_mb: 128,
                output_limit_kb: 64,
            }
        );
        assert_eq!(submission.comparison_mode, ComparisonMode::Exact);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let raw = r#"{"language": "py", "code": "print(1)", "testcases": [
            {"input": "", "output": "1"},
            {"input": "x", "output": "1"}
        ]}"#;
        let request: SubmissionRequest = serde_json::from_str(raw).unwrap();
        let defaults = LimitDefaults::default();
        let submission = request.into_submission(&defaults);

        assert!(Uuid::parse_str(&submission.id).is_ok());
        assert_eq!(submission.test_cases.len(), 2);
        assert_eq!(submission.limits.time_limit_ms, defaults.time_limit_ms);
        assert_eq!(submission.comparison_mode, ComparisonMode::Whitespace);
    }
}
