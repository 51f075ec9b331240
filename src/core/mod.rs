pub mod error;
pub mod submission;
pub mod utils;
pub mod verdict;

pub use error::{JudgeError, Result};
pub use submission::{
    ProgramRun, ResourceLimits, RunRequest, Submission, SubmissionRequest, TestCase,
};
pub use verdict::Verdict;
