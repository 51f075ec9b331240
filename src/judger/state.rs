//! Pipeline state machine
//!
//! `Created → Compiling → Compiled → Running → Completed`, with
//! `Created → Running` for interpreted toolchains and `Failed` reachable
//! from every non-terminal state.

use std::fmt;

use tracing::debug;

use crate::core::{JudgeError, Result, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    CompileError,
    /// System-caused; carries `JudgeError::kind()`
    Internal(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Compiling,
    Compiled,
    Running,
    Completed(Verdict),
    Failed(FailureReason),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed(_) | PipelineState::Failed(_))
    }

    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Created, Compiling)
            | (Created, Running)
            | (Compiling, Compiled)
            | (Compiled, Running)
            | (Running, Completed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Created => write!(f, "created"),
            PipelineState::Compiling => write!(f, "compiling"),
            PipelineState::Compiled => write!(f, "compiled"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Completed(verdict) => write!(f, "completed({})", verdict),
            PipelineState::Failed(FailureReason::CompileError) => write!(f, "failed(compile_error)"),
            PipelineState::Failed(FailureReason::Internal(kind)) => write!(f, "failed({})", kind),
        }
    }
}

/// State of one submission's pipeline
#[derive(Debug)]
pub struct Pipeline {
    id: String,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: PipelineState::Created,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(JudgeError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Pipeline {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Enter `Failed` after an internal fault. A pipeline that already
    /// reached a terminal state keeps it.
    pub fn fail(&mut self, reason: FailureReason) {
        if !self.state.is_terminal() {
            debug!("Pipeline {}: {} -> failed", self.id, self.state);
            self.state = PipelineState::Failed(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_language_path() {
        let mut pipeline = Pipeline::new("sub");
        for next in [
            PipelineState::Compiling,
            PipelineState::Compiled,
            PipelineState::Running,
            PipelineState::Completed(Verdict::Accepted),
        ] {
            pipeline.advance(next).unwrap();
        }
        assert!(pipeline.state().is_terminal());
    }

    #[test]
    fn test_interpreted_language_skips_compiling() {
        let mut pipeline = Pipeline::new("sub");
        pipeline.advance(PipelineState::Running).unwrap();
        pipeline
            .advance(PipelineState::Completed(Verdict::WrongAnswer))
            .unwrap();
    }

    #[test]
    fn test_illegal_transitions() {
        let mut pipeline = Pipeline::new("sub");
        let err = pipeline.advance(PipelineState::Compiled).unwrap_err();
        assert!(matches!(err, JudgeError::IllegalTransition { .. }));
        assert_eq!(pipeline.state(), &PipelineState::Created);

        pipeline
            .advance(PipelineState::Failed(FailureReason::CompileError))
            .unwrap();
        assert!(pipeline.advance(PipelineState::Running).is_err());
        assert!(pipeline
            .advance(PipelineState::Failed(FailureReason::Internal("filesystem")))
            .is_err());
    }

    #[test]
    fn test_fail_keeps_terminal_state() {
        let mut pipeline = Pipeline::new("sub");
        pipeline.advance(PipelineState::Running).unwrap();
        pipeline
            .advance(PipelineState::Completed(Verdict::Accepted))
            .unwrap();
        pipeline.fail(FailureReason::Internal("filesystem"));
        assert_eq!(
            pipeline.state(),
            &PipelineState::Completed(Verdict::Accepted)
        );
    }
}
