use crate::errors::TestError;
use std::fmt;

/// Outcome of one executed node.
///
/// Skips are not results: a skipped node is never started and is reported
/// through [crate::listener::EngineExecutionListener::execution_skipped].
#[derive(Debug, Clone, PartialEq)]
pub enum TestExecutionResult {
    /// Every step succeeded.
    Successful,
    /// A step failed. Errors from later cleanup steps are suppressed under
    /// the contained error.
    Failed(TestError),
    /// A step was aborted, e.g. by a failed assumption.
    Aborted(TestError),
}

impl TestExecutionResult {
    /// Classify the outcome of a sequence of steps.
    pub fn from_result(result: Result<(), TestError>) -> Self {
        match result {
            Ok(()) => TestExecutionResult::Successful,
            Err(err) if err.is_aborted() => TestExecutionResult::Aborted(err),
            Err(err) => TestExecutionResult::Failed(err),
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, TestExecutionResult::Successful)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestExecutionResult::Failed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TestExecutionResult::Aborted(_))
    }

    pub fn error(&self) -> Option<&TestError> {
        match self {
            TestExecutionResult::Successful => None,
            TestExecutionResult::Failed(err) | TestExecutionResult::Aborted(err) => Some(err),
        }
    }
}

impl fmt::Display for TestExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TestExecutionResult::Successful => write!(f, "successful"),
            TestExecutionResult::Failed(err) => write!(f, "failed: {}", err),
            TestExecutionResult::Aborted(err) => write!(f, "aborted: {}", err),
        }
    }
}
