use super::results::TestExecutionResult;
use crate::errors::{ErrorKind, TestError};
use std::panic::{self, AssertUnwindSafe};

/// Runs fallible steps and aggregates what they raise.
///
/// The first error is the primary one; later errors are attached to it as
/// suppressed. A real failure outranks an abort: when the primary error is an
/// abort and a non-abort error arrives, the new error becomes primary and
/// the abort is suppressed under it.
#[derive(Debug, Default)]
pub struct ThrowableCollector {
    primary: Option<TestError>,
}

impl ThrowableCollector {
    pub fn new() -> Self {
        ThrowableCollector { primary: None }
    }

    /// Run `action`, capturing both returned errors and panics.
    pub fn execute<F>(&mut self, action: F)
    where
        F: FnOnce() -> Result<(), TestError>,
    {
        match panic::catch_unwind(AssertUnwindSafe(action)) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => self.add(err),
            Err(payload) => self.add(TestError::from_panic(payload)),
        }
    }

    pub fn add(&mut self, error: TestError) {
        self.primary = Some(match self.primary.take() {
            None => error,
            Some(mut primary) => {
                if primary.kind() == ErrorKind::Aborted && error.kind() != ErrorKind::Aborted {
                    let mut error = error;
                    error.add_suppressed(primary);
                    error
                } else {
                    primary.add_suppressed(error);
                    primary
                }
            }
        });
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }

    pub fn first(&self) -> Option<&TestError> {
        self.primary.as_ref()
    }

    /// Re-raise the primary error, with its suppressed chain, if any.
    pub fn assert_empty(&self) -> Result<(), TestError> {
        match &self.primary {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }

    pub fn into_result(self) -> Result<(), TestError> {
        match self.primary {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub fn to_execution_result(&self) -> TestExecutionResult {
        match &self.primary {
            None => TestExecutionResult::Successful,
            Some(err) if err.is_aborted() => TestExecutionResult::Aborted(err.clone()),
            Some(err) => TestExecutionResult::Failed(err.clone()),
        }
    }
}
