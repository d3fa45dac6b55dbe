use std::{any::Any, path::PathBuf};
use thiserror::Error;

/// An error that prevents the engine from running a request at all.
#[derive(Debug, Error)]
pub enum ArborError {
    #[error("invalid unique id `{0}`")]
    InvalidUniqueId(String),

    #[error("duplicate unique id `{0}` in descriptor tree")]
    DuplicateUniqueId(String),

    #[error("unique id `{child}` does not extend the id of its parent `{parent}`")]
    DetachedChild { parent: String, child: String },

    #[error("{path} is missing or unreadable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("configuration version mismatch: file requires {required}, engine version is {actual}")]
    VersionMismatch { required: String, actual: String },

    #[error("failed to register extension: {0}")]
    Extension(#[source] TestError),

    #[error("failed to start the execution runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Classification of a [TestError].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An assertion or business failure raised by a test or hook body.
    Failure,
    /// Execution was aborted, e.g. by a failed assumption. Aborts are
    /// reported separately and do not count as failures.
    Aborted,
    /// A node or extension is misconfigured.
    Configuration,
    /// A parameter could not be resolved.
    Resolution,
    /// The invocation did not finish before its deadline.
    Timeout,
}

/// A failure raised while executing a node.
///
/// Errors raised by later cleanup steps are attached to the first error as
/// suppressed errors, so that nothing is lost.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TestError {
    kind: ErrorKind,
    message: String,
    suppressed: Vec<TestError>,
}

impl TestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        TestError {
            kind,
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failure, message)
    }

    /// A failed assumption.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Convert the payload of a caught panic into a failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test panicked with a non-string payload".to_string()
        };
        Self::failure(message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn suppressed(&self) -> &[TestError] {
        &self.suppressed
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == ErrorKind::Aborted
    }

    pub fn add_suppressed(&mut self, error: TestError) {
        self.suppressed.push(error);
    }

    /// Prefix the message, keeping kind and suppressed errors.
    pub fn context(mut self, prefix: impl AsRef<str>) -> Self {
        self.message = format!("{}: {}", prefix.as_ref(), self.message);
        self
    }
}

/// Fail the current test with `message` unless `condition` holds.
pub fn ensure(condition: bool, message: impl Into<String>) -> Result<(), TestError> {
    if condition {
        Ok(())
    } else {
        Err(TestError::failure(message))
    }
}

/// Abort the current test with `message` unless `condition` holds.
pub fn assume(condition: bool, message: impl Into<String>) -> Result<(), TestError> {
    if condition {
        Ok(())
    } else {
        Err(TestError::aborted(message))
    }
}

// Helper method to collapse nested Results
pub trait RichResult<T, E> {
    fn collapse(self) -> Result<T, E>;
}

impl<T, E> RichResult<T, E> for Result<Result<T, E>, E> {
    fn collapse(self) -> Result<T, E> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_failures() {
        let err = TestError::from_panic(Box::new("boom"));
        assert_eq!(err.kind(), ErrorKind::Failure);
        assert_eq!(err.message(), "boom");

        let err = TestError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err.message(), "owned boom");

        let err = TestError::from_panic(Box::new(17_u8));
        assert!(err.message().contains("non-string"));
    }

    #[test]
    fn context_keeps_kind_and_suppressed() {
        let mut err = TestError::resolution("no resolver");
        err.add_suppressed(TestError::failure("cleanup"));
        let err = err.context("constructor `Calc`");
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert_eq!(err.message(), "constructor `Calc`: no resolver");
        assert_eq!(err.suppressed().len(), 1);
    }

    #[test]
    fn collapse_flattens_nested_results() {
        let ok: Result<Result<u8, TestError>, TestError> = Ok(Ok(3));
        assert_eq!(ok.collapse(), Ok(3));
        let inner: Result<Result<u8, TestError>, TestError> =
            Ok(Err(TestError::failure("inner")));
        assert_eq!(inner.collapse().unwrap_err().message(), "inner");
        let outer: Result<Result<u8, TestError>, TestError> =
            Err(TestError::timeout("outer"));
        assert_eq!(outer.collapse().unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[test]
    fn ensure_and_assume() {
        assert!(ensure(true, "fine").is_ok());
        assert_eq!(ensure(false, "nope").unwrap_err().kind(), ErrorKind::Failure);
        assert!(assume(false, "skip me").unwrap_err().is_aborted());
    }
}
