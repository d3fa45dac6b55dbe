use crate::errors::{RichResult, TestError};
use std::time::Duration;
use tokio::{runtime::Handle, task::JoinError, time};

fn join_error(err: JoinError) -> TestError {
    if err.is_panic() {
        TestError::from_panic(err.into_panic())
    } else {
        TestError::aborted(format!("invocation was cancelled: {}", err))
    }
}

/// Run `task` on the blocking pool and wait at most `deadline` for it.
///
/// On expiry a timeout error is returned; the task itself is not
/// interrupted and keeps running in the background until it returns.
/// Must not be called from within an async context.
pub(crate) fn run_with_deadline<T, F>(
    handle: &Handle,
    deadline: Duration,
    label: &str,
    task: F,
) -> Result<T, TestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TestError> + Send + 'static,
{
    let running = handle.spawn_blocking(task);
    handle
        .block_on(async move { time::timeout(deadline, running).await })
        .map_err(|_| {
            TestError::timeout(format!("{} timed out after {:?}", label, deadline))
        })
        .map(|joined| joined.map_err(join_error))
        .collapse()
        .collapse()
}
