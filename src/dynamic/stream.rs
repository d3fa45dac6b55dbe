use crate::{errors::TestError, executor::ThrowableCollector};
use std::{fmt, iter, mem};

type Source<T> = Box<dyn Iterator<Item = Result<T, TestError>> + Send>;
type CloseAction = Box<dyn FnOnce() -> Result<(), TestError> + Send>;

/// A lazy sequence that owns resources to release once it is no longer
/// consumed.
///
/// Close actions run exactly once: on an explicit [CloseableStream::close],
/// or when the stream is dropped without having been closed.
pub struct CloseableStream<T> {
    source: Source<T>,
    on_close: Vec<CloseAction>,
    closed: bool,
}

impl<T: 'static> CloseableStream<T> {
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_results(items.into_iter().map(Ok))
    }

    /// A stream whose elements may themselves be errors. An error element
    /// ends consumption of the stream.
    pub fn from_results<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<T, TestError>>,
        I::IntoIter: Send + 'static,
    {
        CloseableStream {
            source: Box::new(items.into_iter()),
            on_close: Vec::new(),
            closed: false,
        }
    }

    pub fn empty() -> Self {
        Self::from_results(iter::empty())
    }

    /// Register an action to run when the stream is closed.
    pub fn on_close<F>(mut self, action: F) -> Self
    where
        F: FnOnce() -> Result<(), TestError> + Send + 'static,
    {
        self.on_close.push(Box::new(action));
        self
    }

    fn take_parts(&mut self) -> (Source<T>, Vec<CloseAction>) {
        self.closed = true;
        (
            mem::replace(&mut self.source, Box::new(iter::empty())),
            mem::take(&mut self.on_close),
        )
    }

    /// Transform every element, keeping the close actions.
    pub fn map<U, F>(mut self, mut f: F) -> CloseableStream<U>
    where
        U: 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let (source, on_close) = self.take_parts();
        CloseableStream {
            source: Box::new(source.map(move |item| item.map(&mut f))),
            on_close,
            closed: false,
        }
    }

    /// Append `other`; closing the result closes both streams.
    pub fn chain(mut self, mut other: CloseableStream<T>) -> Self {
        let (source, mut on_close) = self.take_parts();
        let (rest, other_close) = other.take_parts();
        on_close.extend(other_close);
        CloseableStream {
            source: Box::new(source.chain(rest)),
            on_close,
            closed: false,
        }
    }
}

impl<T> CloseableStream<T> {
    /// Run every close action. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), TestError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut collector = ThrowableCollector::new();
        for action in self.on_close.drain(..) {
            collector.execute(action);
        }
        collector.into_result()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T> Iterator for CloseableStream<T> {
    type Item = Result<T, TestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.source.next()
    }
}

impl<T> Drop for CloseableStream<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close dropped stream");
        }
    }
}

impl<T> fmt::Debug for CloseableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CloseableStream")
            .field("close_actions", &self.on_close.len())
            .field("closed", &self.closed)
            .finish()
    }
}
