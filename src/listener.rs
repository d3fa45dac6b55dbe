//! Execution events emitted by the engine.
use crate::{
    descriptor::{TestDescriptor, UniqueId},
    executor::TestExecutionResult,
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, PoisonError},
    time::SystemTime,
};

/// Key/value data published by a test or extension while it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub timestamp: SystemTime,
    pub values: BTreeMap<String, String>,
}

impl ReportEntry {
    pub fn from(values: BTreeMap<String, String>) -> Self {
        ReportEntry {
            timestamp: SystemTime::now(),
            values,
        }
    }
}

/// Receives execution events.
///
/// For every node that is entered, `execution_started` is called exactly
/// once before any event of its descendants, and `execution_finished`
/// exactly once after all of them. Skipped nodes only receive
/// `execution_skipped`. Dynamic nodes are announced through
/// `dynamic_test_registered` before they start.
///
/// Listeners are shared between worker threads.
pub trait EngineExecutionListener: Send + Sync {
    fn dynamic_test_registered(&self, _descriptor: &TestDescriptor) {}

    fn execution_started(&self, descriptor: &TestDescriptor);

    fn execution_skipped(&self, descriptor: &TestDescriptor, reason: &str);

    fn execution_finished(&self, descriptor: &TestDescriptor, result: &TestExecutionResult);

    fn report_entry_published(&self, _descriptor: &TestDescriptor, _entry: &ReportEntry) {}
}

/// What happened to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    DynamicTestRegistered,
    Started,
    Skipped(String),
    Finished(TestExecutionResult),
    ReportEntryPublished(BTreeMap<String, String>),
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: UniqueId,
    pub display_name: String,
    pub is_test: bool,
    pub kind: EventKind,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            EventKind::DynamicTestRegistered => write!(f, "registered {}", self.id),
            EventKind::Started => write!(f, "started {}", self.id),
            EventKind::Skipped(reason) => write!(f, "skipped {} ({})", self.id, reason),
            EventKind::Finished(result) => write!(f, "finished {} ({})", self.id, result),
            EventKind::ReportEntryPublished(values) => {
                write!(f, "entry {} {:?}", self.id, values)
            }
        }
    }
}

/// Counts of finished and skipped tests. Containers are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub started: usize,
    pub successful: usize,
    pub failed: usize,
    pub aborted: usize,
    pub skipped: usize,
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, descriptor: &TestDescriptor, kind: EventKind) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Event {
                id: descriptor.id().clone(),
                display_name: descriptor.display_name().to_string(),
                is_test: descriptor.kind().is_test(),
                kind,
            });
    }

    /// A snapshot of all events so far, in emission order.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events concerning the node named `display_name`.
    pub fn events_for(&self, display_name: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.display_name == display_name)
            .collect()
    }

    /// The result the node named `display_name` finished with, if any.
    pub fn result_of(&self, display_name: &str) -> Option<TestExecutionResult> {
        self.events_for(display_name)
            .into_iter()
            .find_map(|e| match e.kind {
                EventKind::Finished(result) => Some(result),
                _ => None,
            })
    }

    /// The reason the node named `display_name` was skipped, if it was.
    pub fn skip_reason(&self, display_name: &str) -> Option<String> {
        self.events_for(display_name)
            .into_iter()
            .find_map(|e| match e.kind {
                EventKind::Skipped(reason) => Some(reason),
                _ => None,
            })
    }

    pub fn was_started(&self, display_name: &str) -> bool {
        self.events_for(display_name)
            .iter()
            .any(|e| e.kind == EventKind::Started)
    }

    /// Display names of dynamically registered nodes, in registration order.
    pub fn dynamic_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == EventKind::DynamicTestRegistered)
            .map(|e| e.display_name)
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for event in self.events().iter().filter(|e| e.is_test) {
            match &event.kind {
                EventKind::Started => summary.started += 1,
                EventKind::Skipped(_) => summary.skipped += 1,
                EventKind::Finished(TestExecutionResult::Successful) => summary.successful += 1,
                EventKind::Finished(TestExecutionResult::Failed(_)) => summary.failed += 1,
                EventKind::Finished(TestExecutionResult::Aborted(_)) => summary.aborted += 1,
                _ => (),
            }
        }
        summary
    }
}

impl EngineExecutionListener for RecordingListener {
    fn dynamic_test_registered(&self, descriptor: &TestDescriptor) {
        self.record(descriptor, EventKind::DynamicTestRegistered);
    }

    fn execution_started(&self, descriptor: &TestDescriptor) {
        self.record(descriptor, EventKind::Started);
    }

    fn execution_skipped(&self, descriptor: &TestDescriptor, reason: &str) {
        self.record(descriptor, EventKind::Skipped(reason.to_string()));
    }

    fn execution_finished(&self, descriptor: &TestDescriptor, result: &TestExecutionResult) {
        self.record(descriptor, EventKind::Finished(result.clone()));
    }

    fn report_entry_published(&self, descriptor: &TestDescriptor, entry: &ReportEntry) {
        self.record(
            descriptor,
            EventKind::ReportEntryPublished(entry.values.clone()),
        );
    }
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl EngineExecutionListener for LoggingListener {
    fn dynamic_test_registered(&self, descriptor: &TestDescriptor) {
        tracing::debug!(id = %descriptor.id(), "dynamic test registered");
    }

    fn execution_started(&self, descriptor: &TestDescriptor) {
        tracing::info!(id = %descriptor.id(), name = descriptor.display_name(), "started");
    }

    fn execution_skipped(&self, descriptor: &TestDescriptor, reason: &str) {
        tracing::info!(id = %descriptor.id(), reason, "skipped");
    }

    fn execution_finished(&self, descriptor: &TestDescriptor, result: &TestExecutionResult) {
        match result {
            TestExecutionResult::Successful => {
                tracing::info!(id = %descriptor.id(), "successful")
            }
            TestExecutionResult::Aborted(err) => {
                tracing::warn!(id = %descriptor.id(), error = %err, "aborted")
            }
            TestExecutionResult::Failed(err) => {
                tracing::error!(
                    id = %descriptor.id(),
                    error = %err,
                    suppressed = err.suppressed().len(),
                    "failed"
                )
            }
        }
    }

    fn report_entry_published(&self, descriptor: &TestDescriptor, entry: &ReportEntry) {
        tracing::info!(id = %descriptor.id(), values = ?entry.values, "report entry");
    }
}
