#![allow(dead_code)]

use arbor::{
    descriptor::Method, extension::Extension, Engine, MapConfiguration, RecordingListener,
    TestDescriptor, TestError,
};
use std::sync::{Arc, Mutex};

/// An ordered log shared between hooks, tests, and extensions.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// A method that records `name` and succeeds.
    pub fn hook(&self, name: &str) -> Method {
        self.hook_then(name, || Ok(()))
    }

    /// A method that records `name` and then returns `outcome()`.
    pub fn hook_then<F>(&self, name: &str, outcome: F) -> Method
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        let journal = self.clone();
        let entry = name.to_string();
        Method::new(name, move |_| {
            journal.push(entry.clone());
            outcome()
        })
    }
}

pub fn run(root: Arc<TestDescriptor>) -> Arc<RecordingListener> {
    run_with(root, MapConfiguration::new())
}

pub fn run_with(root: Arc<TestDescriptor>, configuration: MapConfiguration) -> Arc<RecordingListener> {
    let listener = Arc::new(RecordingListener::new());
    Engine::new()
        .with_configuration(configuration)
        .execute(root, listener.clone())
        .unwrap();
    listener
}

pub fn run_extended(root: Arc<TestDescriptor>, extension: impl Extension) -> Arc<RecordingListener> {
    let listener = Arc::new(RecordingListener::new());
    Engine::new()
        .register_extension(extension, arbor::extension::Position::Default)
        .execute(root, listener.clone())
        .unwrap();
    listener
}
