//! The engine drives a descriptor tree to completion, reporting every node's
//! outcome to an [EngineExecutionListener].

mod collector;
mod conditions;
mod context;
mod expander;
pub mod instances;
mod locks;
mod node;
mod resolver;
mod results;
mod timeout;

pub use collector::ThrowableCollector;
pub use conditions::ConditionEvaluator;
pub use context::ExtensionContext;
pub use instances::{InstanceHandle, TestInstances};
pub use locks::{LockGuard, ResourceLocks};
pub use resolver::resolve_parameters;
pub use results::TestExecutionResult;

use crate::{
    config::{ConfigurationParameters, MapConfiguration},
    descriptor::{tree, Declared, TestDescriptor},
    errors::ArborError,
    extension::{
        builtin::{TestInfoResolver, TestReporterResolver},
        Extension, ExtensionRegistry, Position,
    },
    listener::EngineExecutionListener,
};
use node::{NodeExecutor, Parent, Settings};
use std::sync::Arc;
use tokio::runtime;

/// Executes descriptor trees.
///
/// ```
/// use arbor::descriptor::{DescriptorBuilder, Method};
/// use arbor::{Engine, RecordingListener};
/// use std::sync::Arc;
///
/// let root = DescriptorBuilder::engine("arbor")
///     .child(DescriptorBuilder::test(Method::new("passes", |_| Ok(()))))
///     .build();
/// let listener = Arc::new(RecordingListener::new());
/// Engine::new().execute(root, listener.clone()).unwrap();
/// assert_eq!(listener.summary().successful, 1);
/// ```
pub struct Engine {
    configuration: Arc<dyn ConfigurationParameters>,
    extensions: Vec<Declared>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            configuration: Arc::new(MapConfiguration::new()),
            extensions: Vec::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: impl ConfigurationParameters + 'static) -> Self {
        self.configuration = Arc::new(configuration);
        self
    }

    pub fn with_shared_configuration(mut self, configuration: Arc<dyn ConfigurationParameters>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Register an extension visible to every node of the run.
    pub fn register_extension(mut self, extension: impl Extension, position: Position) -> Self {
        self.extensions.push(Declared {
            extension: Arc::new(extension),
            position,
        });
        self
    }

    pub fn configuration(&self) -> &Arc<dyn ConfigurationParameters> {
        &self.configuration
    }

    /// Execute the tree rooted at `root`.
    ///
    /// Test failures are reported to `listener`; an `Err` means the run could
    /// not start at all.
    pub fn execute(
        &self,
        root: Arc<TestDescriptor>,
        listener: Arc<dyn EngineExecutionListener>,
    ) -> Result<(), ArborError> {
        tree::validate(&root)?;
        let settings = Settings::from_configuration(&*self.configuration);

        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(settings.parallelism)
            .build()
            .map_err(ArborError::Runtime)?;

        let builtins: [Arc<dyn Extension>; 2] =
            [Arc::new(TestInfoResolver), Arc::new(TestReporterResolver)];
        let mut registry = ExtensionRegistry::root();
        for extension in builtins {
            registry
                .register(extension, Position::Default)
                .map_err(ArborError::Extension)?;
        }
        for declared in &self.extensions {
            registry
                .register(Arc::clone(&declared.extension), declared.position)
                .map_err(ArborError::Extension)?;
        }

        let nodes = tree::count(&root);
        tracing::info!(
            root = %root.id(),
            nodes,
            parallel = settings.parallel,
            parallelism = settings.parallelism,
            "executing test plan"
        );

        let executor = NodeExecutor::new(
            Arc::clone(&self.configuration),
            listener,
            runtime.handle().clone(),
            settings,
        );
        executor.execute(root, &Parent::root(Arc::new(registry)));

        // Invocations abandoned by a timeout may still be running.
        runtime.shutdown_background();
        Ok(())
    }
}
