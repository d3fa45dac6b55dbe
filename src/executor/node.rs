//! Drives a single descriptor through its lifecycle and recurses into its
//! children.
use super::{
    conditions::ConditionEvaluator,
    expander,
    instances::{self, InstanceHandle},
    locks::ResourceLocks,
    timeout::run_with_deadline,
    ExtensionContext, TestExecutionResult, ThrowableCollector,
};
use crate::{
    config::{get_parsed, keys, ConfigurationParameters, ExecutionMode, HookOrder, Lifecycle},
    descriptor::{ordered_hooks, ClassNode, DescriptorKind, Method, Node, TestDescriptor},
    errors::{ErrorKind, TestError},
    extension::{
        builtin::{HookKind, LifecycleMethodAdapter},
        CapabilityKind, Extension, ExtensionRegistry, Position, Scope,
    },
    listener::EngineExecutionListener,
};
use futures::{stream, StreamExt};
use std::{
    collections::HashSet,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use tokio::runtime::Handle;

/// Engine-wide settings read once from the configuration.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub parallel: bool,
    pub parallelism: usize,
    pub default_mode: ExecutionMode,
    pub classes_mode: ExecutionMode,
    pub default_lifecycle: Lifecycle,
    pub default_timeout: Option<Duration>,
    pub hook_order: HookOrder,
}

impl Settings {
    pub(crate) fn from_configuration(configuration: &dyn ConfigurationParameters) -> Self {
        let default_mode =
            get_parsed(configuration, keys::DEFAULT_EXECUTION_MODE).unwrap_or_default();
        Settings {
            parallel: configuration
                .get_bool(keys::PARALLEL_ENABLED)
                .unwrap_or(false),
            parallelism: configuration
                .get_usize(keys::PARALLELISM)
                .filter(|n| *n > 0)
                .unwrap_or_else(num_cpus::get),
            default_mode,
            classes_mode: get_parsed(configuration, keys::DEFAULT_CLASSES_EXECUTION_MODE)
                .unwrap_or(default_mode),
            default_lifecycle: get_parsed(configuration, keys::DEFAULT_LIFECYCLE)
                .unwrap_or_default(),
            default_timeout: configuration.get_duration(keys::DEFAULT_TIMEOUT),
            hook_order: get_parsed(configuration, keys::DEFAULT_HOOK_ORDER).unwrap_or_default(),
        }
    }
}

struct Shared {
    configuration: Arc<dyn ConfigurationParameters>,
    listener: Arc<dyn EngineExecutionListener>,
    conditions: ConditionEvaluator,
    locks: Arc<ResourceLocks>,
    runtime: Handle,
    settings: Settings,
}

/// What a node inherits from the node above it.
#[derive(Clone)]
pub(crate) struct Parent {
    context: Option<Arc<ExtensionContext>>,
    registry: Arc<ExtensionRegistry>,
    /// Exclusive resources held by ancestors.
    held: Arc<HashSet<String>>,
}

impl Parent {
    pub(crate) fn root(registry: Arc<ExtensionRegistry>) -> Self {
        Parent {
            context: None,
            registry,
            held: Arc::new(HashSet::new()),
        }
    }
}

/// Executes descriptor trees. Cheap to clone; clones share all state.
#[derive(Clone)]
pub(crate) struct NodeExecutor {
    shared: Arc<Shared>,
}

/// Run every callback of `kind`, optionally stopping at the first error.
fn run_callbacks<F>(
    collector: &mut ThrowableCollector,
    extensions: Vec<Arc<dyn Extension>>,
    stop_on_error: bool,
    mut call: F,
) where
    F: FnMut(&dyn Extension) -> Option<Result<(), TestError>>,
{
    for extension in extensions {
        if stop_on_error && !collector.is_empty() {
            break;
        }
        collector.execute(|| call(&*extension).unwrap_or(Ok(())));
    }
}

/// Join the errors of cleanup steps run after a node produced `result`.
fn with_cleanup(result: TestExecutionResult, cleanup: Result<(), TestError>) -> TestExecutionResult {
    let err = match cleanup {
        Ok(()) => return result,
        Err(err) => err,
    };
    let mut collector = ThrowableCollector::new();
    if let Some(primary) = result.error() {
        collector.add(primary.clone());
    }
    collector.add(err);
    collector.to_execution_result()
}

/// The exclusive resources `descriptor` takes when it starts. A node that
/// declares a resource its ancestors do not hold takes every resource
/// declared anywhere in its static subtree at once; other nodes take none.
fn resources_to_acquire<'a>(descriptor: &'a TestDescriptor, held: &HashSet<String>) -> Vec<&'a String> {
    if descriptor.resource_locks().iter().all(|name| held.contains(name)) {
        return Vec::new();
    }
    let mut names = Vec::new();
    descriptor.walk(&mut |d| names.extend(d.resource_locks()));
    names
}

fn scope_of(descriptor: &TestDescriptor) -> Scope {
    match descriptor.node() {
        Node::Engine => Scope::Engine,
        Node::Class(_) => Scope::Class,
        Node::Test(_) | Node::Template(_) | Node::Factory(_) => Scope::Method,
        Node::Dynamic => Scope::Invocation,
    }
}

impl NodeExecutor {
    pub(crate) fn new(
        configuration: Arc<dyn ConfigurationParameters>,
        listener: Arc<dyn EngineExecutionListener>,
        runtime: Handle,
        settings: Settings,
    ) -> Self {
        let conditions = ConditionEvaluator::new(&*configuration);
        NodeExecutor {
            shared: Arc::new(Shared {
                configuration,
                listener,
                conditions,
                locks: Arc::new(ResourceLocks::new()),
                runtime,
                settings,
            }),
        }
    }

    pub(crate) fn listener(&self) -> &Arc<dyn EngineExecutionListener> {
        &self.shared.listener
    }

    pub(crate) fn configuration(&self) -> &Arc<dyn ConfigurationParameters> {
        &self.shared.configuration
    }

    /// The registry of `descriptor`: its declared extensions, followed by
    /// adapters for the before-each and after-each methods of a class.
    fn registry_for(
        &self,
        descriptor: &TestDescriptor,
        parent: &Arc<ExtensionRegistry>,
    ) -> Result<ExtensionRegistry, TestError> {
        let mut registry = ExtensionRegistry::child(Arc::clone(parent), scope_of(descriptor));
        for declared in descriptor.extensions() {
            registry.register(Arc::clone(&declared.extension), declared.position)?;
        }
        if let Some(class) = descriptor.class() {
            let order = class.hook_order.unwrap_or(self.shared.settings.hook_order);
            for hook in ordered_hooks(&class.before_each, order) {
                let adapter = LifecycleMethodAdapter::new(&class.name, hook, HookKind::BeforeEach);
                registry.register(Arc::new(adapter), Position::Default)?;
            }
            // Registered in reverse: after callbacks are applied last registered first.
            for hook in ordered_hooks(&class.after_each, order).into_iter().rev() {
                let adapter = LifecycleMethodAdapter::new(&class.name, hook, HookKind::AfterEach);
                registry.register(Arc::new(adapter), Position::Default)?;
            }
        }
        Ok(registry)
    }

    fn lifecycle_of(&self, descriptor: &TestDescriptor, parent: &Parent) -> Lifecycle {
        match descriptor.class() {
            Some(class) => class
                .lifecycle
                .unwrap_or(self.shared.settings.default_lifecycle),
            None => parent
                .context
                .as_ref()
                .map(|c| c.test_instance_lifecycle())
                .unwrap_or(self.shared.settings.default_lifecycle),
        }
    }

    fn mode_of(&self, child: &TestDescriptor, under_per_class: bool) -> ExecutionMode {
        let settings = &self.shared.settings;
        if !settings.parallel {
            return ExecutionMode::SameThread;
        }
        if let Some(mode) = child.execution_mode() {
            return mode;
        }
        if under_per_class {
            return ExecutionMode::SameThread;
        }
        match child.node() {
            Node::Class(_) => settings.classes_mode,
            _ => settings.default_mode,
        }
    }

    fn context_for(
        &self,
        descriptor: &Arc<TestDescriptor>,
        parent: &Parent,
        registry: Arc<ExtensionRegistry>,
    ) -> Arc<ExtensionContext> {
        Arc::new(ExtensionContext::new(
            parent.context.clone(),
            Arc::clone(descriptor),
            registry,
            Arc::clone(&self.shared.configuration),
            Arc::clone(&self.shared.listener),
            self.lifecycle_of(descriptor, parent),
        ))
    }

    /// Execute `descriptor` and everything below it, reporting every outcome
    /// to the listener.
    pub(crate) fn execute(&self, descriptor: Arc<TestDescriptor>, parent: &Parent) {
        let listener = &self.shared.listener;
        let guard = self
            .shared
            .locks
            .acquire(resources_to_acquire(&descriptor, &parent.held), &parent.held);
        let held = if guard.is_empty() {
            Arc::clone(&parent.held)
        } else {
            let mut held = (*parent.held).clone();
            held.extend(guard.names().cloned());
            Arc::new(held)
        };

        let registry = match self.registry_for(&descriptor, &parent.registry) {
            Ok(registry) => Arc::new(registry),
            Err(err) => {
                tracing::debug!(id = %descriptor.id(), error = %err, "failed to register extensions");
                let context = self.context_for(&descriptor, parent, Arc::clone(&parent.registry));
                listener.execution_started(&descriptor);
                let reason = format!("Extension registration failed: {}", err.message());
                self.skip_children(&context, &reason);
                self.finish(&context, TestExecutionResult::Failed(err));
                return;
            }
        };
        let context = self.context_for(&descriptor, parent, registry);

        match self.shared.conditions.evaluate(&context) {
            Ok(verdict) if verdict.is_disabled() => {
                let reason = verdict.reason().unwrap_or("disabled").to_string();
                self.report_skipped(&context, &reason);
                if let Err(err) = context.close() {
                    tracing::warn!(id = %descriptor.id(), error = %err, "failed to close store of skipped node");
                }
                return;
            }
            Ok(_) => (),
            Err(err) => {
                listener.execution_started(&descriptor);
                let reason = format!("Condition evaluation failed: {}", err.message());
                self.skip_children(&context, &reason);
                self.finish(&context, TestExecutionResult::Failed(err));
                return;
            }
        }

        tracing::debug!(id = %descriptor.id(), "started");
        listener.execution_started(&descriptor);
        let result = self.execute_node(&context, &held);
        self.finish(&context, result);
        drop(guard);
    }

    /// Close the store of a started node and report its outcome.
    fn finish(&self, context: &ExtensionContext, result: TestExecutionResult) {
        let descriptor = context.descriptor();
        let result = with_cleanup(result, context.close());
        if descriptor.kind() == DescriptorKind::Test {
            self.notify_watchers(context, &result);
        }
        tracing::debug!(id = %descriptor.id(), %result, "finished");
        self.shared.listener.execution_finished(descriptor, &result);
    }

    fn execute_node(
        &self,
        context: &Arc<ExtensionContext>,
        held: &Arc<HashSet<String>>,
    ) -> TestExecutionResult {
        let descriptor = Arc::clone(context.descriptor());
        match descriptor.node() {
            Node::Engine => {
                self.execute_children(context, held);
                TestExecutionResult::Successful
            }
            Node::Class(class) => self.execute_class(context, class, held),
            Node::Test(method) => self.execute_leaf(context, |ctx, instance| {
                self.invoke_test(ctx, method, instance, descriptor.timeout())
            }),
            Node::Template(template) => expander::execute_template(self, context, template, held),
            Node::Factory(factory) => self.execute_leaf(context, |ctx, instance| {
                expander::run_factory(self, ctx, factory, instance)
            }),
            Node::Dynamic => {
                // An invocation of a template runs the template's method.
                let parent = context.parent().map(|p| Arc::clone(p.descriptor()));
                match parent.as_deref().map(|p| (p.node(), p.timeout())) {
                    Some((Node::Template(template), limit)) => {
                        self.execute_leaf(context, |ctx, instance| {
                            self.invoke_test(ctx, &template.method, instance, limit)
                        })
                    }
                    _ => {
                        self.execute_children(context, held);
                        TestExecutionResult::Successful
                    }
                }
            }
        }
    }

    /// Invoke a test method, racing it against its timeout if it has one.
    fn invoke_test(
        &self,
        context: &Arc<ExtensionContext>,
        method: &Method,
        instance: Option<&InstanceHandle>,
        limit: Option<Duration>,
    ) -> Result<(), TestError> {
        let instance = if method.is_static() {
            None
        } else {
            instance.cloned()
        };
        match limit.or(self.shared.settings.default_timeout) {
            None => instances::invoke(method, instance.as_ref(), context),
            Some(deadline) => {
                let label = format!("Execution of [{}]", context.display_name());
                let method = method.clone();
                let invoked = instance.clone();
                let context = Arc::clone(context);
                let outcome = run_with_deadline(&self.shared.runtime, deadline, &label, move || {
                    instances::invoke(&method, invoked.as_ref(), &context)
                });
                match (&outcome, &instance) {
                    (Err(err), Some(handle)) if err.kind() == ErrorKind::Timeout => handle.abandon(),
                    _ => (),
                }
                outcome
            }
        }
    }

    /// The leaf lifecycle around `body`: instances, before-each callbacks,
    /// before-test-execution callbacks, the body, then the after steps,
    /// which always run once the before steps were entered.
    pub(crate) fn execute_leaf<F>(
        &self,
        context: &Arc<ExtensionContext>,
        body: F,
    ) -> TestExecutionResult
    where
        F: FnOnce(&Arc<ExtensionContext>, Option<&InstanceHandle>) -> Result<(), TestError>,
    {
        let registry = Arc::clone(context.registry());
        let mut collector = ThrowableCollector::new();
        let mut created = Vec::new();
        collector.execute(|| {
            let instantiated = instances::instantiate(context)?;
            created = instantiated.created;
            context.set_instances(instantiated.instances);
            Ok(())
        });
        if !collector.is_empty() {
            return collector.to_execution_result();
        }

        run_callbacks(
            &mut collector,
            registry.extensions(CapabilityKind::BeforeEach),
            true,
            |e| e.as_before_each().map(|cb| cb.before_each(context)),
        );
        if collector.is_empty() {
            run_callbacks(
                &mut collector,
                registry.extensions(CapabilityKind::BeforeTestExecution),
                true,
                |e| {
                    e.as_before_test_execution()
                        .map(|cb| cb.before_test_execution(context))
                },
            );
            if collector.is_empty() {
                let instance = context
                    .test_instances()
                    .and_then(|i| i.innermost())
                    .cloned();
                collector.execute(|| body(context, instance.as_ref()));
            }
            context.set_execution_exception(collector.first().cloned());
            run_callbacks(
                &mut collector,
                registry.extensions(CapabilityKind::AfterTestExecution),
                false,
                |e| {
                    e.as_after_test_execution()
                        .map(|cb| cb.after_test_execution(context))
                },
            );
        }
        context.set_execution_exception(collector.first().cloned());
        run_callbacks(
            &mut collector,
            registry.extensions(CapabilityKind::AfterEach),
            false,
            |e| e.as_after_each().map(|cb| cb.after_each(context)),
        );
        collector.execute(|| instances::destroy(mem::take(&mut created), context));
        collector.to_execution_result()
    }

    fn execute_class(
        &self,
        context: &Arc<ExtensionContext>,
        class: &ClassNode,
        held: &Arc<HashSet<String>>,
    ) -> TestExecutionResult {
        let lifecycle = context.test_instance_lifecycle();
        let order = class.hook_order.unwrap_or(self.shared.settings.hook_order);
        let registry = Arc::clone(context.registry());
        let mut collector = ThrowableCollector::new();
        if lifecycle == Lifecycle::PerMethod {
            let offending = class
                .before_all
                .iter()
                .chain(&class.after_all)
                .find(|m| !m.is_static());
            if let Some(hook) = offending {
                collector.add(TestError::configuration(format!(
                    "Lifecycle method [{}::{}] must be static unless the test class uses the per_class lifecycle",
                    class.name,
                    hook.name()
                )));
            }
        }

        let mut created = Vec::new();
        if collector.is_empty() && lifecycle == Lifecycle::PerClass {
            collector.execute(|| {
                let instantiated = instances::instantiate(context)?;
                created = instantiated.created;
                context.set_instances(instantiated.instances);
                Ok(())
            });
        }

        let instantiated = collector.is_empty();
        let mut hooks_entered = false;
        if instantiated {
            run_callbacks(
                &mut collector,
                registry.extensions(CapabilityKind::BeforeAll),
                true,
                |e| e.as_before_all().map(|cb| cb.before_all(context)),
            );
            if collector.is_empty() {
                hooks_entered = true;
                for hook in ordered_hooks(&class.before_all, order) {
                    if !collector.is_empty() {
                        break;
                    }
                    collector.execute(|| instances::invoke_on_class(&hook, &class.name, context));
                }
            }
        }

        match collector.first() {
            None => self.execute_children(context, held),
            Some(err) => {
                let reason = format!("Container setup failed: {}", err.message());
                self.skip_children(context, &reason);
            }
        }

        if hooks_entered {
            for hook in ordered_hooks(&class.after_all, order) {
                collector.execute(|| instances::invoke_on_class(&hook, &class.name, context));
            }
        }
        if instantiated {
            run_callbacks(
                &mut collector,
                registry.extensions(CapabilityKind::AfterAll),
                false,
                |e| e.as_after_all().map(|cb| cb.after_all(context)),
            );
        }
        collector.execute(|| instances::destroy(mem::take(&mut created), context));
        collector.to_execution_result()
    }

    /// Run the static children of a container: same-thread children first,
    /// in order, then concurrent children on the blocking pool.
    ///
    /// When modes are mixed, start events therefore follow pre-order only
    /// within each group: every same-thread child starts before the first
    /// concurrent one, wherever it is declared.
    ///
    /// Children of a node that holds exclusive resources always run on the
    /// same thread, since they share the resources their ancestor took.
    fn execute_children(&self, context: &Arc<ExtensionContext>, held: &Arc<HashSet<String>>) {
        let descriptor = context.descriptor();
        if descriptor.children().is_empty() {
            return;
        }
        let parent = Parent {
            context: Some(Arc::clone(context)),
            registry: Arc::clone(context.registry()),
            held: Arc::clone(held),
        };
        let under_per_class =
            descriptor.class().is_some() && context.test_instance_lifecycle() == Lifecycle::PerClass;
        // Below a holder of exclusive resources everything runs on its thread.
        let locked = !held.is_empty();
        let (concurrent, same_thread): (Vec<_>, Vec<_>) = descriptor
            .children()
            .iter()
            .cloned()
            .partition(|child| {
                !locked && self.mode_of(child, under_per_class) == ExecutionMode::Concurrent
            });

        for child in same_thread {
            self.execute(child, &parent);
        }
        if concurrent.is_empty() {
            return;
        }

        let runtime = &self.shared.runtime;
        let tasks = concurrent.into_iter().map(|child| {
            let executor = self.clone();
            let parent = parent.clone();
            runtime.spawn_blocking(move || executor.execute(child, &parent))
        });
        runtime.block_on(
            stream::iter(tasks)
                .buffer_unordered(self.shared.settings.parallelism)
                .for_each(|joined| async move {
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "concurrent node did not complete");
                    }
                }),
        );
    }

    /// Report `context`'s node and all of its static descendants as skipped.
    fn report_skipped(&self, context: &Arc<ExtensionContext>, reason: &str) {
        let descriptor = context.descriptor();
        let listener = &self.shared.listener;
        tracing::debug!(id = %descriptor.id(), reason, "skipped");
        listener.execution_skipped(descriptor, reason);
        if descriptor.kind() == DescriptorKind::Test {
            for extension in context.registry().extensions(CapabilityKind::Watcher) {
                if let Some(watcher) = extension.as_watcher() {
                    let notified =
                        panic::catch_unwind(AssertUnwindSafe(|| watcher.test_disabled(context, reason)));
                    if notified.is_err() {
                        tracing::warn!(watcher = extension.name(), "test watcher panicked");
                    }
                }
            }
        }
        self.skip_children(context, reason);
    }

    /// Report every static descendant of `context`'s node as skipped. Each
    /// descendant gets its own context so watchers of skipped tests are
    /// notified.
    fn skip_children(&self, context: &Arc<ExtensionContext>, reason: &str) {
        let parent = Parent {
            context: Some(Arc::clone(context)),
            registry: Arc::clone(context.registry()),
            held: Arc::new(HashSet::new()),
        };
        for child in context.descriptor().children() {
            let registry = match self.registry_for(child, &parent.registry) {
                Ok(registry) => Arc::new(registry),
                Err(err) => {
                    tracing::debug!(id = %child.id(), error = %err, "failed to register extensions of skipped node");
                    Arc::clone(&parent.registry)
                }
            };
            let skipped = self.context_for(child, &parent, registry);
            self.report_skipped(&skipped, reason);
            if let Err(err) = skipped.close() {
                tracing::warn!(id = %child.id(), error = %err, "failed to close store of skipped node");
            }
        }
    }

    pub(crate) fn notify_watchers(&self, context: &ExtensionContext, result: &TestExecutionResult) {
        for extension in context.registry().extensions(CapabilityKind::Watcher) {
            let watcher = match extension.as_watcher() {
                Some(watcher) => watcher,
                None => continue,
            };
            let notified = panic::catch_unwind(AssertUnwindSafe(|| match result {
                TestExecutionResult::Successful => watcher.test_successful(context),
                TestExecutionResult::Aborted(err) => watcher.test_aborted(context, err),
                TestExecutionResult::Failed(err) => watcher.test_failed(context, err),
            }));
            if notified.is_err() {
                tracing::warn!(watcher = extension.name(), "test watcher panicked");
            }
        }
    }

    /// Register and execute a node synthesized at run time below `parent`.
    pub(crate) fn execute_dynamic(
        &self,
        descriptor: Arc<TestDescriptor>,
        parent: &Arc<ExtensionContext>,
        held: &Arc<HashSet<String>>,
    ) {
        self.shared.listener.dynamic_test_registered(&descriptor);
        let parent = Parent {
            context: Some(Arc::clone(parent)),
            registry: Arc::clone(parent.registry()),
            held: Arc::clone(held),
        };
        self.execute(descriptor, &parent);
    }
}
