//! Test instance chains: creation, post-processing, and destruction.
use super::{resolver, ExtensionContext, ThrowableCollector};
use crate::{
    descriptor::{ClassNode, Instance, Invocation, Method},
    errors::TestError,
    extension::CapabilityKind,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, TryLockError,
};

/// A shared, lockable test instance.
///
/// An instance whose invocation timed out is abandoned: the invocation may
/// still hold it, so later steps fail instead of waiting for it.
#[derive(Clone)]
pub struct InstanceHandle {
    instance: Arc<Mutex<Instance>>,
    abandoned: Arc<AtomicBool>,
}

impl InstanceHandle {
    pub(crate) fn new(instance: Instance) -> Self {
        InstanceHandle {
            instance: Arc::new(Mutex::new(instance)),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    /// Lock the instance, failing with a timeout error if it is abandoned
    /// and still in use.
    pub fn lock(&self) -> Result<MutexGuard<'_, Instance>, TestError> {
        if !self.is_abandoned() {
            return Ok(self.instance.lock().unwrap_or_else(PoisonError::into_inner));
        }
        match self.instance.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(TestError::timeout(
                "test instance is still in use by an invocation that timed out",
            )),
        }
    }
}

/// The instances of one node, outermost enclosing class first.
#[derive(Clone, Default)]
pub struct TestInstances {
    levels: Vec<(String, InstanceHandle)>,
}

impl TestInstances {
    /// The instance of the class declaring the current node.
    pub fn innermost(&self) -> Option<&InstanceHandle> {
        self.levels.last().map(|(_, handle)| handle)
    }

    /// The instance of the class named `class`.
    pub fn find(&self, class: &str) -> Option<&InstanceHandle> {
        self.levels
            .iter()
            .rev()
            .find(|(name, _)| name == class)
            .map(|(_, handle)| handle)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Run `f` on the innermost instance downcast to `T`.
    pub fn with_innermost<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.innermost()?.lock().ok()?;
        guard.downcast_mut::<T>().map(f)
    }
}

/// Instances produced for one node.
pub(crate) struct Instantiated {
    pub instances: TestInstances,
    /// The levels created for this node, as opposed to inherited from a
    /// per-class ancestor. Only these are destroyed by the node.
    pub created: Vec<(String, InstanceHandle)>,
}

/// Build the instance chain for `context`.
///
/// The chain of the nearest ancestor that already holds instances is reused;
/// every enclosing class below it is constructed fresh, outermost first,
/// each constructor receiving the enclosing instance.
pub(crate) fn instantiate(context: &ExtensionContext) -> Result<Instantiated, TestError> {
    let mut pending: Vec<&ClassNode> = Vec::new();
    let mut instances = TestInstances::default();
    let mut current = Some(context);
    while let Some(ctx) = current {
        if let Some(existing) = ctx.own_instances() {
            instances = existing.clone();
            break;
        }
        if let Some(class) = ctx.descriptor().class() {
            pending.push(class);
        }
        current = ctx.parent().map(|p| &**p);
    }
    pending.reverse();

    let mut created = Vec::new();
    for class in pending {
        let instance = construct(class, instances.innermost(), context)?;
        let handle = InstanceHandle::new(instance);
        tracing::debug!(class = %class.name, id = %context.unique_id(), "created test instance");
        instances.levels.push((class.name.clone(), handle.clone()));
        created.push((class.name.clone(), handle));
    }
    Ok(Instantiated { instances, created })
}

fn construct(
    class: &ClassNode,
    enclosing: Option<&InstanceHandle>,
    context: &ExtensionContext,
) -> Result<Instance, TestError> {
    let constructor = &class.constructor;
    let mut instance = invoke(constructor, enclosing, context)?;
    for extension in context
        .registry()
        .extensions(CapabilityKind::InstancePostProcessor)
    {
        if let Some(processor) = extension.as_instance_post_processor() {
            processor.post_process(&mut *instance, context)?;
        }
    }
    Ok(instance)
}

/// Resolve the parameters of `method` and invoke it on `instance`, or
/// without an instance if the method is static.
pub(crate) fn invoke<R>(
    method: &Method<R>,
    instance: Option<&InstanceHandle>,
    context: &ExtensionContext,
) -> Result<R, TestError> {
    let args = resolver::resolve_parameters(method.name(), method.parameters(), context)?;
    match instance {
        Some(handle) => {
            let mut guard = handle.lock()?;
            let mut invocation = Invocation::new(context, Some(&mut **guard), args);
            method.invoke(&mut invocation)
        }
        None => method.invoke(&mut Invocation::new(context, None, args)),
    }
}

/// Invoke `method` on the instance of the class named `class`, or without
/// an instance when the method is static.
pub(crate) fn invoke_on_class(
    method: &Method,
    class: &str,
    context: &ExtensionContext,
) -> Result<(), TestError> {
    if method.is_static() {
        return invoke(method, None, context);
    }
    let instance = context
        .test_instances()
        .and_then(|instances| instances.find(class))
        .cloned()
        .ok_or_else(|| {
            TestError::configuration(format!(
                "No test instance of [{}] is available to invoke [{}]",
                class,
                method.name()
            ))
        })?;
    invoke(method, Some(&instance), context)
}

/// Run the pre-destroy callbacks for every created instance, innermost
/// first, then drop the instances.
pub(crate) fn destroy(
    created: Vec<(String, InstanceHandle)>,
    context: &ExtensionContext,
) -> Result<(), TestError> {
    let callbacks = context
        .registry()
        .extensions(CapabilityKind::InstancePreDestroy);
    let mut collector = ThrowableCollector::new();
    for (class, handle) in created.into_iter().rev() {
        for extension in &callbacks {
            if let Some(callback) = extension.as_instance_pre_destroy() {
                collector.execute(|| {
                    let mut instance = handle.lock()?;
                    callback.pre_destroy(&mut **instance, context)
                });
            }
        }
        tracing::debug!(class = %class, id = %context.unique_id(), "destroyed test instance");
    }
    collector.into_result()
}
