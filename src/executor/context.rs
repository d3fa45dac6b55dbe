use super::instances::TestInstances;
use crate::{
    config::{ConfigurationParameters, Lifecycle},
    descriptor::{Node, TestDescriptor, UniqueId},
    errors::TestError,
    extension::{
        store::{Namespace, NamespacedStore, Store},
        ExtensionRegistry,
    },
    listener::{EngineExecutionListener, ReportEntry},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

/// The view of one executing node handed to extensions and method bodies.
///
/// Contexts form a chain mirroring the path from the root to the node.
/// Each owns a [Store] whose lookups fall back to the parent's store.
pub struct ExtensionContext {
    parent: Option<Arc<ExtensionContext>>,
    descriptor: Arc<TestDescriptor>,
    registry: Arc<ExtensionRegistry>,
    configuration: Arc<dyn ConfigurationParameters>,
    listener: Arc<dyn EngineExecutionListener>,
    store: Arc<Store>,
    lifecycle: Lifecycle,
    instances: OnceLock<TestInstances>,
    execution_exception: Mutex<Option<TestError>>,
}

impl ExtensionContext {
    pub(crate) fn new(
        parent: Option<Arc<ExtensionContext>>,
        descriptor: Arc<TestDescriptor>,
        registry: Arc<ExtensionRegistry>,
        configuration: Arc<dyn ConfigurationParameters>,
        listener: Arc<dyn EngineExecutionListener>,
        lifecycle: Lifecycle,
    ) -> Self {
        let store = Arc::new(Store::new(parent.as_ref().map(|p| Arc::clone(&p.store))));
        ExtensionContext {
            parent,
            descriptor,
            registry,
            configuration,
            listener,
            store,
            lifecycle,
            instances: OnceLock::new(),
            execution_exception: Mutex::new(None),
        }
    }

    pub fn unique_id(&self) -> &UniqueId {
        self.descriptor.id()
    }

    pub fn display_name(&self) -> &str {
        self.descriptor.display_name()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        self.descriptor.tags()
    }

    pub fn descriptor(&self) -> &Arc<TestDescriptor> {
        &self.descriptor
    }

    pub fn parent(&self) -> Option<&Arc<ExtensionContext>> {
        self.parent.as_ref()
    }

    /// The context of the engine node.
    pub fn root(&self) -> &ExtensionContext {
        let mut current = self;
        while let Some(parent) = &current.parent {
            current = &**parent;
        }
        current
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn configuration(&self) -> &Arc<dyn ConfigurationParameters> {
        &self.configuration
    }

    pub fn configuration_parameter(&self, key: &str) -> Option<String> {
        self.configuration.get(key)
    }

    pub(crate) fn listener(&self) -> &Arc<dyn EngineExecutionListener> {
        &self.listener
    }

    pub fn store(&self, namespace: Namespace) -> NamespacedStore<'_> {
        self.store.namespace(namespace)
    }

    pub fn publish_report_entry(&self, values: BTreeMap<String, String>) {
        self.listener
            .report_entry_published(&self.descriptor, &ReportEntry::from(values));
    }

    pub fn publish_entry(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = BTreeMap::new();
        values.insert(key.into(), value.into());
        self.publish_report_entry(values);
    }

    /// The instances available to this node: its own, or those of the
    /// nearest ancestor that has any.
    pub fn test_instances(&self) -> Option<&TestInstances> {
        self.instances
            .get()
            .or_else(|| self.parent.as_ref().and_then(|p| p.test_instances()))
    }

    pub(crate) fn own_instances(&self) -> Option<&TestInstances> {
        self.instances.get()
    }

    pub(crate) fn set_instances(&self, instances: TestInstances) {
        if self.instances.set(instances).is_err() {
            tracing::warn!(id = %self.unique_id(), "test instances were already set");
        }
    }

    pub fn test_instance_lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The first error raised while executing this node so far. Visible to
    /// after-test-execution and after-each callbacks.
    pub fn execution_exception(&self) -> Option<TestError> {
        self.execution_exception
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_execution_exception(&self, error: Option<TestError>) {
        *self
            .execution_exception
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Name of the nearest enclosing class, this node included.
    pub fn test_class(&self) -> Option<&str> {
        match self.descriptor.node() {
            Node::Class(class) => Some(class.name.as_str()),
            _ => self.parent.as_ref().and_then(|p| p.test_class()),
        }
    }

    /// Name of the method this node runs, if it runs one.
    pub fn test_method(&self) -> Option<&str> {
        match self.descriptor.node() {
            Node::Test(method) => Some(method.name()),
            Node::Template(template) => Some(template.method.name()),
            Node::Factory(factory) => Some(factory.method.name()),
            Node::Dynamic => self.parent.as_ref().and_then(|p| p.test_method()),
            Node::Engine | Node::Class(_) => None,
        }
    }

    /// Release every resource in this context's store.
    pub(crate) fn close(&self) -> Result<(), TestError> {
        self.store.close()
    }
}
