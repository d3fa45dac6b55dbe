//! The descriptor tree handed to the engine by discovery.
//!
//! A descriptor is plain data: identity, display name, kind, tags, source
//! location, children, and the executable payload of the node. Descriptors
//! are immutable once execution starts; dynamic invocations are synthesized
//! during execution and never stored in the tree.

mod method;
pub mod tree;
mod unique_id;

pub use method::{ClassNode, FactoryNode, Instance, Invocation, Method, TemplateNode};
pub(crate) use method::ordered_hooks;
pub use unique_id::{Segment, UniqueId};

use crate::{
    config::ExecutionMode,
    extension::{builtin::Disabled, Extension, Position},
};
use std::{collections::BTreeSet, fmt, path::PathBuf, sync::Arc, time::Duration};

/// What a node reports as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Container,
    Test,
    /// A node that is a test in its own right and also produces children,
    /// e.g. a test template or factory.
    ContainerAndTest,
}

impl DescriptorKind {
    pub fn is_container(self) -> bool {
        matches!(self, DescriptorKind::Container | DescriptorKind::ContainerAndTest)
    }

    pub fn is_test(self) -> bool {
        matches!(self, DescriptorKind::Test | DescriptorKind::ContainerAndTest)
    }
}

/// Where a node was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSource {
    Class { name: String },
    Method { class: Option<String>, method: String },
    File { path: PathBuf, line: Option<u32> },
}

/// The executable payload of a node.
pub enum Node {
    /// The root of a run. Carries engine-wide extensions only.
    Engine,
    Class(ClassNode),
    Test(Method),
    Template(TemplateNode),
    Factory(FactoryNode),
    /// A node synthesized from a dynamic stream.
    Dynamic,
}

impl Node {
    fn label(&self) -> &'static str {
        match self {
            Node::Engine => "engine",
            Node::Class(_) => "class",
            Node::Test(_) => "test",
            Node::Template(_) => "template",
            Node::Factory(_) => "factory",
            Node::Dynamic => "dynamic",
        }
    }
}

/// An extension declared on a node, with its ordering position.
#[derive(Clone)]
pub struct Declared {
    pub extension: Arc<dyn Extension>,
    pub position: Position,
}

/// One node in the execution tree.
pub struct TestDescriptor {
    id: UniqueId,
    display_name: String,
    kind: DescriptorKind,
    tags: BTreeSet<String>,
    source: Option<TestSource>,
    children: Vec<Arc<TestDescriptor>>,
    node: Node,
    extensions: Vec<Declared>,
    execution_mode: Option<ExecutionMode>,
    resource_locks: Vec<String>,
    timeout: Option<Duration>,
}

impl TestDescriptor {
    /// A descriptor with an explicit id and no children or extensions.
    pub fn new(
        id: UniqueId,
        display_name: impl Into<String>,
        kind: DescriptorKind,
        node: Node,
    ) -> Self {
        TestDescriptor {
            id,
            display_name: display_name.into(),
            kind,
            tags: BTreeSet::new(),
            source: None,
            children: Vec::new(),
            node,
            extensions: Vec::new(),
            execution_mode: None,
            resource_locks: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_child(mut self, child: Arc<TestDescriptor>) -> Self {
        self.children.push(child);
        self
    }

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn source(&self) -> Option<&TestSource> {
        self.source.as_ref()
    }

    pub fn children(&self) -> &[Arc<TestDescriptor>] {
        &self.children
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn extensions(&self) -> &[Declared] {
        &self.extensions
    }

    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        self.execution_mode
    }

    pub fn resource_locks(&self) -> &[String] {
        &self.resource_locks
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn class(&self) -> Option<&ClassNode> {
        match &self.node {
            Node::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Visit this node and its static descendants in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a TestDescriptor)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// A descriptor for a node produced at execution time.
    pub(crate) fn synthesized(
        id: UniqueId,
        display_name: String,
        kind: DescriptorKind,
        node: Node,
        extensions: Vec<Declared>,
        source: Option<TestSource>,
    ) -> Self {
        TestDescriptor {
            extensions,
            source,
            ..TestDescriptor::new(id, display_name, kind, node)
        }
    }
}

impl fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("id", &self.id.to_string())
            .field("display_name", &self.display_name)
            .field("kind", &self.kind)
            .field("node", &self.node.label())
            .field("children", &self.children)
            .finish()
    }
}

/// Builds descriptor trees, deriving every child id from its parent's id.
pub struct DescriptorBuilder {
    segment: (String, String),
    display_name: String,
    kind: DescriptorKind,
    tags: BTreeSet<String>,
    source: Option<TestSource>,
    node: Node,
    children: Vec<DescriptorBuilder>,
    extensions: Vec<Declared>,
    execution_mode: Option<ExecutionMode>,
    resource_locks: Vec<String>,
    timeout: Option<Duration>,
}

impl DescriptorBuilder {
    fn new(kind_segment: &str, name: String, kind: DescriptorKind, node: Node) -> Self {
        DescriptorBuilder {
            segment: (kind_segment.to_string(), name.clone()),
            display_name: name,
            kind,
            tags: BTreeSet::new(),
            source: None,
            node,
            children: Vec::new(),
            extensions: Vec::new(),
            execution_mode: None,
            resource_locks: Vec::new(),
            timeout: None,
        }
    }

    /// The root of a run.
    pub fn engine(name: impl Into<String>) -> Self {
        Self::new("engine", name.into(), DescriptorKind::Container, Node::Engine)
    }

    pub fn class(class: ClassNode) -> Self {
        let name = class.name.clone();
        let mut builder = Self::new("class", name.clone(), DescriptorKind::Container, Node::Class(class));
        builder.source = Some(TestSource::Class { name });
        builder
    }

    pub fn test(method: Method) -> Self {
        let name = method.name().to_string();
        Self::new("method", name, DescriptorKind::Test, Node::Test(method))
    }

    pub fn template(template: TemplateNode) -> Self {
        let name = template.method.name().to_string();
        Self::new(
            "test-template",
            name,
            DescriptorKind::ContainerAndTest,
            Node::Template(template),
        )
    }

    pub fn factory(factory: FactoryNode) -> Self {
        let name = factory.method.name().to_string();
        Self::new(
            "test-factory",
            name,
            DescriptorKind::ContainerAndTest,
            Node::Factory(factory),
        )
    }

    /// Override the id segment this node contributes.
    pub fn segment(mut self, kind: impl Into<String>, value: impl Into<String>) -> Self {
        self.segment = (kind.into(), value.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn source(mut self, source: TestSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn child(mut self, child: DescriptorBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn extend_with(self, extension: impl Extension) -> Self {
        self.extend_with_at(extension, Position::Default)
    }

    pub fn extend_with_at(mut self, extension: impl Extension, position: Position) -> Self {
        self.extensions.push(Declared {
            extension: Arc::new(extension),
            position,
        });
        self
    }

    pub fn extend_with_shared(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(Declared {
            extension,
            position: Position::Default,
        });
        self
    }

    /// Disable the node unconditionally.
    pub fn disabled(self, reason: impl Into<String>) -> Self {
        self.extend_with(Disabled::new(reason))
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Declare an exclusive resource held while this node runs.
    pub fn resource_lock(mut self, name: impl Into<String>) -> Self {
        self.resource_locks.push(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build as the root of a tree.
    pub fn build(self) -> Arc<TestDescriptor> {
        let id = UniqueId::root(self.segment.0.clone(), self.segment.1.clone());
        self.build_with_id(id, None)
    }

    /// Build as a child of `parent`.
    pub fn build_under(self, parent: &UniqueId) -> Arc<TestDescriptor> {
        let id = parent.append(self.segment.0.clone(), self.segment.1.clone());
        self.build_with_id(id, None)
    }

    fn build_with_id(self, id: UniqueId, enclosing_class: Option<&str>) -> Arc<TestDescriptor> {
        let DescriptorBuilder {
            display_name,
            kind,
            tags,
            source,
            node,
            children,
            extensions,
            execution_mode,
            resource_locks,
            timeout,
            ..
        } = self;

        let class_name = match &node {
            Node::Class(class) => Some(class.name.clone()),
            _ => enclosing_class.map(str::to_string),
        };
        let source = source.or_else(|| match &node {
            Node::Test(m) => Some(m.name().to_string()),
            Node::Template(t) => Some(t.method.name().to_string()),
            Node::Factory(f) => Some(f.method.name().to_string()),
            _ => None,
        }
        .map(|method| TestSource::Method {
            class: class_name.clone(),
            method,
        }));

        let children = children
            .into_iter()
            .map(|child| {
                let child_id = id.append(child.segment.0.clone(), child.segment.1.clone());
                child.build_with_id(child_id, class_name.as_deref())
            })
            .collect();

        Arc::new(TestDescriptor {
            id,
            display_name,
            kind,
            tags,
            source,
            children,
            node,
            extensions,
            execution_mode,
            resource_locks,
            timeout,
        })
    }
}
