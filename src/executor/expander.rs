//! Expansion of test templates and test factories into dynamic nodes.
//!
//! Elements are drawn one at a time, executed, reported, and dropped before
//! the next one is drawn. Every stream is closed exactly once on every exit
//! path.
use super::{
    instances::{self, InstanceHandle},
    node::NodeExecutor,
    ExtensionContext, TestExecutionResult, ThrowableCollector,
};
use crate::{
    descriptor::{Declared, DescriptorKind, FactoryNode, Node, TemplateNode, TestDescriptor, UniqueId},
    dynamic::{CloseableStream, DynamicNode, InvocationContext},
    errors::TestError,
    extension::{CapabilityKind, ExtensionRegistry, Position, Scope},
};
use std::{
    collections::HashSet,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Draw the next element, turning a panicking source into an error element.
fn draw<T>(stream: &mut CloseableStream<T>) -> Option<Result<T, TestError>> {
    panic::catch_unwind(AssertUnwindSafe(|| stream.next()))
        .unwrap_or_else(|payload| Some(Err(TestError::from_panic(payload))))
}

fn invocation_id(parent: &UniqueId, index: usize) -> UniqueId {
    parent.append("test-template-invocation", format!("#{}", index))
}

fn invocation_descriptor(
    template: &ExtensionContext,
    index: usize,
    invocation: InvocationContext,
) -> Arc<TestDescriptor> {
    let extensions = invocation
        .extensions
        .into_iter()
        .map(|extension| Declared {
            extension,
            position: Position::Default,
        })
        .collect();
    Arc::new(TestDescriptor::synthesized(
        invocation_id(template.unique_id(), index),
        invocation.display_name,
        DescriptorKind::Test,
        Node::Dynamic,
        extensions,
        template.descriptor().source().cloned(),
    ))
}

/// Execute every invocation of a test template supplied by the providers
/// that support it, in registration order.
///
/// Invocation ids are numbered across all providers; display names are up
/// to each provider.
pub(crate) fn execute_template(
    executor: &NodeExecutor,
    context: &Arc<ExtensionContext>,
    template: &TemplateNode,
    held: &Arc<HashSet<String>>,
) -> TestExecutionResult {
    let providers: Vec<_> = context
        .registry()
        .extensions(CapabilityKind::InvocationProvider)
        .into_iter()
        .filter(|extension| {
            extension
                .as_invocation_provider()
                .map_or(false, |provider| provider.supports(context))
        })
        .collect();
    if providers.is_empty() {
        return TestExecutionResult::Failed(TestError::configuration(format!(
            "You must register at least one InvocationContextProvider that supports test template [{}]",
            context.display_name()
        )));
    }

    let selection = template.selection.as_ref();
    let last = selection.and_then(|s| s.max());
    let mut collector = ThrowableCollector::new();
    let mut index = 0;
    for extension in providers {
        let provider = match extension.as_invocation_provider() {
            Some(provider) => provider,
            None => continue,
        };
        let provided = panic::catch_unwind(AssertUnwindSafe(|| provider.provide(context)))
            .unwrap_or_else(|payload| Err(TestError::from_panic(payload)));
        let mut stream = match provided {
            Ok(stream) => stream,
            Err(err) => {
                collector.add(err.context(format!(
                    "Failed to obtain invocations from [{}]",
                    extension.name()
                )));
                break;
            }
        };

        while last.map_or(true, |last| index < last) {
            let invocation = match draw(&mut stream) {
                None => break,
                Some(Ok(invocation)) => invocation,
                Some(Err(err)) => {
                    collector.add(err);
                    break;
                }
            };
            index += 1;
            if selection.map_or(true, |s| s.contains(index)) {
                let descriptor = invocation_descriptor(context, index, invocation);
                executor.execute_dynamic(descriptor, context, held);
            } else {
                tracing::trace!(id = %context.unique_id(), index, "skipping unselected invocation");
            }
        }
        collector.execute(|| stream.close());
        if !collector.is_empty() {
            break;
        }
    }

    if index == 0 && collector.is_empty() && !template.allow_zero_invocations {
        collector.add(TestError::configuration(format!(
            "None of the InvocationContextProviders for test template [{}] provided any invocation contexts",
            context.display_name()
        )));
    }
    collector.to_execution_result()
}

/// Invoke a test factory and execute the dynamic nodes it returns.
pub(crate) fn run_factory(
    executor: &NodeExecutor,
    context: &Arc<ExtensionContext>,
    factory: &FactoryNode,
    instance: Option<&InstanceHandle>,
) -> Result<(), TestError> {
    let instance = if factory.method.is_static() {
        None
    } else {
        instance
    };
    let mut stream = instances::invoke(&factory.method, instance, context)?;
    let mut collector = ThrowableCollector::new();
    let count = execute_stream(executor, context, &mut stream, &mut collector);
    collector.execute(|| stream.close());
    if count == 0 && collector.is_empty() && !factory.allow_zero_invocations {
        collector.add(TestError::configuration(format!(
            "Test factory [{}] produced no dynamic tests",
            context.display_name()
        )));
    }
    collector.into_result()
}

/// Execute the nodes of `stream` in order below `parent`. Returns the number
/// of nodes drawn. A failing stream is recorded in `collector` and ends the
/// expansion; it does not close the stream.
fn execute_stream(
    executor: &NodeExecutor,
    parent: &Arc<ExtensionContext>,
    stream: &mut CloseableStream<DynamicNode>,
    collector: &mut ThrowableCollector,
) -> usize {
    let mut index = 0;
    while let Some(next) = draw(stream) {
        match next {
            Ok(node) => {
                index += 1;
                execute_dynamic_node(executor, parent, index, node);
            }
            Err(err) => {
                collector.add(err);
                break;
            }
        }
    }
    index
}

fn execute_dynamic_node(
    executor: &NodeExecutor,
    parent: &Arc<ExtensionContext>,
    index: usize,
    node: DynamicNode,
) {
    let (segment, kind) = match &node {
        DynamicNode::Test { .. } => ("dynamic-test", DescriptorKind::Test),
        DynamicNode::Container { .. } => ("dynamic-container", DescriptorKind::Container),
    };
    let descriptor = Arc::new(TestDescriptor::synthesized(
        parent.unique_id().append(segment, format!("#{}", index)),
        node.display_name().to_string(),
        kind,
        Node::Dynamic,
        Vec::new(),
        parent.descriptor().source().cloned(),
    ));
    let listener = executor.listener();
    listener.dynamic_test_registered(&descriptor);

    let registry = Arc::new(ExtensionRegistry::child(
        Arc::clone(parent.registry()),
        Scope::Invocation,
    ));
    let context = Arc::new(ExtensionContext::new(
        Some(Arc::clone(parent)),
        Arc::clone(&descriptor),
        registry,
        Arc::clone(executor.configuration()),
        Arc::clone(listener),
        parent.test_instance_lifecycle(),
    ));

    tracing::debug!(id = %descriptor.id(), "started");
    listener.execution_started(&descriptor);
    let mut collector = ThrowableCollector::new();
    match node {
        DynamicNode::Test { executable, .. } => {
            collector.execute(|| executable(&*context));
        }
        DynamicNode::Container { mut children, .. } => {
            execute_stream(executor, &context, &mut children, &mut collector);
            collector.execute(|| children.close());
        }
    }
    collector.execute(|| context.close());
    let result = collector.to_execution_result();
    if kind == DescriptorKind::Test {
        executor.notify_watchers(&context, &result);
    }
    tracing::debug!(id = %descriptor.id(), %result, "finished");
    listener.execution_finished(&descriptor, &result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_ids_extend_the_template_id() {
        let template = UniqueId::root("engine", "arbor").append("test-template", "adds");
        assert_eq!(
            invocation_id(&template, 3).to_string(),
            "[engine:arbor]/[test-template:adds]/[test-template-invocation:#3]"
        );
    }

    #[test]
    fn panicking_sources_yield_errors() {
        let mut stream = CloseableStream::<u32>::from_results((0..3).map(|i| {
            if i == 1 {
                panic!("cursor broke");
            }
            Ok(i)
        }));
        assert_eq!(draw(&mut stream).unwrap().unwrap(), 0);
        let err = draw(&mut stream).unwrap().unwrap_err();
        assert_eq!(err.message(), "cursor broke");
    }
}
