//! Built-in invocation providers for test templates.
use super::{CloseableStream, DisplayNameFormatter, InvocationContext, InvocationStream};
use crate::{
    descriptor::Node,
    errors::TestError,
    executor::ExtensionContext,
    extension::{Extension, InvocationContextProvider, ParameterContext, ParameterResolver},
    value::{Arguments, ParamType, Value},
};
use std::sync::Arc;

/// Supplies the argument sets of a parameterized test.
pub trait ArgumentsProvider: Send + Sync {
    fn provide(&self, context: &ExtensionContext) -> Result<CloseableStream<Arguments>, TestError>;
}

/// A fixed list of argument sets.
#[derive(Debug, Clone, Default)]
pub struct ValueSource {
    rows: Vec<Arguments>,
}

impl ValueSource {
    /// One single-argument invocation per value.
    pub fn of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ValueSource {
            rows: values
                .into_iter()
                .map(|v| Arguments::default().with(v))
                .collect(),
        }
    }

    /// One invocation per row.
    pub fn rows(rows: Vec<Arguments>) -> Self {
        ValueSource { rows }
    }
}

impl ArgumentsProvider for ValueSource {
    fn provide(&self, _: &ExtensionContext) -> Result<CloseableStream<Arguments>, TestError> {
        Ok(CloseableStream::from_iter(self.rows.clone()))
    }
}

type MakeStream =
    dyn Fn(&ExtensionContext) -> Result<CloseableStream<Arguments>, TestError> + Send + Sync;

/// Arguments drawn lazily from a stream built when the template runs.
pub struct IterSource {
    make: Box<MakeStream>,
}

impl IterSource {
    pub fn new<F>(make: F) -> Self
    where
        F: Fn(&ExtensionContext) -> Result<CloseableStream<Arguments>, TestError>
            + Send
            + Sync
            + 'static,
    {
        IterSource {
            make: Box::new(make),
        }
    }
}

impl ArgumentsProvider for IterSource {
    fn provide(&self, context: &ExtensionContext) -> Result<CloseableStream<Arguments>, TestError> {
        (self.make)(context)
    }
}

/// Supplies argument `i` of one invocation to parameter `i` of the template
/// method.
#[derive(Debug, Clone)]
pub struct ArgumentsResolver {
    method: String,
    arguments: Arguments,
}

impl ArgumentsResolver {
    pub fn new(method: impl Into<String>, arguments: Arguments) -> Self {
        ArgumentsResolver {
            method: method.into(),
            arguments,
        }
    }
}

impl ParameterResolver for ArgumentsResolver {
    fn supports(&self, parameter: &ParameterContext<'_>, _: &ExtensionContext) -> Result<bool, TestError> {
        Ok(parameter.executable == self.method
            && parameter.parameter.index < self.arguments.len())
    }

    fn resolve(&self, parameter: &ParameterContext<'_>, _: &ExtensionContext) -> Result<Value, TestError> {
        self.arguments
            .get(parameter.parameter.index)
            .map(|arg| arg.value.clone())
            .ok_or_else(|| {
                TestError::resolution(format!(
                    "No argument at index {} for parameter [{}]",
                    parameter.parameter.index, parameter.parameter
                ))
            })
    }
}

impl Extension for ArgumentsResolver {
    fn name(&self) -> &str {
        "ArgumentsResolver"
    }

    fn as_parameter_resolver(&self) -> Option<&dyn ParameterResolver> {
        Some(self)
    }
}

fn template_method(context: &ExtensionContext) -> Option<&crate::descriptor::Method> {
    match context.descriptor().node() {
        Node::Template(template) => Some(&template.method),
        _ => None,
    }
}

/// Runs a template once per argument set of its sources, in source order.
///
/// The `{index}` of the display names counts this provider's invocations
/// from 1. Invocation ids count across every provider of the template, so
/// with two providers the second one's `[1]` is not `#1`.
#[derive(Clone, Default)]
pub struct ParameterizedTest {
    name_pattern: Option<String>,
    sources: Vec<Arc<dyn ArgumentsProvider>>,
}

impl ParameterizedTest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the display name pattern of the invocations.
    pub fn named(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn source(mut self, source: impl ArgumentsProvider + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }
}

impl InvocationContextProvider for ParameterizedTest {
    fn supports(&self, context: &ExtensionContext) -> bool {
        template_method(context).is_some()
    }

    fn provide(&self, context: &ExtensionContext) -> Result<InvocationStream, TestError> {
        let method = template_method(context).ok_or_else(|| {
            TestError::configuration("ParameterizedTest can only provide invocations for test templates")
        })?;
        let method_name = method.name().to_string();
        let parameter_names: Vec<String> =
            method.parameters().iter().map(|p| p.name.clone()).collect();
        let formatter = DisplayNameFormatter::configured(
            self.name_pattern.as_deref(),
            context.display_name(),
            &**context.configuration(),
        );

        let mut arguments = CloseableStream::empty();
        for source in &self.sources {
            arguments = arguments.chain(source.provide(context)?);
        }

        let mut index = 0;
        Ok(arguments.map(move |args| {
            index += 1;
            let display_name = formatter.format(index, &args, &parameter_names);
            InvocationContext::new(display_name)
                .with_extension(Arc::new(ArgumentsResolver::new(method_name.clone(), args)))
        }))
    }
}

impl Extension for ParameterizedTest {
    fn name(&self) -> &str {
        "ParameterizedTest"
    }

    fn as_invocation_provider(&self) -> Option<&dyn InvocationContextProvider> {
        Some(self)
    }
}

/// Position of the current repetition, available as a parameter of type
/// `RepetitionInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepetitionInfo {
    pub current: usize,
    pub total: usize,
}

impl ParameterResolver for RepetitionInfo {
    fn supports(&self, parameter: &ParameterContext<'_>, _: &ExtensionContext) -> Result<bool, TestError> {
        Ok(parameter.parameter.ty == ParamType::object("RepetitionInfo"))
    }

    fn resolve(&self, _: &ParameterContext<'_>, _: &ExtensionContext) -> Result<Value, TestError> {
        Ok(Value::object("RepetitionInfo", *self))
    }
}

impl Extension for RepetitionInfo {
    fn name(&self) -> &str {
        "RepetitionInfo"
    }

    fn as_parameter_resolver(&self) -> Option<&dyn ParameterResolver> {
        Some(self)
    }
}

/// Runs a template a fixed number of times.
#[derive(Debug, Clone)]
pub struct RepeatedTest {
    repetitions: usize,
    name_pattern: String,
}

impl RepeatedTest {
    pub const DEFAULT_PATTERN: &'static str = "repetition {currentRepetition} of {totalRepetitions}";

    pub fn new(repetitions: usize) -> Self {
        RepeatedTest {
            repetitions,
            name_pattern: Self::DEFAULT_PATTERN.to_string(),
        }
    }

    /// Placeholders: `{displayName}`, `{currentRepetition}`,
    /// `{totalRepetitions}`.
    pub fn named(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = pattern.into();
        self
    }
}

impl InvocationContextProvider for RepeatedTest {
    fn supports(&self, context: &ExtensionContext) -> bool {
        template_method(context).is_some()
    }

    fn provide(&self, context: &ExtensionContext) -> Result<InvocationStream, TestError> {
        let total = self.repetitions;
        let pattern = self
            .name_pattern
            .replace("{displayName}", context.display_name())
            .replace("{totalRepetitions}", &total.to_string());
        Ok(CloseableStream::from_iter((1..=total).map(move |current| {
            InvocationContext::new(pattern.replace("{currentRepetition}", &current.to_string()))
                .with_extension(Arc::new(RepetitionInfo { current, total }))
        })))
    }
}

impl Extension for RepeatedTest {
    fn name(&self) -> &str {
        "RepeatedTest"
    }

    fn as_invocation_provider(&self) -> Option<&dyn InvocationContextProvider> {
        Some(self)
    }
}
