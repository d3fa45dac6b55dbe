//! Extensions shipped with the engine.
use super::{
    AfterEachCallback, BeforeEachCallback, ConditionResult, ExecutionCondition, Extension,
    ParameterContext, ParameterResolver,
};
use crate::{
    descriptor::{Method, TestDescriptor},
    errors::TestError,
    executor::{instances, ExtensionContext},
    listener::{EngineExecutionListener, ReportEntry},
    value::{ParamType, Value},
};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Unconditionally disables the node it is declared on.
#[derive(Debug, Clone)]
pub struct Disabled {
    reason: String,
}

impl Disabled {
    pub fn new(reason: impl Into<String>) -> Self {
        Disabled {
            reason: reason.into(),
        }
    }
}

impl ExecutionCondition for Disabled {
    fn evaluate(&self, context: &ExtensionContext) -> Result<ConditionResult, TestError> {
        let reason = if self.reason.is_empty() {
            format!("{} is disabled", context.display_name())
        } else {
            self.reason.clone()
        };
        Ok(ConditionResult::disabled(reason))
    }
}

impl Extension for Disabled {
    fn name(&self) -> &str {
        "Disabled"
    }

    fn as_condition(&self) -> Option<&dyn ExecutionCondition> {
        Some(self)
    }
}

/// Enables the node only if a configuration parameter matches a regex.
#[derive(Debug, Clone)]
pub struct EnabledIfParameter {
    key: String,
    pattern: Regex,
}

impl EnabledIfParameter {
    pub fn new(key: impl Into<String>, pattern: &str) -> Result<Self, TestError> {
        let pattern = Regex::new(&format!("^(?:{})$", pattern)).map_err(|err| {
            TestError::configuration(format!("Invalid pattern `{}`: {}", pattern, err))
        })?;
        Ok(EnabledIfParameter {
            key: key.into(),
            pattern,
        })
    }
}

impl ExecutionCondition for EnabledIfParameter {
    fn evaluate(&self, context: &ExtensionContext) -> Result<ConditionResult, TestError> {
        Ok(match context.configuration_parameter(&self.key) {
            None => ConditionResult::disabled(format!(
                "Configuration parameter [{}] does not exist",
                self.key
            )),
            Some(value) if self.pattern.is_match(&value) => ConditionResult::enabled(format!(
                "Configuration parameter [{}] with value [{}] matches regular expression [{}]",
                self.key, value, self.pattern
            )),
            Some(value) => ConditionResult::disabled(format!(
                "Configuration parameter [{}] with value [{}] does not match regular expression [{}]",
                self.key, value, self.pattern
            )),
        })
    }
}

impl Extension for EnabledIfParameter {
    fn name(&self) -> &str {
        "EnabledIfParameter"
    }

    fn as_condition(&self) -> Option<&dyn ExecutionCondition> {
        Some(self)
    }
}

/// Information about the running node, resolvable as a parameter of type
/// `TestInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    pub display_name: String,
    pub tags: BTreeSet<String>,
    pub unique_id: String,
    pub test_class: Option<String>,
    pub test_method: Option<String>,
}

/// Resolves `TestInfo` parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestInfoResolver;

impl ParameterResolver for TestInfoResolver {
    fn supports(&self, parameter: &ParameterContext<'_>, _: &ExtensionContext) -> Result<bool, TestError> {
        Ok(parameter.parameter.ty == ParamType::object("TestInfo"))
    }

    fn resolve(&self, _: &ParameterContext<'_>, context: &ExtensionContext) -> Result<Value, TestError> {
        Ok(Value::object(
            "TestInfo",
            TestInfo {
                display_name: context.display_name().to_string(),
                tags: context.tags().clone(),
                unique_id: context.unique_id().to_string(),
                test_class: context.test_class().map(str::to_string),
                test_method: context.test_method().map(str::to_string),
            },
        ))
    }
}

impl Extension for TestInfoResolver {
    fn name(&self) -> &str {
        "TestInfoResolver"
    }

    fn as_parameter_resolver(&self) -> Option<&dyn ParameterResolver> {
        Some(self)
    }
}

/// Publishes report entries for the node it was resolved for.
#[derive(Clone)]
pub struct TestReporter {
    descriptor: Arc<TestDescriptor>,
    listener: Arc<dyn EngineExecutionListener>,
}

impl TestReporter {
    pub fn publish(&self, values: BTreeMap<String, String>) {
        self.listener
            .report_entry_published(&self.descriptor, &ReportEntry::from(values));
    }

    pub fn publish_entry(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = BTreeMap::new();
        values.insert(key.into(), value.into());
        self.publish(values);
    }
}

/// Resolves `TestReporter` parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestReporterResolver;

impl ParameterResolver for TestReporterResolver {
    fn supports(&self, parameter: &ParameterContext<'_>, _: &ExtensionContext) -> Result<bool, TestError> {
        Ok(parameter.parameter.ty == ParamType::object("TestReporter"))
    }

    fn resolve(&self, _: &ParameterContext<'_>, context: &ExtensionContext) -> Result<Value, TestError> {
        Ok(Value::object(
            "TestReporter",
            TestReporter {
                descriptor: Arc::clone(context.descriptor()),
                listener: Arc::clone(context.listener()),
            },
        ))
    }
}

impl Extension for TestReporterResolver {
    fn name(&self) -> &str {
        "TestReporterResolver"
    }

    fn as_parameter_resolver(&self) -> Option<&dyn ParameterResolver> {
        Some(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    BeforeEach,
    AfterEach,
}

/// A class's `before_each` or `after_each` method, registered as a callback
/// so that it interleaves with the callbacks of other class levels.
pub(crate) struct LifecycleMethodAdapter {
    label: String,
    class: String,
    method: Method,
    kind: HookKind,
}

impl LifecycleMethodAdapter {
    pub(crate) fn new(class: &str, method: Method, kind: HookKind) -> Self {
        LifecycleMethodAdapter {
            label: format!("{}::{}", class, method.name()),
            class: class.to_string(),
            method,
            kind,
        }
    }
}

impl BeforeEachCallback for LifecycleMethodAdapter {
    fn before_each(&self, context: &ExtensionContext) -> Result<(), TestError> {
        instances::invoke_on_class(&self.method, &self.class, context)
    }
}

impl AfterEachCallback for LifecycleMethodAdapter {
    fn after_each(&self, context: &ExtensionContext) -> Result<(), TestError> {
        instances::invoke_on_class(&self.method, &self.class, context)
    }
}

impl Extension for LifecycleMethodAdapter {
    fn name(&self) -> &str {
        &self.label
    }

    fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
        match self.kind {
            HookKind::BeforeEach => Some(self),
            HookKind::AfterEach => None,
        }
    }

    fn as_after_each(&self) -> Option<&dyn AfterEachCallback> {
        match self.kind {
            HookKind::AfterEach => Some(self),
            HookKind::BeforeEach => None,
        }
    }
}
