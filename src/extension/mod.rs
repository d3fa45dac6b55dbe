//! Extensions: pluggable capabilities attached to a node and inherited by
//! every node below it.
//!
//! An extension is a single trait object that opts into any number of
//! capabilities by overriding the matching `as_*` accessor:
//!
//! ```
//! use arbor::extension::{BeforeEachCallback, Extension};
//! use arbor::{ExtensionContext, TestError};
//!
//! struct Announce;
//!
//! impl BeforeEachCallback for Announce {
//!     fn before_each(&self, context: &ExtensionContext) -> Result<(), TestError> {
//!         context.publish_entry("about-to-run", context.display_name());
//!         Ok(())
//!     }
//! }
//!
//! impl Extension for Announce {
//!     fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
//!         Some(self)
//!     }
//! }
//! ```

pub mod builtin;
pub mod registry;
pub mod store;

pub use registry::ExtensionRegistry;

use crate::{
    dynamic::InvocationStream,
    errors::TestError,
    executor::ExtensionContext,
    value::{Parameter, Value},
};
use std::any::Any;

/// A pluggable capability. Every accessor defaults to "not supported".
pub trait Extension: Send + Sync + 'static {
    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn as_condition(&self) -> Option<&dyn ExecutionCondition> {
        None
    }

    fn as_before_all(&self) -> Option<&dyn BeforeAllCallback> {
        None
    }

    fn as_after_all(&self) -> Option<&dyn AfterAllCallback> {
        None
    }

    fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
        None
    }

    fn as_after_each(&self) -> Option<&dyn AfterEachCallback> {
        None
    }

    fn as_before_test_execution(&self) -> Option<&dyn BeforeTestExecutionCallback> {
        None
    }

    fn as_after_test_execution(&self) -> Option<&dyn AfterTestExecutionCallback> {
        None
    }

    fn as_parameter_resolver(&self) -> Option<&dyn ParameterResolver> {
        None
    }

    fn as_instance_post_processor(&self) -> Option<&dyn TestInstancePostProcessor> {
        None
    }

    fn as_instance_pre_destroy(&self) -> Option<&dyn TestInstancePreDestroyCallback> {
        None
    }

    fn as_invocation_provider(&self) -> Option<&dyn InvocationContextProvider> {
        None
    }

    fn as_watcher(&self) -> Option<&dyn TestWatcher> {
        None
    }
}

/// The closed set of capabilities the registry can be queried for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Condition,
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
    BeforeTestExecution,
    AfterTestExecution,
    ParameterResolver,
    InstancePostProcessor,
    InstancePreDestroy,
    InvocationProvider,
    Watcher,
}

impl CapabilityKind {
    pub fn is_supported_by(self, extension: &dyn Extension) -> bool {
        use CapabilityKind as K;
        match self {
            K::Condition => extension.as_condition().is_some(),
            K::BeforeAll => extension.as_before_all().is_some(),
            K::AfterAll => extension.as_after_all().is_some(),
            K::BeforeEach => extension.as_before_each().is_some(),
            K::AfterEach => extension.as_after_each().is_some(),
            K::BeforeTestExecution => extension.as_before_test_execution().is_some(),
            K::AfterTestExecution => extension.as_after_test_execution().is_some(),
            K::ParameterResolver => extension.as_parameter_resolver().is_some(),
            K::InstancePostProcessor => extension.as_instance_post_processor().is_some(),
            K::InstancePreDestroy => extension.as_instance_pre_destroy().is_some(),
            K::InvocationProvider => extension.as_invocation_provider().is_some(),
            K::Watcher => extension.as_watcher().is_some(),
        }
    }

    /// "After" capabilities apply inner-to-outer.
    pub fn is_after(self) -> bool {
        matches!(
            self,
            CapabilityKind::AfterAll
                | CapabilityKind::AfterEach
                | CapabilityKind::AfterTestExecution
                | CapabilityKind::InstancePreDestroy
        )
    }

    pub const ALL: [CapabilityKind; 12] = [
        CapabilityKind::Condition,
        CapabilityKind::BeforeAll,
        CapabilityKind::AfterAll,
        CapabilityKind::BeforeEach,
        CapabilityKind::AfterEach,
        CapabilityKind::BeforeTestExecution,
        CapabilityKind::AfterTestExecution,
        CapabilityKind::ParameterResolver,
        CapabilityKind::InstancePostProcessor,
        CapabilityKind::InstancePreDestroy,
        CapabilityKind::InvocationProvider,
        CapabilityKind::Watcher,
    ];
}

/// How a registration orders relative to its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    /// Wraps every other registration of the same capability.
    Outermost,
    #[default]
    Default,
    /// Wrapped by every other registration of the same capability.
    Innermost,
}

/// Where a registration was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Built-in or programmatic, visible to the whole run.
    Engine,
    Class,
    Method,
    /// Contributed by a single dynamic invocation.
    Invocation,
}

/// Verdict of an [ExecutionCondition].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionResult {
    enabled: bool,
    reason: Option<String>,
}

impl ConditionResult {
    pub fn enabled(reason: impl Into<String>) -> Self {
        ConditionResult {
            enabled: true,
            reason: Some(reason.into()),
        }
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        ConditionResult {
            enabled: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        !self.enabled
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Decides whether a node runs at all.
pub trait ExecutionCondition {
    fn evaluate(&self, context: &ExtensionContext) -> Result<ConditionResult, TestError>;
}

pub trait BeforeAllCallback {
    fn before_all(&self, context: &ExtensionContext) -> Result<(), TestError>;
}

pub trait AfterAllCallback {
    fn after_all(&self, context: &ExtensionContext) -> Result<(), TestError>;
}

pub trait BeforeEachCallback {
    fn before_each(&self, context: &ExtensionContext) -> Result<(), TestError>;
}

pub trait AfterEachCallback {
    fn after_each(&self, context: &ExtensionContext) -> Result<(), TestError>;
}

/// Runs immediately before the test body, after all before-each steps.
pub trait BeforeTestExecutionCallback {
    fn before_test_execution(&self, context: &ExtensionContext) -> Result<(), TestError>;
}

/// Runs immediately after the test body, before any after-each step.
pub trait AfterTestExecutionCallback {
    fn after_test_execution(&self, context: &ExtensionContext) -> Result<(), TestError>;
}

/// The parameter being resolved and the executable declaring it.
#[derive(Debug, Clone, Copy)]
pub struct ParameterContext<'a> {
    pub parameter: &'a Parameter,
    /// Name of the method or constructor.
    pub executable: &'a str,
}

/// Supplies values for formal parameters.
pub trait ParameterResolver {
    fn supports(
        &self,
        parameter: &ParameterContext<'_>,
        context: &ExtensionContext,
    ) -> Result<bool, TestError>;

    fn resolve(
        &self,
        parameter: &ParameterContext<'_>,
        context: &ExtensionContext,
    ) -> Result<Value, TestError>;
}

/// Runs on every freshly constructed test instance.
pub trait TestInstancePostProcessor {
    fn post_process(
        &self,
        instance: &mut (dyn Any + Send + 'static),
        context: &ExtensionContext,
    ) -> Result<(), TestError>;
}

/// Runs on every test instance before it is dropped.
pub trait TestInstancePreDestroyCallback {
    fn pre_destroy(
        &self,
        instance: &mut (dyn Any + Send + 'static),
        context: &ExtensionContext,
    ) -> Result<(), TestError>;
}

/// Supplies the invocations of a test template.
pub trait InvocationContextProvider {
    fn supports(&self, context: &ExtensionContext) -> bool;

    fn provide(&self, context: &ExtensionContext) -> Result<InvocationStream, TestError>;
}

/// Observes test outcomes. Watchers cannot influence results.
pub trait TestWatcher {
    fn test_disabled(&self, _context: &ExtensionContext, _reason: &str) {}

    fn test_successful(&self, _context: &ExtensionContext) {}

    fn test_aborted(&self, _context: &ExtensionContext, _cause: &TestError) {}

    fn test_failed(&self, _context: &ExtensionContext, _cause: &TestError) {}
}
