//! Executable metadata handed over by discovery: methods, constructors, and
//! the per-kind payloads of class, template, and factory nodes.
use crate::{
    config::{HookOrder, Lifecycle},
    dynamic::{CloseableStream, DynamicNode, InvocationSelection},
    errors::TestError,
    executor::ExtensionContext,
    value::{ParamType, Parameter, Value},
};
use std::{any::Any, fmt, sync::Arc};

/// A test instance.
pub type Instance = Box<dyn Any + Send>;

type Body<R> = Arc<dyn Fn(&mut Invocation<'_>) -> Result<R, TestError> + Send + Sync>;

/// Everything a method body sees when it is invoked.
pub struct Invocation<'a> {
    context: &'a ExtensionContext,
    instance: Option<&'a mut (dyn Any + Send + 'static)>,
    args: Vec<Value>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        context: &'a ExtensionContext,
        instance: Option<&'a mut (dyn Any + Send + 'static)>,
        args: Vec<Value>,
    ) -> Self {
        Invocation {
            context,
            instance,
            args,
        }
    }

    pub fn context(&self) -> &ExtensionContext {
        self.context
    }

    /// Resolved argument values, one per declared parameter.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Result<&Value, TestError> {
        self.args.get(index).ok_or_else(|| {
            TestError::configuration(format!(
                "argument {} requested but only {} were resolved",
                index,
                self.args.len()
            ))
        })
    }

    /// The instance the method is invoked on.
    pub fn instance<T: Any>(&mut self) -> Result<&mut T, TestError> {
        match self.instance.as_deref_mut() {
            None => Err(TestError::configuration(
                "no test instance is available to a static method",
            )),
            Some(instance) => instance.downcast_mut::<T>().ok_or_else(|| {
                TestError::configuration(format!(
                    "test instance is not of type `{}`",
                    std::any::type_name::<T>()
                ))
            }),
        }
    }

    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }
}

/// A method with formal parameters and a body. `R` is what the body
/// produces: `()` for tests and hooks, an [Instance] for constructors, a
/// stream of dynamic nodes for factories.
pub struct Method<R = ()> {
    name: String,
    parameters: Vec<Parameter>,
    is_static: bool,
    body: Body<R>,
}

impl<R> Method<R> {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<R, TestError> + Send + Sync + 'static,
    {
        Method {
            name: name.into(),
            parameters: Vec::new(),
            is_static: false,
            body: Arc::new(body),
        }
    }

    /// Declare the next formal parameter.
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        let index = self.parameters.len();
        self.parameters.push(Parameter {
            index,
            name: name.into(),
            ty,
        });
        self
    }

    /// Mark the method as static: it is invoked without a test instance.
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn invoke(&self, invocation: &mut Invocation<'_>) -> Result<R, TestError> {
        (self.body)(invocation)
    }
}

impl Method<Instance> {
    /// A constructor producing a `T`.
    pub fn constructor<T, F>(name: impl Into<String>, construct: F) -> Self
    where
        T: Any + Send,
        F: Fn(&mut Invocation<'_>) -> Result<T, TestError> + Send + Sync + 'static,
    {
        Method::new(name, move |inv: &mut Invocation<'_>| {
            construct(inv).map(|t| Box::new(t) as Instance)
        })
        .as_static()
    }
}

impl<R> Clone for Method<R> {
    fn clone(&self) -> Self {
        Method {
            name: self.name.clone(),
            parameters: self.parameters.clone(),
            is_static: self.is_static,
            body: Arc::clone(&self.body),
        }
    }
}

impl<R> fmt::Debug for Method<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// A test class: how to construct it and the lifecycle hooks it declares.
#[derive(Debug, Clone)]
pub struct ClassNode {
    pub name: String,
    /// Overrides `arbor.testinstance.lifecycle.default`.
    pub lifecycle: Option<Lifecycle>,
    /// Overrides `arbor.hooks.order.default`.
    pub hook_order: Option<HookOrder>,
    /// For a nested class the enclosing instance is passed as the invocation
    /// instance.
    pub constructor: Method<Instance>,
    pub before_all: Vec<Method>,
    pub after_all: Vec<Method>,
    pub before_each: Vec<Method>,
    pub after_each: Vec<Method>,
}

impl ClassNode {
    pub fn new(name: impl Into<String>, constructor: Method<Instance>) -> Self {
        ClassNode {
            name: name.into(),
            lifecycle: None,
            hook_order: None,
            constructor,
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
        }
    }

    /// A class whose instances are `T::default()`.
    pub fn of<T: Any + Send + Default>(name: impl Into<String>) -> Self {
        let name = name.into();
        let constructor = Method::constructor(name.clone(), |_| Ok(T::default()));
        Self::new(name, constructor)
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn hook_order(mut self, order: HookOrder) -> Self {
        self.hook_order = Some(order);
        self
    }

    pub fn before_all(mut self, hook: Method) -> Self {
        self.before_all.push(hook);
        self
    }

    pub fn after_all(mut self, hook: Method) -> Self {
        self.after_all.push(hook);
        self
    }

    pub fn before_each(mut self, hook: Method) -> Self {
        self.before_each.push(hook);
        self
    }

    pub fn after_each(mut self, hook: Method) -> Self {
        self.after_each.push(hook);
        self
    }
}

/// Sort hooks of one kind according to `order`. The sort is stable, so
/// equal names keep declaration order.
pub(crate) fn ordered_hooks(hooks: &[Method], order: HookOrder) -> Vec<Method> {
    let mut hooks = hooks.to_vec();
    if order == HookOrder::Alphanumeric {
        hooks.sort_by(|a, b| a.name().cmp(b.name()));
    }
    hooks
}

/// A test template: a method executed once per invocation context supplied
/// by the template's [crate::extension::InvocationContextProvider]s.
#[derive(Debug, Clone)]
pub struct TemplateNode {
    pub method: Method,
    /// Run only these invocations; others are drawn but not executed.
    pub selection: Option<InvocationSelection>,
    pub allow_zero_invocations: bool,
}

impl TemplateNode {
    pub fn new(method: Method) -> Self {
        TemplateNode {
            method,
            selection: None,
            allow_zero_invocations: false,
        }
    }

    pub fn select(mut self, selection: InvocationSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn allow_zero_invocations(mut self) -> Self {
        self.allow_zero_invocations = true;
        self
    }
}

/// A test factory: a method returning a lazy stream of dynamic nodes.
#[derive(Debug, Clone)]
pub struct FactoryNode {
    pub method: Method<CloseableStream<DynamicNode>>,
    pub allow_zero_invocations: bool,
}

impl FactoryNode {
    pub fn new(method: Method<CloseableStream<DynamicNode>>) -> Self {
        FactoryNode {
            method,
            allow_zero_invocations: false,
        }
    }

    pub fn allow_zero_invocations(mut self) -> Self {
        self.allow_zero_invocations = true;
        self
    }
}
