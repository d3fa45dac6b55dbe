//! Dynamically typed argument values and the formal parameters they are
//! checked against.
use std::{any::Any, fmt, sync::Arc};

/// An opaque value carried through parameter resolution.
#[derive(Clone)]
pub struct Object {
    type_name: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Object {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

/// A value that can be passed to a test method, hook, or constructor.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(Object),
}

impl Value {
    /// Wrap an arbitrary value. `type_name` is what [ParamType::Object]
    /// parameters are matched against.
    pub fn object<T: Any + Send + Sync>(type_name: impl Into<String>, value: T) -> Self {
        Value::Object(Object {
            type_name: type_name.into(),
            inner: Arc::new(value),
        })
    }

    /// Name of the runtime type, as used in resolution error messages.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(o) => o.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(o) => o.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(o) => write!(f, "<{}>", o.type_name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items).finish(),
            other => write!(f, "{}", other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Declared type of a formal parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    List,
    /// An [Object] whose type name matches exactly.
    Object(String),
    Any,
}

impl ParamType {
    pub fn object(type_name: impl Into<String>) -> Self {
        ParamType::Object(type_name.into())
    }

    /// Primitive parameters cannot receive `null`.
    pub fn is_primitive(&self) -> bool {
        matches!(self, ParamType::Bool | ParamType::Int | ParamType::Float)
    }

    /// Whether `value` may be assigned to a parameter of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ty, Value::Null) => !ty.is_primitive(),
            (ParamType::Any, _) => true,
            (ParamType::Bool, Value::Bool(_)) => true,
            (ParamType::Int, Value::Int(_)) => true,
            (ParamType::Float, Value::Float(_)) => true,
            (ParamType::Str, Value::Str(_)) => true,
            (ParamType::List, Value::List(_)) => true,
            (ParamType::Object(name), Value::Object(o)) => name == o.type_name(),
            _ => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamType::Bool => write!(f, "bool"),
            ParamType::Int => write!(f, "int"),
            ParamType::Float => write!(f, "float"),
            ParamType::Str => write!(f, "string"),
            ParamType::List => write!(f, "list"),
            ParamType::Object(name) => write!(f, "{}", name),
            ParamType::Any => write!(f, "any"),
        }
    }
}

/// A formal parameter of a method or constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Position in the parameter list, starting at 0.
    pub index: usize,
    pub name: String,
    pub ty: ParamType,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.name)
    }
}

/// One argument of a parameterized invocation. A label replaces the
/// rendered value in display names.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub label: Option<String>,
    pub value: Value,
}

/// The arguments of one parameterized invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    items: Vec<Argument>,
}

impl Arguments {
    pub fn of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Arguments {
            items: values
                .into_iter()
                .map(|v| Argument {
                    label: None,
                    value: v.into(),
                })
                .collect(),
        }
    }

    /// Append an unlabeled argument.
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.items.push(Argument {
            label: None,
            value: value.into(),
        });
        self
    }

    /// Append an argument rendered as `label` in display names.
    pub fn with_named(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.items.push(Argument {
            label: Some(label.into()),
            value: value.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Argument> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.items.iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.items.iter().map(|a| a.value.clone()).collect()
    }
}
