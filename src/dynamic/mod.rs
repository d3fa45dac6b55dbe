//! Dynamic tests: invocations of test templates and nodes produced by test
//! factories at execution time.
//!
//! Both are drawn one element at a time from a [CloseableStream], which is
//! closed exactly once whether it is exhausted, fails, or is abandoned.

mod naming;
mod params;
mod stream;

pub use naming::{DisplayNameFormatter, DEFAULT_MAX_ARGUMENT_LENGTH, DEFAULT_PATTERN};
pub use params::{
    ArgumentsProvider, ArgumentsResolver, IterSource, ParameterizedTest, RepeatedTest,
    RepetitionInfo, ValueSource,
};
pub use stream::CloseableStream;

use crate::{errors::TestError, executor::ExtensionContext, extension::Extension};
use std::{fmt, ops::RangeInclusive, str::FromStr, sync::Arc};

type Executable = Box<dyn FnOnce(&ExtensionContext) -> Result<(), TestError> + Send>;

/// An element produced by a test factory.
pub enum DynamicNode {
    Test {
        display_name: String,
        executable: Executable,
    },
    Container {
        display_name: String,
        children: CloseableStream<DynamicNode>,
    },
}

impl DynamicNode {
    pub fn test<F>(display_name: impl Into<String>, executable: F) -> Self
    where
        F: FnOnce(&ExtensionContext) -> Result<(), TestError> + Send + 'static,
    {
        DynamicNode::Test {
            display_name: display_name.into(),
            executable: Box::new(executable),
        }
    }

    pub fn container(display_name: impl Into<String>, children: CloseableStream<DynamicNode>) -> Self {
        DynamicNode::Container {
            display_name: display_name.into(),
            children,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            DynamicNode::Test { display_name, .. } | DynamicNode::Container { display_name, .. } => {
                display_name
            }
        }
    }
}

impl fmt::Debug for DynamicNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DynamicNode::Test { display_name, .. } => {
                f.debug_struct("Test").field("display_name", display_name).finish()
            }
            DynamicNode::Container {
                display_name,
                children,
            } => f
                .debug_struct("Container")
                .field("display_name", display_name)
                .field("children", children)
                .finish(),
        }
    }
}

/// One invocation of a test template.
#[derive(Clone)]
pub struct InvocationContext {
    pub display_name: String,
    /// Registered at invocation scope for this invocation only.
    pub extensions: Vec<Arc<dyn Extension>>,
}

impl InvocationContext {
    pub fn new(display_name: impl Into<String>) -> Self {
        InvocationContext {
            display_name: display_name.into(),
            extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<&str> = self.extensions.iter().map(|e| e.name()).collect();
        f.debug_struct("InvocationContext")
            .field("display_name", &self.display_name)
            .field("extensions", &names)
            .finish()
    }
}

pub type InvocationStream = CloseableStream<InvocationContext>;

/// The 1-based invocation indices to run, e.g. `1,3-5`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationSelection {
    ranges: Vec<RangeInclusive<usize>>,
}

impl InvocationSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, index: usize) -> Self {
        self.ranges.push(index..=index);
        self
    }

    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.ranges.push(from..=to);
        self
    }

    pub fn contains(&self, index: usize) -> bool {
        self.ranges.iter().any(|r| r.contains(&index))
    }

    /// The highest selected index. Nothing past it needs to be drawn.
    pub fn max(&self) -> Option<usize> {
        self.ranges
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| *r.end())
            .max()
    }
}

impl FromStr for InvocationSelection {
    type Err = TestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            TestError::configuration(format!(
                "Invalid invocation selection `{}`: expected indices or ranges such as `1,3-5`",
                s
            ))
        };
        let mut selection = InvocationSelection::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            selection = match part.split_once('-') {
                Some((from, to)) => {
                    let from = from.trim().parse().map_err(|_| invalid())?;
                    let to = to.trim().parse().map_err(|_| invalid())?;
                    selection.range(from, to)
                }
                None => selection.index(part.parse().map_err(|_| invalid())?),
            };
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selections_parse_and_match() {
        let sel: InvocationSelection = "1, 3-5".parse().unwrap();
        assert!(sel.contains(1));
        assert!(!sel.contains(2));
        assert!(sel.contains(4));
        assert_eq!(sel.max(), Some(5));
        assert!("1,x".parse::<InvocationSelection>().is_err());
        assert_eq!(InvocationSelection::new().max(), None);
    }

    #[test]
    fn dynamic_node_names() {
        let node = DynamicNode::container(
            "group",
            CloseableStream::from_iter(vec![DynamicNode::test("leaf", |_| Ok(()))]),
        );
        assert_eq!(node.display_name(), "group");
    }
}
