//! Arbor is a hierarchical test execution engine.
//!
//! Discovery hands arbor a tree of test descriptors: an engine root, test
//! classes, test methods, test templates and test factories. Arbor walks the
//! tree, decides which nodes run, creates test instances, runs lifecycle
//! hooks in a deterministic order, resolves method parameters, expands
//! templates and factories into dynamic tests, and reports every outcome to
//! an [EngineExecutionListener].
//!
//! ## Testing Model
//! A test class declares a constructor and any number of `before_all`,
//! `after_all`, `before_each` and `after_each` hooks. Its children are test
//! methods, nested classes, templates and factories.
//! ```
//! use arbor::descriptor::{ClassNode, DescriptorBuilder, Method};
//! use arbor::{Engine, RecordingListener};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Calculator {
//!     total: i64,
//! }
//!
//! let class = ClassNode::of::<Calculator>("CalculatorTests").before_each(Method::new(
//!     "reset",
//!     |inv| {
//!         inv.instance::<Calculator>()?.total = 0;
//!         Ok(())
//!     },
//! ));
//! let root = DescriptorBuilder::engine("arbor")
//!     .child(
//!         DescriptorBuilder::class(class).child(DescriptorBuilder::test(Method::new(
//!             "adds",
//!             |inv| {
//!                 let calc = inv.instance::<Calculator>()?;
//!                 calc.total += 2;
//!                 arbor::errors::ensure(calc.total == 2, "2 + 0 should be 2")
//!             },
//!         ))),
//!     )
//!     .build();
//!
//! let listener = Arc::new(RecordingListener::new());
//! Engine::new().execute(root, listener.clone()).unwrap();
//! assert!(listener.result_of("adds").unwrap().is_successful());
//! ```
//!
//! ## Instance Lifecycles
//! Under the default `per_method` lifecycle every test gets a fresh
//! instance and `before_all`/`after_all` hooks must be static. Under
//! `per_class` one instance serves the whole class and its hooks run on it.
//!
//! ## Extensions
//! Conditions, callbacks, parameter resolvers, instance processors,
//! invocation providers and watchers are all [extension::Extension]s.
//! Extensions declared on a node are visible to every node below it;
//! "before" callbacks run outermost first and "after" callbacks innermost
//! first.
//!
//! ## Dynamic Tests
//! A test template runs once per invocation supplied by its providers, for
//! example a [dynamic::ParameterizedTest] or [dynamic::RepeatedTest]. A
//! test factory returns a lazy [dynamic::CloseableStream] of dynamic tests
//! and containers. Either way, elements are drawn, executed and reported one
//! at a time, and the stream is closed exactly once.
//!
//! ## Configuration
//! Engine behavior is controlled through flat configuration parameters,
//! given in code or read from an `arbor.toml` file. See [config] for the
//! recognized keys.
pub mod config;
pub mod descriptor;
pub mod dynamic;
pub mod errors;
pub mod executor;
pub mod extension;
pub mod listener;
pub mod value;

pub use config::{ConfigurationParameters, MapConfiguration};
pub use descriptor::{DescriptorBuilder, TestDescriptor};
pub use errors::{ArborError, TestError};
pub use executor::{Engine, ExtensionContext, TestExecutionResult};
pub use listener::{EngineExecutionListener, LoggingListener, RecordingListener};
pub use value::{Arguments, ParamType, Value};
