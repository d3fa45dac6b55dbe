mod common;

use arbor::{
    config::keys,
    descriptor::{ClassNode, DescriptorBuilder, Method},
    errors::{ensure, ErrorKind},
    extension::{
        builtin::{EnabledIfParameter, TestInfo, TestReporter},
        store::{CloseableResource, Namespace},
        BeforeEachCallback, ConditionResult, ExecutionCondition, Extension, ParameterContext,
        ParameterResolver, Position, TestWatcher,
    },
    listener::EventKind,
    Engine, ExtensionContext, MapConfiguration, ParamType, RecordingListener, TestError, Value,
};
use common::{run, run_extended, run_with, Journal};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Resolves every `int` parameter to a fixed value.
struct FixedInt {
    name: &'static str,
    value: Value,
}

impl ParameterResolver for FixedInt {
    fn supports(&self, parameter: &ParameterContext<'_>, _: &ExtensionContext) -> Result<bool, TestError> {
        Ok(parameter.parameter.ty == ParamType::Int)
    }

    fn resolve(&self, _: &ParameterContext<'_>, _: &ExtensionContext) -> Result<Value, TestError> {
        Ok(self.value.clone())
    }
}

impl Extension for FixedInt {
    fn name(&self) -> &str {
        self.name
    }

    fn as_parameter_resolver(&self) -> Option<&dyn ParameterResolver> {
        Some(self)
    }
}

fn fixed(name: &'static str, value: impl Into<Value>) -> FixedInt {
    FixedInt {
        name,
        value: value.into(),
    }
}

fn takes_int(name: &str) -> Method {
    Method::new(name, |inv| {
        ensure(inv.arg(0)? == &Value::Int(42), "expected the answer")
    })
    .param("answer", ParamType::Int)
}

#[test]
fn a_single_resolver_supplies_the_argument() {
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(takes_int("answers")).extend_with(fixed("FortyTwo", 42)))
        .build();
    let listener = run(root);
    assert!(listener.result_of("answers").unwrap().is_successful());
}

#[test]
fn resolvers_are_inherited_from_ancestors() {
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(ClassNode::of::<()>("Answers"))
                .extend_with(fixed("FortyTwo", 42))
                .child(DescriptorBuilder::test(takes_int("first")))
                .child(DescriptorBuilder::test(takes_int("second"))),
        )
        .child(DescriptorBuilder::test(takes_int("outside")))
        .build();
    let listener = run(root);
    assert!(listener.result_of("first").unwrap().is_successful());
    assert!(listener.result_of("second").unwrap().is_successful());

    let outside = listener.result_of("outside").unwrap();
    let error = outside.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Resolution);
    assert!(error.message().contains("answer"));
    assert!(error.message().contains("outside"));
}

#[test]
fn competing_resolvers_are_a_configuration_error() {
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::test(takes_int("ambiguous"))
                .extend_with(fixed("FortyTwo", 42))
                .extend_with(fixed("Seven", 7)),
        )
        .child(DescriptorBuilder::test(takes_int("fine")).extend_with(fixed("FortyTwo", 42)))
        .build();
    let listener = run(root);

    let result = listener.result_of("ambiguous").unwrap();
    let error = result.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().contains("FortyTwo"));
    assert!(error.message().contains("Seven"));
    assert!(listener.result_of("fine").unwrap().is_successful());
}

#[test]
fn resolved_values_are_type_checked() {
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(takes_int("wrong type")).extend_with(fixed("Wordy", "42")))
        .child(DescriptorBuilder::test(takes_int("null")).extend_with(fixed("Nothing", Value::Null)))
        .build();
    let listener = run(root);
    for name in ["wrong type", "null"] {
        let result = listener.result_of(name).unwrap();
        assert_eq!(result.error().unwrap().kind(), ErrorKind::Resolution, "{}", name);
    }
    let wrong = listener.result_of("wrong type").unwrap();
    assert!(wrong.error().unwrap().message().contains("Wordy"));
}

#[test]
fn builtin_test_info_and_reporter_are_resolvable() {
    let seen = Journal::new();
    let journal = seen.clone();
    let method = Method::new("describes itself", move |inv| {
        let info = inv
            .arg(0)?
            .downcast_ref::<TestInfo>()
            .cloned()
            .ok_or_else(|| TestError::failure("no TestInfo"))?;
        journal.push(format!(
            "{} {} {:?}",
            info.display_name,
            info.test_class.as_deref().unwrap_or("-"),
            info.tags
        ));
        let reporter = inv
            .arg(1)?
            .downcast_ref::<TestReporter>()
            .cloned()
            .ok_or_else(|| TestError::failure("no TestReporter"))?;
        reporter.publish_entry("status", "ok");
        Ok(())
    })
    .param("info", ParamType::object("TestInfo"))
    .param("reporter", ParamType::object("TestReporter"));
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(ClassNode::of::<()>("Info"))
                .child(DescriptorBuilder::test(method).tag("fast")),
        )
        .build();
    let listener = run(root);

    assert!(listener.result_of("describes itself").unwrap().is_successful());
    assert_eq!(seen.entries(), vec!["describes itself Info {\"fast\"}"]);
    let published = listener
        .events_for("describes itself")
        .into_iter()
        .any(|e| matches!(&e.kind, EventKind::ReportEntryPublished(v) if v.get("status").map(String::as_str) == Some("ok")));
    assert!(published);
}

#[test]
fn disabled_nodes_are_skipped_without_running_anything() {
    let journal = Journal::new();
    let constructed = journal.clone();
    let class = ClassNode::new(
        "Off",
        Method::constructor("Off", move |_| {
            constructed.push("new");
            Ok(())
        }),
    )
    .before_all(journal.hook("before_all").as_static())
    .before_each(journal.hook("before_each"));
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(class)
                .disabled("not today")
                .child(DescriptorBuilder::test(journal.hook("inside"))),
        )
        .child(DescriptorBuilder::test(journal.hook("outside")))
        .build();
    let listener = run(root);

    assert_eq!(listener.skip_reason("Off").as_deref(), Some("not today"));
    assert_eq!(listener.skip_reason("inside").as_deref(), Some("not today"));
    assert!(!listener.was_started("Off"));
    assert!(!listener.was_started("inside"));
    assert_eq!(journal.entries(), vec!["outside"]);
}

#[test]
fn deactivated_conditions_are_not_evaluated() {
    let journal = Journal::new();
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(journal.hook("t")).disabled("flaky"))
        .build();
    let conf = MapConfiguration::new().with(keys::DEACTIVATE_CONDITIONS, "Dis*");
    let listener = run_with(root, conf);
    assert!(listener.result_of("t").unwrap().is_successful());
    assert_eq!(journal.entries(), vec!["t"]);
}

#[test]
fn parameter_conditions_read_the_configuration() {
    let journal = Journal::new();
    let build = |journal: &Journal| {
        DescriptorBuilder::engine("arbor")
            .child(
                DescriptorBuilder::test(journal.hook("ci only"))
                    .extend_with(EnabledIfParameter::new("env", "ci|nightly").unwrap()),
            )
            .build()
    };

    let listener = run_with(build(&journal), MapConfiguration::new().with("env", "ci"));
    assert!(listener.result_of("ci only").unwrap().is_successful());

    let listener = run_with(build(&journal), MapConfiguration::new().with("env", "local"));
    assert!(listener.skip_reason("ci only").unwrap().contains("does not match"));

    let listener = run(build(&journal));
    assert!(listener.skip_reason("ci only").unwrap().contains("does not exist"));
    assert_eq!(journal.count("ci only"), 1);
}

struct Exploding;

impl ExecutionCondition for Exploding {
    fn evaluate(&self, _: &ExtensionContext) -> Result<ConditionResult, TestError> {
        Err(TestError::failure("cannot decide"))
    }
}

impl Extension for Exploding {
    fn name(&self) -> &str {
        "Exploding"
    }

    fn as_condition(&self) -> Option<&dyn ExecutionCondition> {
        Some(self)
    }
}

#[test]
fn failing_conditions_fail_the_node() {
    let journal = Journal::new();
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(journal.hook("t")).extend_with(Exploding))
        .build();
    let listener = run(root);
    let result = listener.result_of("t").unwrap();
    let error = result.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().contains("Exploding"));
    assert!(journal.entries().is_empty());
}

struct Watcher(Journal);

impl TestWatcher for Watcher {
    fn test_disabled(&self, context: &ExtensionContext, reason: &str) {
        self.0.push(format!("disabled {} ({})", context.display_name(), reason));
    }

    fn test_successful(&self, context: &ExtensionContext) {
        self.0.push(format!("successful {}", context.display_name()));
    }

    fn test_failed(&self, context: &ExtensionContext, cause: &TestError) {
        self.0.push(format!("failed {} ({})", context.display_name(), cause));
    }
}

impl Extension for Watcher {
    fn as_watcher(&self) -> Option<&dyn TestWatcher> {
        Some(self)
    }
}

#[test]
fn watchers_observe_test_outcomes() {
    let journal = Journal::new();
    let tests = Journal::new();
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(tests.hook("good")))
        .child(DescriptorBuilder::test(
            tests.hook_then("bad", || Err(TestError::failure("nope"))),
        ))
        .child(DescriptorBuilder::test(tests.hook("off")).disabled("later"))
        .build();
    let listener = Arc::new(RecordingListener::new());
    Engine::new()
        .register_extension(Watcher(journal.clone()), Position::Default)
        .execute(root, listener)
        .unwrap();
    assert_eq!(
        journal.entries(),
        vec!["successful good", "failed bad (nope)", "disabled off (later)"]
    );
}

struct Connection {
    closed: Arc<AtomicUsize>,
}

impl CloseableResource for Connection {
    fn close(&self) -> Result<(), TestError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct OpensConnection(Arc<AtomicUsize>);

impl BeforeEachCallback for OpensConnection {
    fn before_each(&self, context: &ExtensionContext) -> Result<(), TestError> {
        context
            .store(Namespace::create(["db"]))
            .put_resource(
                "connection",
                Connection {
                    closed: Arc::clone(&self.0),
                },
            );
        Ok(())
    }
}

impl Extension for OpensConnection {
    fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
        Some(self)
    }
}

#[test]
fn store_resources_are_closed_once_per_node() {
    let closed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&closed);
    let uses = Method::new("uses", move |inv| {
        let connection = inv
            .context()
            .store(Namespace::create(["db"]))
            .get::<Connection>("connection")?;
        ensure(connection.is_some(), "connection missing")?;
        ensure(seen.load(Ordering::SeqCst) == 0, "closed too early")
    });
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(ClassNode::of::<()>("Db"))
                .extend_with(OpensConnection(Arc::clone(&closed)))
                .child(DescriptorBuilder::test(uses))
                .child(DescriptorBuilder::test(Method::new("second", |_| Ok(())))),
        )
        .build();
    let listener = run(root);
    assert!(listener.result_of("uses").unwrap().is_successful());
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[test]
fn programmatic_extensions_reach_every_node() {
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(ClassNode::of::<()>("A"))
                .child(DescriptorBuilder::test(takes_int("a"))),
        )
        .child(DescriptorBuilder::test(takes_int("b")))
        .build();
    let listener = common::run_extended(root, fixed("FortyTwo", 42));
    assert_eq!(listener.summary().successful, 2);
}

#[test]
fn failed_registration_skips_the_whole_subtree() {
    let journal = Journal::new();
    let tests = Journal::new();
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(ClassNode::of::<()>("Claimed"))
                .extend_with_at(Exploding, Position::Outermost)
                .extend_with_at(Exploding, Position::Outermost)
                .child(
                    DescriptorBuilder::class(ClassNode::of::<()>("Nested"))
                        .child(DescriptorBuilder::test(tests.hook("leaf"))),
                ),
        )
        .build();
    let listener = run_extended(root, Watcher(journal.clone()));

    let result = listener.result_of("Claimed").unwrap();
    assert_eq!(result.error().unwrap().kind(), ErrorKind::Configuration);
    for node in ["Nested", "leaf"] {
        assert!(!listener.was_started(node));
        assert!(listener
            .skip_reason(node)
            .unwrap()
            .starts_with("Extension registration failed"));
    }
    assert!(tests.entries().is_empty());
    let notified = journal.entries();
    assert_eq!(notified.len(), 1);
    assert!(notified[0].starts_with("disabled leaf"));
}
