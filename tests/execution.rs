mod common;

use arbor::{
    config::{keys, ExecutionMode},
    descriptor::{ClassNode, DescriptorBuilder, Method},
    errors::{ensure, ErrorKind},
    listener::EventKind,
    Engine, MapConfiguration, RecordingListener, TestError,
};
use common::{run, run_with, Journal};
use proptest::prelude::*;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Tracks how many bodies run at once.
#[derive(Clone, Default)]
struct Gauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    fn method(&self, name: &str, hold: Duration) -> Method {
        let gauge = self.clone();
        Method::new(name, move |_| {
            let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(hold);
            gauge.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn parallel() -> MapConfiguration {
    MapConfiguration::new()
        .with(keys::PARALLEL_ENABLED, "true")
        .with(keys::DEFAULT_EXECUTION_MODE, "concurrent")
        .with(keys::PARALLELISM, "4")
}

#[test]
fn concurrent_siblings_overlap() {
    let gauge = Gauge::default();
    let mut engine = DescriptorBuilder::engine("arbor");
    for i in 0..4 {
        engine = engine.child(DescriptorBuilder::test(
            gauge.method(&format!("t{}", i), Duration::from_millis(300)),
        ));
    }
    let listener = run_with(engine.build(), parallel());
    assert_eq!(listener.summary().successful, 4);
    assert!(gauge.peak() > 1);
}

#[test]
fn resource_locks_serialize_their_holders() {
    let gauge = Gauge::default();
    let mut engine = DescriptorBuilder::engine("arbor");
    for i in 0..4 {
        engine = engine.child(
            DescriptorBuilder::test(gauge.method(&format!("t{}", i), Duration::from_millis(50)))
                .resource_lock("database"),
        );
    }
    let listener = run_with(engine.build(), parallel());
    assert_eq!(listener.summary().successful, 4);
    assert_eq!(gauge.peak(), 1);
}

#[test]
fn children_sharing_a_lock_taken_by_their_parent_never_overlap() {
    let gauge = Gauge::default();
    let mut class = DescriptorBuilder::class(ClassNode::of::<()>("Schema")).resource_lock("schema");
    for i in 0..3 {
        class = class.child(
            DescriptorBuilder::test(gauge.method(&format!("t{}", i), Duration::from_millis(50)))
                .resource_lock("database"),
        );
    }
    let root = DescriptorBuilder::engine("arbor").child(class).build();
    let listener = run_with(root, parallel());
    assert_eq!(listener.summary().successful, 3);
    assert_eq!(gauge.peak(), 1);
}

#[test]
fn same_thread_nodes_never_overlap() {
    let gauge = Gauge::default();
    let mut engine = DescriptorBuilder::engine("arbor");
    for i in 0..3 {
        engine = engine.child(
            DescriptorBuilder::test(gauge.method(&format!("t{}", i), Duration::from_millis(30)))
                .execution_mode(ExecutionMode::SameThread),
        );
    }
    let listener = run_with(engine.build(), parallel());
    assert_eq!(listener.summary().successful, 3);
    assert_eq!(gauge.peak(), 1);
}

#[test]
fn nested_locks_held_by_an_ancestor_are_reentrant() {
    let journal = Journal::new();
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(ClassNode::of::<()>("Db"))
                .resource_lock("database")
                .child(DescriptorBuilder::test(journal.hook("inner")).resource_lock("database")),
        )
        .build();
    let listener = run_with(root, parallel());
    assert!(listener.result_of("inner").unwrap().is_successful());
}

fn pause(millis: u64) -> Method {
    Method::new("pause", move |_| {
        thread::sleep(Duration::from_millis(millis));
        Ok(())
    })
    .as_static()
}

#[test]
fn crossed_nested_locks_do_not_deadlock() {
    let locked = |name: &str, own: &str, nested: &str| {
        DescriptorBuilder::class(ClassNode::of::<()>(name).before_all(pause(200)))
            .resource_lock(own)
            .child(
                DescriptorBuilder::test(Method::new(format!("{} child", name), |_| Ok(())))
                    .resource_lock(nested),
            )
    };
    let root = DescriptorBuilder::engine("arbor")
        .child(locked("P1", "x", "y"))
        .child(locked("P2", "y", "x"))
        .build();

    let (done, finished) = mpsc::channel();
    thread::spawn(move || {
        let listener = run_with(root, parallel());
        let _ = done.send(listener.summary());
    });
    let summary = finished
        .recv_timeout(Duration::from_secs(10))
        .expect("run did not finish");
    assert_eq!(summary.successful, 2);
}

#[test]
fn after_all_runs_once_every_concurrent_child_is_reported() {
    let gauge = Gauge::default();
    let listener = Arc::new(RecordingListener::new());
    let observed = Arc::clone(&listener);
    let after_all = Method::new("all reported", move |_| {
        let finished = observed
            .events()
            .iter()
            .filter(|e| e.is_test && matches!(e.kind, EventKind::Finished(_)))
            .count();
        ensure(finished == 4, format!("only {} of 4 children were reported", finished))
    })
    .as_static();

    let mut class = DescriptorBuilder::class(ClassNode::of::<()>("Pool").after_all(after_all));
    for i in 0..4 {
        class = class.child(DescriptorBuilder::test(
            gauge.method(&format!("t{}", i), Duration::from_millis(100 * (i + 1))),
        ));
    }
    let root = DescriptorBuilder::engine("arbor").child(class).build();
    Engine::new()
        .with_configuration(parallel())
        .execute(root, listener.clone())
        .unwrap();

    assert!(gauge.peak() > 1);
    assert_eq!(listener.summary().successful, 4);
    assert!(listener.result_of("Pool").unwrap().is_successful());
}

#[test]
fn slow_tests_time_out_without_stopping_the_run() {
    let journal = Journal::new();
    let slow = Method::new("slow", |_| {
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(slow).timeout(Duration::from_millis(50)))
        .child(DescriptorBuilder::test(journal.hook("next")))
        .build();
    let listener = run(root);

    let result = listener.result_of("slow").unwrap();
    assert!(result.is_failed());
    assert_eq!(result.error().unwrap().kind(), ErrorKind::Timeout);
    assert!(listener.result_of("next").unwrap().is_successful());
}

#[test]
fn the_default_timeout_applies_to_every_test() {
    let slow = Method::new("slow", |_| {
        thread::sleep(Duration::from_millis(500));
        Ok(())
    });
    let root = DescriptorBuilder::engine("arbor")
        .child(DescriptorBuilder::test(slow))
        .build();
    let conf = MapConfiguration::new().with(keys::DEFAULT_TIMEOUT, "50ms");
    let listener = run_with(root, conf);
    let result = listener.result_of("slow").unwrap();
    assert_eq!(result.error().unwrap().kind(), ErrorKind::Timeout);
}

#[test]
fn timed_out_tests_are_reported_before_their_body_returns() {
    let journal = Journal::new();
    let class = ClassNode::of::<()>("Stuck")
        .after_each(journal.hook("instance cleanup"))
        .after_each(journal.hook("static cleanup").as_static());
    let slow = Method::new("slow", |_| {
        thread::sleep(Duration::from_secs(3));
        Ok(())
    });
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::class(class)
                .child(DescriptorBuilder::test(slow).timeout(Duration::from_millis(50))),
        )
        .build();

    let started = Instant::now();
    let listener = run(root);
    assert!(started.elapsed() < Duration::from_secs(2));

    let result = listener.result_of("slow").unwrap();
    let error = result.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Timeout);
    // The instance hook cannot get at the instance the body still holds.
    assert_eq!(error.suppressed().len(), 1);
    assert_eq!(error.suppressed()[0].kind(), ErrorKind::Timeout);
    assert_eq!(journal.entries(), vec!["static cleanup"]);
}

#[test]
fn failures_inside_a_timed_test_are_reported() {
    let root = DescriptorBuilder::engine("arbor")
        .child(
            DescriptorBuilder::test(Method::new("quick failure", |_| {
                Err(TestError::failure("wrong answer"))
            }))
            .timeout(Duration::from_secs(5)),
        )
        .build();
    let listener = run(root);
    let result = listener.result_of("quick failure").unwrap();
    assert_eq!(result.error().unwrap().message(), "wrong answer");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // Whether a node runs depends only on its conditions, so repeated runs
    // skip exactly the same nodes.
    #[test]
    fn condition_outcomes_are_stable(disabled in proptest::collection::vec(any::<bool>(), 1..6)) {
        let build = || {
            let mut engine = DescriptorBuilder::engine("arbor");
            for (i, off) in disabled.iter().enumerate() {
                let mut test = DescriptorBuilder::test(Method::new(format!("t{}", i), |_| Ok(())));
                if *off {
                    test = test.disabled("off");
                }
                engine = engine.child(test);
            }
            engine.build()
        };
        let skipped = |listener: &arbor::RecordingListener| -> Vec<bool> {
            (0..disabled.len())
                .map(|i| listener.skip_reason(&format!("t{}", i)).is_some())
                .collect()
        };

        let first = run(build());
        let second = run(build());
        prop_assert_eq!(skipped(&first), disabled.clone());
        prop_assert_eq!(skipped(&second), disabled.clone());
        prop_assert_eq!(first.summary(), second.summary());
    }
}
