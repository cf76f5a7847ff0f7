// tests/schedule_walk.rs

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Harness;
use siso::errors::SisoError;
use siso::graph::{Graph, GraphError, ManifestGraph, StepDef, Target};
use siso::hashfs::MemHashFs;
use siso::plan::{schedule, Plan};
use siso::step::{Step, StepPhase};
use siso_test_utils::builders::{ManifestBuilder, StepBuilder};
use siso_test_utils::fake_exec::CountingGraph;
use siso_test_utils::{init_tracing, with_timeout};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// src/a.c -> a.o -> {b.o, c.o} -> app
fn diamond() -> ManifestBuilder {
    ManifestBuilder::new()
        .with_step(
            "a",
            StepBuilder::new("cc -c src/a.c -o a.o")
                .input("src/a.c")
                .output("a.o")
                .build(),
        )
        .with_step(
            "b",
            StepBuilder::new("gen b.o")
                .input("a.o")
                .output("b.o")
                .build(),
        )
        .with_step(
            "c",
            StepBuilder::new("gen c.o")
                .input("a.o")
                .output("c.o")
                .build(),
        )
        .with_step(
            "link",
            StepBuilder::new("ld -o app b.o c.o")
                .input("b.o")
                .input("c.o")
                .output("app")
                .build(),
        )
}

#[tokio::test]
async fn test_diamond_runs_producers_before_consumers() {
    init_tracing();
    let h = Harness::new(diamond().with_parallelism(4).build()).with_sources(&["src/a.c"]);

    let stats = with_timeout(h.build(&[])).await.expect("build ok");
    assert_eq!(stats.done, 4);
    assert_eq!(stats.local, 4);

    let order = h.local.run_ids();
    assert_eq!(order.len(), 4);
    let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("link"));
    assert!(pos("c") < pos("link"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_consumer_dispatched_only_after_producers_report_done() {
    init_tracing();
    let cfg = diamond().build();
    let fs = MemHashFs::new();
    fs.add_file("src/a.c", "int a;");
    let graph = ManifestGraph::from_config(&cfg);
    let plan = Arc::new(Plan::new(4));
    schedule(&plan, &graph, &fs, &CancellationToken::new(), &[]).unwrap();

    let producers: HashMap<&'static str, Vec<&'static str>> = HashMap::from([
        ("a", vec![]),
        ("b", vec!["a"]),
        ("c", vec!["a"]),
        ("link", vec!["b", "c"]),
    ]);
    let producers = Arc::new(producers);
    let dispatched: Arc<Mutex<HashMap<String, Arc<Step>>>> = Arc::default();
    let violations: Arc<Mutex<Vec<String>>> = Arc::default();

    let cancel = CancellationToken::new();
    let mut workers = JoinSet::new();
    for _ in 0..4 {
        let plan = Arc::clone(&plan);
        let producers = Arc::clone(&producers);
        let dispatched = Arc::clone(&dispatched);
        let violations = Arc::clone(&violations);
        let cancel = cancel.clone();
        workers.spawn(async move {
            while let Some(step) = plan.next(&cancel).await {
                {
                    let seen = dispatched.lock().unwrap();
                    for dep in producers[step.id()].iter() {
                        let reported = seen.get(*dep).map(|s| s.phase());
                        if reported != Some(StepPhase::Done) {
                            violations.lock().unwrap().push(format!(
                                "{} dispatched while {dep} was {reported:?}",
                                step.id()
                            ));
                        }
                    }
                }
                dispatched
                    .lock()
                    .unwrap()
                    .insert(step.id().to_string(), Arc::clone(&step));
                // Give a wrongly released consumer time to show up.
                tokio::time::sleep(Duration::from_millis(10)).await;
                plan.done(&step);
            }
        });
    }

    with_timeout(async {
        while let Some(res) = workers.join_next().await {
            res.unwrap();
        }
    })
    .await;

    assert!(plan.is_closed());
    assert_eq!(dispatched.lock().unwrap().len(), 4);
    assert!(violations.lock().unwrap().is_empty(), "{:?}", violations.lock().unwrap());
}

#[test]
fn test_each_target_is_resolved_once() {
    init_tracing();
    let cfg = diamond().build();
    let fs = MemHashFs::new();
    fs.add_file("src/a.c", "int a;");

    let graph = CountingGraph::new(ManifestGraph::from_config(&cfg));
    let plan = Plan::new(16);
    let summary = schedule(&plan, &graph, &fs, &CancellationToken::new(), &[]).unwrap();

    assert_eq!(summary.steps, 4);
    assert_eq!(summary.sources, 1);
    let a_o = graph.inner().lookup("a.o").unwrap();
    assert_eq!(graph.calls_for(a_o), 1);

    let mut resolved = graph.resolved();
    resolved.sort();
    assert_eq!(resolved, vec!["a", "b", "c", "link"]);
    assert!(plan.is_marked(graph.inner().lookup("src/a.c").unwrap()));
}

#[test]
fn test_requesting_two_outputs_of_one_step_adds_it_once() {
    init_tracing();
    let cfg = ManifestBuilder::new()
        .with_step(
            "gen",
            StepBuilder::new("gen")
                .output("gen/a.h")
                .output("gen/b.h")
                .build(),
        )
        .build();
    let graph = ManifestGraph::from_config(&cfg);
    let plan = Plan::new(4);
    let args = vec!["gen/a.h".to_string(), "gen/b.h".to_string()];

    let summary = schedule(&plan, &graph, &MemHashFs::new(), &CancellationToken::new(), &args).unwrap();
    assert_eq!(summary.targets, 2);
    assert_eq!(summary.steps, 1);
    assert_eq!(plan.stats().added, 1);
}

#[test]
fn test_unknown_target_is_an_error() {
    init_tracing();
    let cfg = diamond().build();
    let graph = ManifestGraph::from_config(&cfg);
    let plan = Plan::new(4);

    let res = schedule(
        &plan,
        &graph,
        &MemHashFs::new(),
        &CancellationToken::new(),
        &["nope".to_string()],
    );
    match res {
        Err(SisoError::Graph(GraphError::NoTarget(name))) => assert_eq!(name, "nope"),
        other => panic!("expected NoTarget, got {other:?}"),
    }
    assert!(!plan.is_closed());
}

#[test]
fn test_missing_source_is_an_error() {
    init_tracing();
    let cfg = diamond().build();
    let graph = ManifestGraph::from_config(&cfg);
    let plan = Plan::new(4);

    let res = schedule(&plan, &graph, &MemHashFs::new(), &CancellationToken::new(), &[]);
    match res {
        Err(SisoError::MissingSource(path)) => assert_eq!(path, "src/a.c"),
        other => panic!("expected MissingSource, got {other:?}"),
    }
}

#[test]
fn test_canceled_schedule_stops_walking() {
    init_tracing();
    let cfg = diamond().build();
    let graph = ManifestGraph::from_config(&cfg);
    let plan = Plan::new(4);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let res = schedule(&plan, &graph, &MemHashFs::new(), &cancel, &[]);
    assert!(matches!(res, Err(SisoError::Canceled)));
}

/// Two steps that consume each other's output. Manifests with cycles are
/// rejected at load time, so this graph is built by hand.
struct CyclicGraph {
    x: Arc<StepDef>,
    y: Arc<StepDef>,
}

impl CyclicGraph {
    fn new() -> Self {
        let step = |id: &str, out: u32| {
            Arc::new(StepDef {
                id: id.to_string(),
                args: vec!["gen".to_string()],
                outputs: vec![format!("{id}.out")],
                outs: vec![Target(out)],
                ..StepDef::default()
            })
        };
        Self {
            x: step("x", 0),
            y: step("y", 1),
        }
    }
}

impl Graph for CyclicGraph {
    fn targets(&self, _args: &[String]) -> Result<Vec<Target>, GraphError> {
        Ok(vec![Target(0)])
    }

    fn target_path(&self, target: Target) -> Result<String, GraphError> {
        Ok(format!("{}.out", if target.0 == 0 { "x" } else { "y" }))
    }

    fn step_def(
        &self,
        target: Target,
        _prev: Option<&StepDef>,
    ) -> Result<(Arc<StepDef>, Vec<Target>), GraphError> {
        match target.0 {
            0 => Ok((Arc::clone(&self.x), vec![Target(1)])),
            1 => Ok((Arc::clone(&self.y), vec![Target(0)])),
            _ => Err(GraphError::NoTarget(target.to_string())),
        }
    }

    fn input_deps(&self) -> HashMap<String, Vec<String>> {
        HashMap::new()
    }

    fn step_limits(&self) -> HashMap<String, usize> {
        HashMap::new()
    }
}

#[test]
fn test_cycle_is_detected_during_walk() {
    init_tracing();
    let plan = Plan::new(4);
    let res = schedule(
        &plan,
        &CyclicGraph::new(),
        &MemHashFs::new(),
        &CancellationToken::new(),
        &[],
    );
    match res {
        Err(SisoError::GraphCycle(msg)) => assert!(msg.contains("x.out")),
        other => panic!("expected GraphCycle, got {other:?}"),
    }
}

#[tokio::test]
async fn test_label_input_waits_for_the_labelled_step() {
    init_tracing();
    let cfg = ManifestBuilder::new()
        .with_parallelism(2)
        .with_step("gen_headers", StepBuilder::new("gen").output("gen/x.h").build())
        .with_step(
            "all",
            StepBuilder::phony().input("gen_headers").build(),
        )
        .build();
    let h = Harness::new(cfg);

    let stats = with_timeout(h.build(&["all"])).await.unwrap();
    assert_eq!(stats.done, 2);
    assert_eq!(stats.phony, 1);
    assert_eq!(h.local.run_ids(), vec!["gen_headers"]);
}
