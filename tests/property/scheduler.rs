use std::collections::{BTreeSet, HashMap, HashSet};

use proptest::prelude::*;
use siso::config::ConfigFile;
use siso::errors::SisoError;
use siso::graph::ManifestGraph;
use siso::hashfs::MemHashFs;
use siso::plan::{schedule, Plan};
use siso_test_utils::builders::{ManifestBuilder, StepBuilder};
use siso_test_utils::fake_exec::Outcome;
use tokio_util::sync::CancellationToken;

use crate::common::Harness;

/// Edges of a random DAG: `deps[i]` only names steps before `i`.
fn dag_strategy(max_steps: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_steps).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        }
                    })
                    .collect()
            },
        )
    })
}

fn manifest(deps: &[BTreeSet<usize>], capacity: usize) -> ConfigFile {
    let mut builder = ManifestBuilder::new()
        .with_parallelism(3)
        .with_keep_going(0)
        .with_ready_queue_capacity(capacity);
    for (i, inputs) in deps.iter().enumerate() {
        let mut step = StepBuilder::new(&format!("gen out{i}")).output(&format!("out{i}"));
        for j in inputs {
            step = step.input(&format!("out{j}"));
        }
        builder = builder.with_step(&format!("s{i}"), step.build());
    }
    builder.build()
}

/// Steps expected to run when `failing` exit non-zero: a step runs only if
/// every input ran and succeeded.
fn expected_runs(deps: &[BTreeSet<usize>], failing: &HashSet<usize>) -> HashSet<usize> {
    let mut ran = HashSet::new();
    for (i, inputs) in deps.iter().enumerate() {
        if inputs.iter().all(|j| ran.contains(j) && !failing.contains(j)) {
            ran.insert(i);
        }
    }
    ran
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_builds_respect_dependencies_and_terminate(
        deps in dag_strategy(12),
        capacity in 1..4usize,
        failing_picks in proptest::collection::vec(0..12usize, 0..3),
    ) {
        let n = deps.len();
        let failing: HashSet<usize> = failing_picks.into_iter().filter(|i| *i < n).collect();
        let h = Harness::new(manifest(&deps, capacity));
        for i in failing.iter() {
            h.local.script(&format!("s{i}"), Outcome::Exit(1));
        }

        let rt = tokio::runtime::Runtime::new().unwrap();
        let res = rt.block_on(siso_test_utils::with_timeout(h.build(&[])));

        let order = h.local.run_ids();
        let pos: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(k, id)| (id.clone(), k))
            .collect();
        prop_assert_eq!(pos.len(), order.len(), "a step ran twice: {:?}", order);

        // Every dependency ran before its consumer.
        for (i, inputs) in deps.iter().enumerate() {
            let Some(&at) = pos.get(&format!("s{i}")) else { continue };
            for j in inputs {
                let dep_at = pos.get(&format!("s{j}"));
                prop_assert!(dep_at.is_some_and(|d| *d < at), "s{} ran before s{}", i, j);
            }
        }

        // Exactly the steps not downstream of a failure ran.
        let expected = expected_runs(&deps, &failing);
        let failed_runs = expected.iter().filter(|i| failing.contains(i)).count();
        let expected: HashSet<String> = expected.into_iter().map(|i| format!("s{i}")).collect();
        let ran: HashSet<String> = order.into_iter().collect();
        prop_assert_eq!(ran, expected);

        match res {
            Ok(stats) => {
                prop_assert!(failing.is_empty());
                prop_assert_eq!(stats.done, n);
            }
            Err(SisoError::BuildFailed { failed }) => prop_assert_eq!(failed, failed_runs),
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_plan_closes_after_random_completion_order(
        deps in dag_strategy(10),
        picks in proptest::collection::vec(any::<usize>(), 0..64),
    ) {
        let cfg = manifest(&deps, 2);
        let graph = ManifestGraph::from_config(&cfg);
        let fs = MemHashFs::new();
        let plan = Plan::new(2);
        let summary = schedule(&plan, &graph, &fs, &CancellationToken::new(), &[]).unwrap();
        prop_assert_eq!(summary.steps, deps.len());

        // Drain ready steps into a local pool and finish them in a random order.
        let mut running = Vec::new();
        let mut finished: HashSet<String> = HashSet::new();
        let mut picks = picks.into_iter();
        while !plan.is_closed() {
            while let Some(step) = plan.try_next() {
                running.push(step);
            }
            prop_assert!(!running.is_empty(), "plan stalled: {:?}", plan.stats());

            let k = picks.next().unwrap_or(0) % running.len();
            let step = running.swap_remove(k);
            let idx: usize = step.id()[1..].parse().unwrap();
            for j in deps[idx].iter() {
                let dep_id = format!("s{j}");
                prop_assert!(finished.contains(&dep_id));
            }
            finished.insert(step.id().to_string());
            plan.done(&step);
        }

        prop_assert_eq!(finished.len(), deps.len());
        prop_assert!(running.is_empty());
        let stats = plan.stats();
        prop_assert_eq!(stats.remaining, 0);
        prop_assert_eq!(stats.done, deps.len());
    }
}
