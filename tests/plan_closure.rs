// tests/plan_closure.rs

use std::sync::Arc;

use siso::graph::{StepDef, Target};
use siso::plan::Plan;
use siso::step::StepPhase;
use siso_test_utils::{init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

fn def(id: &str, outs: &[u32]) -> Arc<StepDef> {
    Arc::new(StepDef {
        id: id.to_string(),
        args: vec!["true".to_string()],
        outs: outs.iter().map(|t| Target(*t)).collect(),
        ..StepDef::default()
    })
}

#[tokio::test]
async fn test_plan_with_no_steps_closes_on_finish_scheduling() {
    init_tracing();
    let plan = Plan::new(4);
    assert!(!plan.is_closed());

    plan.finish_scheduling();
    assert!(plan.is_closed());

    let cancel = CancellationToken::new();
    let next = with_timeout(plan.next(&cancel)).await;
    assert!(next.is_none());
}

#[tokio::test]
async fn test_plan_closes_only_after_every_step_is_done() {
    init_tracing();
    let plan = Plan::new(8);
    for i in 0..5u32 {
        plan.add(def(&format!("s{i}"), &[i]), Target(i), vec![]);
    }
    plan.finish_scheduling();

    let cancel = CancellationToken::new();
    for i in 0..5 {
        assert!(!plan.is_closed(), "closed after {i} steps");
        let step = with_timeout(plan.next(&cancel))
            .await
            .expect("step should be ready");
        assert_eq!(step.phase(), StepPhase::Dispatched);
        plan.done(&step);
    }

    assert!(plan.is_closed());
    let stats = plan.stats();
    assert_eq!(stats.done, 5);
    assert_eq!(stats.remaining, 0);
    assert!(with_timeout(plan.next(&cancel)).await.is_none());
}

#[tokio::test]
async fn test_plan_does_not_close_before_scheduling_finishes() {
    init_tracing();
    let plan = Plan::new(2);
    plan.add(def("only", &[0]), Target(0), vec![]);

    let step = plan.try_next().expect("ready");
    plan.done(&step);
    assert!(!plan.is_closed(), "scheduling still in progress");

    plan.finish_scheduling();
    assert!(plan.is_closed());
}

#[tokio::test]
async fn test_dependent_released_only_after_producer_done() {
    init_tracing();
    let plan = Plan::new(4);
    plan.add(def("gen", &[1]), Target(1), vec![]);
    plan.add(def("cc", &[2]), Target(2), vec![Target(1)]);
    plan.finish_scheduling();

    let producer = plan.try_next().expect("gen is ready");
    assert_eq!(producer.id(), "gen");
    assert!(plan.try_next().is_none(), "cc must wait for gen");

    plan.done(&producer);
    let cc = plan.try_next().expect("cc released");
    assert_eq!(cc.id(), "cc");
    plan.done(&cc);
    assert!(plan.is_closed());
}

#[tokio::test]
async fn test_canceled_next_returns_none() {
    init_tracing();
    let plan = Plan::new(1);
    plan.add(def("a", &[0]), Target(0), vec![Target(9)]);
    plan.finish_scheduling();

    let cancel = CancellationToken::new();
    let waiter = {
        let cancel = cancel.clone();
        let plan = Arc::new(plan);
        let p = Arc::clone(&plan);
        tokio::spawn(async move { p.next(&cancel).await.map(|s| s.id().to_string()) })
    };
    cancel.cancel();
    let res = with_timeout(waiter).await.unwrap();
    assert!(res.is_none());
}
