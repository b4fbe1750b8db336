//! Workflow Determinism Property Tests
//!
//! These tests verify the core replay property:
//! **Same workflow code + same history = same calls and same result**
//!
//! ## What We Test
//!
//! 1. Completions delivered in any order resolve calls by seq, not arrival
//! 2. Rebuilding an executor from history on every pass produces exactly the
//!    history a warm, cached executor produces
//! 3. Replaying a finished execution issues no new calls and reaches the
//!    recorded result

use proptest::prelude::*;
use serde_json::{json, Value};
use weft_sdk::config::OrchestratorConfig;
use weft_sdk::error::Result;
use weft_sdk::testing::TestEngine;
use weft_sdk::worker::executor::WorkflowExecutor;
use weft_sdk::workflow::combinators::join_all;
use weft_sdk::workflow::context::WorkflowContext;
use weft_sdk::{EventKind, WorkflowResult};

/// Issues `input` tasks at once and joins them
async fn fan_out(ctx: WorkflowContext, input: Value) -> Result<Value> {
    let count = input.as_u64().unwrap_or(0);
    let calls: Vec<_> = (0..count)
        .map(|i| ctx.task_raw("work", json!(i)))
        .collect();
    let results = join_all(calls).await?;
    Ok(Value::Array(results))
}

/// Task count together with a delivery order over its seqs
fn arb_delivery() -> impl Strategy<Value = Vec<u32>> {
    (1u32..6).prop_flat_map(|n| Just((0..n).collect::<Vec<u32>>()).prop_shuffle())
}

struct Run {
    id: String,
    result: Option<WorkflowResult>,
    history: Vec<EventKind>,
    engine: TestEngine,
}

fn run_fan_out(config: OrchestratorConfig, order: &[u32]) -> Run {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let engine = TestEngine::with_config(config);
        engine.workflows().register_simple("fan-out", fan_out).unwrap();

        let id = engine
            .start("fan-out", json!(order.len()))
            .await
            .unwrap();
        engine.run_until_idle().await.unwrap();

        for seq in order {
            engine
                .complete_task(&id, *seq, Ok(json!(format!("r{}", seq))))
                .await
                .unwrap();
            let outcome = engine.run_until_idle().await.unwrap();
            assert!(outcome.is_success());
        }

        let result = engine.result(&id).await.unwrap();
        let history = engine
            .history(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.kind)
            // Execution ids are random per run
            .filter(|kind| !matches!(kind, EventKind::WorkflowStarted { .. }))
            .collect();
        Run {
            id,
            result,
            history,
            engine,
        }
    })
}

proptest! {
    /// Property: results follow call order whatever the delivery order
    #[test]
    fn results_follow_call_order(order in arb_delivery()) {
        let run = run_fan_out(OrchestratorConfig::DEFAULT, &order);

        let mut seqs = order.clone();
        seqs.sort_unstable();
        let expected: Vec<Value> = seqs.iter().map(|seq| json!(format!("r{}", seq))).collect();
        prop_assert_eq!(run.result, Some(WorkflowResult::Succeeded(Value::Array(expected))));
    }

    /// Property: a cold replay on every pass writes the same history as a warm executor
    #[test]
    fn replay_matches_cached_execution(order in arb_delivery()) {
        let cached = run_fan_out(OrchestratorConfig::DEFAULT, &order);
        let replayed = run_fan_out(OrchestratorConfig::LOW_RESOURCE, &order);
        let uncached = run_fan_out(OrchestratorConfig::new(0, 1).unwrap(), &order);

        prop_assert_eq!(&cached.history, &replayed.history);
        prop_assert_eq!(&cached.history, &uncached.history);
    }

    /// Property: replaying a finished execution issues nothing new
    #[test]
    fn finished_execution_replays_quietly(order in arb_delivery()) {
        let run = run_fan_out(OrchestratorConfig::DEFAULT, &order);
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let history = runtime.block_on(run.engine.history(&run.id)).unwrap();
        let workflow = run.engine.workflows().get("fan-out").unwrap();

        let mut executor = WorkflowExecutor::new(run.id.clone(), workflow, history);
        let replay = executor.start_with_events(vec![]).unwrap();

        prop_assert!(replay.calls.is_empty());
        prop_assert_eq!(replay.result, run.result);
        prop_assert_eq!(executor.next_seq() as usize, order.len());
    }
}
