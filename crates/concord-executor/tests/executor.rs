use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use concord_bus::{EventBus, HistoryQuery};
use concord_choreography::{ChoreographyEngine, ExecutionOptions};
use concord_executor::{
    capability_handler, CancelToken, CapabilityDispatcher, ExecutorConfig, ValueMap,
    WorkflowExecutor,
};
use concord_types::{
    ConcordError, ConditionOperator, ErrorHandler, ErrorHandlerKind, EventType,
    ExecutionCondition, ExecutionState, OnErrorPolicy, RetryPolicy, RollbackStatus, Step,
    StepState, Workflow, WorkflowId,
};

struct Harness {
    engine: Arc<ChoreographyEngine>,
    bus: Arc<EventBus>,
    dispatcher: Arc<CapabilityDispatcher>,
    executor: WorkflowExecutor,
}

fn harness() -> Harness {
    harness_with(ExecutorConfig::default())
}

fn harness_with(config: ExecutorConfig) -> Harness {
    let engine = Arc::new(ChoreographyEngine::new());
    let bus = Arc::new(EventBus::default());
    let dispatcher = Arc::new(CapabilityDispatcher::new());
    let executor =
        WorkflowExecutor::new(engine.clone(), bus.clone(), dispatcher.clone(), config);
    Harness { engine, bus, dispatcher, executor }
}

fn outputs(pairs: &[(&str, serde_json::Value)]) -> ValueMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

async fn register_ok(h: &Harness, agent: &str, capability: &str, out_key: &str) {
    let key = out_key.to_string();
    h.dispatcher
        .register(
            agent,
            capability,
            capability_handler(move |_| {
                let key = key.clone();
                async move { Ok(outputs(&[(&key, json!("done"))])) }
            }),
        )
        .await;
}

async fn run(h: &Harness, workflow: Workflow) -> concord_types::WorkflowExecution {
    let workflow_id = workflow.id.clone();
    h.engine.define_workflow(workflow).await.unwrap();
    let execution_id = h
        .engine
        .create_execution(&workflow_id, ExecutionOptions::default())
        .await
        .unwrap();
    h.executor.execute(&execution_id, CancelToken::new()).await.unwrap()
}

#[tokio::test]
async fn test_parallel_steps_then_dependent() {
    let h = harness();
    register_ok(&h, "atlas-1", "profile.fetch", "profile").await;
    register_ok(&h, "guardian-1", "kyc.check", "verdict").await;
    register_ok(&h, "weaver-1", "report.compose", "report").await;

    let workflow = Workflow::new("wf-par", "parallel", vec![
        Step::new("a", "atlas-1", "profile.fetch"),
        Step::new("b", "guardian-1", "kyc.check"),
        Step::new("c", "weaver-1", "report.compose").depends_on("a").depends_on("b"),
    ]);

    let execution = run(&h, workflow).await;
    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.context.step_outputs.len(), 3);

    // Event order: started, then A and B in either order, then C, then completed
    let events = h
        .bus
        .history(&HistoryQuery {
            workflow_id: Some(WorkflowId::new("wf-par")),
            ..Default::default()
        })
        .await;
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(types[0], EventType::WorkflowStarted);
    assert_eq!(types[1], EventType::WorkflowStepCompleted);
    assert_eq!(types[2], EventType::WorkflowStepCompleted);
    assert_eq!(types[3], EventType::WorkflowStepCompleted);
    assert_eq!(types[4], EventType::WorkflowCompleted);
    assert_eq!(events.len(), 5);

    let first_two: Vec<String> = events[1..3]
        .iter()
        .map(|e| e.payload["step_id"].as_str().unwrap().to_string())
        .collect();
    assert!(first_two.contains(&"a".to_string()));
    assert!(first_two.contains(&"b".to_string()));
    assert_eq!(events[3].payload["step_id"], json!("c"));
}

#[tokio::test]
async fn test_conditional_step_skipped_without_invocation() {
    let h = harness();
    register_ok(&h, "atlas-1", "profile.fetch", "profile").await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    h.dispatcher
        .register(
            "guardian-1",
            "escalate",
            capability_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(ValueMap::new()) }
            }),
        )
        .await;

    let mut gated = Step::new("d", "guardian-1", "escalate");
    gated.condition = Some(ExecutionCondition::Comparison {
        variable: "flag".into(),
        operator: ConditionOperator::Eq,
        value: json!(true),
    });

    let workflow = Workflow::new("wf-cond", "conditional", vec![
        Step::new("a", "atlas-1", "profile.fetch"),
        gated,
    ])
    .with_input("flag", json!(false));

    let execution = run(&h, workflow).await;
    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.step(&"d".into()).unwrap().state, StepState::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rollback_on_permanent_failure() {
    let h = harness();
    register_ok(&h, "atlas-1", "ledger.post", "entry").await;
    h.dispatcher
        .register(
            "guardian-1",
            "ledger.settle",
            capability_handler(|_| async {
                Err(ConcordError::permanent("settlement refused"))
            }),
        )
        .await;

    let rollbacks = Arc::new(AtomicU32::new(0));
    let counter = rollbacks.clone();
    h.dispatcher
        .register(
            "atlas-1",
            "ledger.post_rollback",
            capability_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(ValueMap::new()) }
            }),
        )
        .await;

    let workflow = Workflow::new("wf-rb", "rollback", vec![
        Step::new("x", "atlas-1", "ledger.post"),
        Step::new("y", "guardian-1", "ledger.settle").depends_on("x"),
    ])
    .with_on_error(OnErrorPolicy::Rollback);

    let execution = run(&h, workflow).await;
    assert_eq!(execution.state, ExecutionState::RolledBack);
    assert_eq!(execution.step(&"y".into()).unwrap().state, StepState::Failed);

    assert_eq!(execution.rollback_log.len(), 1);
    let entry = &execution.rollback_log[0];
    assert_eq!(entry.step_id.as_str(), "x");
    assert_eq!(entry.rollback_capability.as_str(), "ledger.post_rollback");
    assert_eq!(entry.status, RollbackStatus::Executed);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);

    // workflow:failed is the final event for the execution
    let events = h
        .bus
        .history(&HistoryQuery { workflow_id: Some(WorkflowId::new("wf-rb")), ..Default::default() })
        .await;
    assert_eq!(events.last().unwrap().event_type, EventType::WorkflowFailed);
}

#[tokio::test]
async fn test_retry_backoff_then_success() {
    let h = harness();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    h.dispatcher
        .register(
            "bridge-1",
            "relay.send",
            capability_handler(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ConcordError::transient("link flapped"))
                    } else {
                        Ok(ValueMap::new())
                    }
                }
            }),
        )
        .await;

    let mut step = Step::new("send", "bridge-1", "relay.send");
    step.retry_policy = Some(RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(1),
    });

    let started = std::time::Instant::now();
    let execution = run(&h, Workflow::new("wf-retry", "retry", vec![step])).await;

    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(execution.step(&"send".into()).unwrap().retry_count, 2);
    // 10ms + 20ms of backoff at minimum
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let h = harness();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    h.dispatcher
        .register(
            "bridge-1",
            "relay.send",
            capability_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(ConcordError::permanent("no such peer")) }
            }),
        )
        .await;

    let mut step = Step::new("send", "bridge-1", "relay.send");
    step.retry_policy = Some(RetryPolicy {
        max_attempts: 5,
        delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
        max_delay: Duration::from_millis(1),
    });

    let execution = run(&h, Workflow::new("wf-perm", "permanent", vec![step])).await;
    assert_eq!(execution.state, ExecutionState::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_skip_handler_treats_failure_as_success() {
    let h = harness();
    h.dispatcher
        .register(
            "prism-1",
            "metrics.enrich",
            capability_handler(|_| async { Err(ConcordError::permanent("model offline")) }),
        )
        .await;
    register_ok(&h, "weaver-1", "report.compose", "report").await;

    let mut optional = Step::new("enrich", "prism-1", "metrics.enrich");
    optional.error_handler = Some(ErrorHandler {
        kind: ErrorHandlerKind::Skip,
        action: None,
        params: Default::default(),
    });

    let workflow = Workflow::new("wf-skip", "skip", vec![
        optional,
        Step::new("compose", "weaver-1", "report.compose"),
    ]);

    let execution = run(&h, workflow).await;
    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.step(&"enrich".into()).unwrap().state, StepState::Skipped);
    assert_eq!(execution.step(&"compose".into()).unwrap().state, StepState::Completed);
}

#[tokio::test]
async fn test_fallback_handler_substitutes_outputs() {
    let h = harness();
    h.dispatcher
        .register(
            "prism-1",
            "score.model",
            capability_handler(|_| async { Err(ConcordError::permanent("model offline")) }),
        )
        .await;
    h.dispatcher
        .register(
            "prism-1",
            "score.baseline",
            capability_handler(|_| async { Ok(outputs(&[("score", json!(50))])) }),
        )
        .await;

    let mut primary = Step::new("score", "prism-1", "score.model");
    primary.error_handler = Some(ErrorHandler {
        kind: ErrorHandlerKind::Fallback,
        action: Some("baseline".into()),
        params: Default::default(),
    });
    let mut fallback = Step::new("baseline", "prism-1", "score.baseline");
    // Gate the fallback so it never self-schedules
    fallback.condition = Some(ExecutionCondition::Comparison {
        variable: "use_baseline".into(),
        operator: ConditionOperator::Eq,
        value: json!(true),
    });

    let execution = run(&h, Workflow::new("wf-fb", "fallback", vec![primary, fallback])).await;
    assert_eq!(execution.state, ExecutionState::Completed);

    let record = execution.step(&"score".into()).unwrap();
    assert_eq!(record.state, StepState::Completed);
    assert_eq!(record.outputs.as_ref().unwrap()["score"], json!(50));
}

#[tokio::test]
async fn test_deadlock_when_dependency_failed_under_continue() {
    let h = harness();
    h.dispatcher
        .register(
            "guardian-1",
            "kyc.check",
            capability_handler(|_| async { Err(ConcordError::permanent("rejected")) }),
        )
        .await;
    register_ok(&h, "atlas-1", "profile.fetch", "profile").await;
    register_ok(&h, "weaver-1", "report.compose", "report").await;

    let workflow = Workflow::new("wf-cont", "continue", vec![
        Step::new("check", "guardian-1", "kyc.check"),
        Step::new("fetch", "atlas-1", "profile.fetch"),
        Step::new("compose", "weaver-1", "report.compose").depends_on("check"),
    ])
    .with_on_error(OnErrorPolicy::Continue);

    let execution = run(&h, workflow).await;

    // The independent branch finished; the dependent could never start
    assert_eq!(execution.state, ExecutionState::Failed);
    assert!(execution.error.as_ref().unwrap().contains("deadlocked"));
    assert_eq!(execution.step(&"fetch".into()).unwrap().state, StepState::Completed);
    assert_eq!(execution.step(&"compose".into()).unwrap().state, StepState::Pending);
}

#[tokio::test]
async fn test_step_timeout_counts_as_transient() {
    let h = harness();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    h.dispatcher
        .register(
            "bridge-1",
            "relay.send",
            capability_handler(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok(ValueMap::new())
                }
            }),
        )
        .await;

    let mut step = Step::new("send", "bridge-1", "relay.send");
    step.timeout = Some(Duration::from_millis(50));
    step.retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        delay: Duration::from_millis(5),
        backoff_multiplier: 1.0,
        max_delay: Duration::from_millis(5),
    });

    let execution = run(&h, Workflow::new("wf-to", "timeout", vec![step])).await;
    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancellation_fails_execution() {
    let h = harness();
    h.dispatcher
        .register(
            "bridge-1",
            "relay.send",
            capability_handler(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ValueMap::new())
            }),
        )
        .await;

    h.engine
        .define_workflow(Workflow::new("wf-cancel", "cancel", vec![
            Step::new("send", "bridge-1", "relay.send"),
        ]))
        .await
        .unwrap();
    let execution_id = h
        .engine
        .create_execution(&WorkflowId::new("wf-cancel"), ExecutionOptions::default())
        .await
        .unwrap();

    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let execution = h.executor.execute(&execution_id, token).await.unwrap();
    assert_eq!(execution.state, ExecutionState::Failed);
    assert!(execution.error.as_ref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn test_capacity_admission() {
    let h = harness_with(ExecutorConfig { max_concurrent_workflows: 0, ..Default::default() });
    h.engine
        .define_workflow(Workflow::new("wf-cap", "capacity", vec![
            Step::new("a", "atlas-1", "profile.fetch"),
        ]))
        .await
        .unwrap();
    let execution_id = h
        .engine
        .create_execution(&WorkflowId::new("wf-cap"), ExecutionOptions::default())
        .await
        .unwrap();

    let err = h.executor.execute(&execution_id, CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, ConcordError::CapacityExceeded { limit: 0 }));
}

#[tokio::test]
async fn test_variable_substitution_flows_between_steps() {
    let h = harness();
    h.dispatcher
        .register(
            "atlas-1",
            "profile.fetch",
            capability_handler(|_| async { Ok(outputs(&[("did", json!("did:concord:alice"))])) }),
        )
        .await;
    h.dispatcher
        .register(
            "guardian-1",
            "kyc.check",
            capability_handler(|inputs| async move {
                assert_eq!(inputs["subject"], json!("did:concord:alice"));
                assert_eq!(inputs["region"], json!("eu-west"));
                Ok(outputs(&[("verdict", json!("pass"))]))
            }),
        )
        .await;

    let workflow = Workflow::new("wf-vars", "substitution", vec![
        Step::new("fetch", "atlas-1", "profile.fetch"),
        Step::new("check", "guardian-1", "kyc.check")
            .depends_on("fetch")
            .with_input("subject", json!("${did}"))
            .with_input("region", json!("${region}")),
    ])
    .with_input("region", json!("eu-west"));

    let execution = run(&h, workflow).await;
    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(
        execution.context.step_outputs[&"check".into()]["verdict"],
        json!("pass")
    );
}
