use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use concord_bus::{HistoryQuery, SubscriptionFilter};
use concord_executor::{capability_handler, ValueMap};
use concord_maestro::{Maestro, MaestroConfig};
use concord_types::{
    Agent, AgentId, AgentKind, AgentStatus, Capability, EventType, ExecutionState, HealthKind,
    Step, Workflow, WorkflowId,
};

fn agent(id: &str, kind: AgentKind, capability: &str) -> Agent {
    Agent::new(id, kind, "aabb", vec![Capability::new(capability, capability)])
}

fn outputs(pairs: &[(&str, serde_json::Value)]) -> ValueMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

async fn onboarding_maestro() -> Maestro {
    let maestro = Maestro::default();

    maestro
        .register_agent(agent("atlas-1", AgentKind::Atlas, "profile.fetch"))
        .await
        .unwrap();
    maestro
        .register_agent(agent("guardian-1", AgentKind::Guardian, "kyc.check"))
        .await
        .unwrap();
    maestro
        .register_agent(agent("weaver-1", AgentKind::Weaver, "report.compose"))
        .await
        .unwrap();

    maestro
        .register_capability_handler(
            "atlas-1",
            "profile.fetch",
            capability_handler(|_| async { Ok(outputs(&[("did", json!("did:concord:alice"))])) }),
        )
        .await;
    maestro
        .register_capability_handler(
            "guardian-1",
            "kyc.check",
            capability_handler(|_| async { Ok(outputs(&[("verdict", json!("pass"))])) }),
        )
        .await;
    maestro
        .register_capability_handler(
            "weaver-1",
            "report.compose",
            capability_handler(|inputs| async move {
                assert_eq!(inputs["subject"], json!("did:concord:alice"));
                Ok(outputs(&[("report", json!("ready"))]))
            }),
        )
        .await;

    maestro
        .define_workflow(Workflow::new("wf-onboard", "Onboarding", vec![
            Step::new("fetch", "atlas-1", "profile.fetch"),
            Step::new("check", "guardian-1", "kyc.check"),
            Step::new("compose", "weaver-1", "report.compose")
                .depends_on("fetch")
                .depends_on("check")
                .with_input("subject", json!("${did}")),
        ]))
        .await
        .unwrap();

    maestro
}

#[tokio::test]
async fn test_end_to_end_workflow_with_events() {
    let maestro = onboarding_maestro().await;

    let seen: Arc<std::sync::Mutex<Vec<EventType>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    maestro
        .bus()
        .subscribe(
            SubscriptionFilter { workflow_id: Some(WorkflowId::new("wf-onboard")), ..Default::default() },
            concord_bus::handler(move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(event.event_type);
                    Ok(())
                }
            }),
        )
        .await;

    let execution = maestro
        .execute_workflow(&WorkflowId::new("wf-onboard"), HashMap::new())
        .await
        .unwrap();

    assert_eq!(execution.state, ExecutionState::Completed);
    assert_eq!(execution.context.step_outputs.len(), 3);
    assert_eq!(execution.context.step_outputs[&"compose".into()]["report"], json!("ready"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&EventType::WorkflowStarted));
    assert_eq!(seen.last(), Some(&EventType::WorkflowCompleted));
    assert_eq!(
        seen.iter().filter(|t| **t == EventType::WorkflowStepCompleted).count(),
        3
    );
}

#[tokio::test]
async fn test_agent_lifecycle_events() {
    let maestro = Maestro::default();
    maestro
        .register_agent(agent("bridge-1", AgentKind::Bridge, "relay.send"))
        .await
        .unwrap();
    maestro
        .record_health(&AgentId::new("bridge-1"), HealthKind::Degraded, Some("lag".into()))
        .await
        .unwrap();

    assert_eq!(
        maestro.registry().get(&AgentId::new("bridge-1")).await.unwrap().status,
        AgentStatus::Degraded
    );

    maestro.deregister_agent(&AgentId::new("bridge-1")).await.unwrap();

    let history = maestro.bus().history(&HistoryQuery::default()).await;
    let types: Vec<EventType> = history.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![EventType::AgentRegistered, EventType::AgentHealth, EventType::AgentDeregistered]
    );
}

#[tokio::test]
async fn test_cancel_in_flight_execution() {
    let maestro = Maestro::default();
    maestro
        .register_agent(agent("bridge-1", AgentKind::Bridge, "relay.send"))
        .await
        .unwrap();
    maestro
        .register_capability_handler(
            "bridge-1",
            "relay.send",
            capability_handler(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ValueMap::new())
            }),
        )
        .await;
    maestro
        .define_workflow(Workflow::new("wf-slow", "Slow", vec![
            Step::new("send", "bridge-1", "relay.send"),
        ]))
        .await
        .unwrap();

    let maestro = Arc::new(maestro);
    let runner = maestro.clone();
    let handle = tokio::spawn(async move {
        runner.execute_workflow(&WorkflowId::new("wf-slow"), HashMap::new()).await
    });

    // Find the in-flight execution and cancel it
    tokio::time::sleep(Duration::from_millis(50)).await;
    let executions = maestro.executions_for_workflow(&WorkflowId::new("wf-slow")).await;
    assert_eq!(executions.len(), 1);
    maestro.cancel_execution(&executions[0].id).await.unwrap();

    let execution = handle.await.unwrap().unwrap();
    assert_eq!(execution.state, ExecutionState::Failed);
    assert!(execution.error.as_ref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn test_pause_and_resume() {
    let maestro = Arc::new(onboarding_maestro().await);

    let runner = maestro.clone();
    let handle = tokio::spawn(async move {
        // Slow first step gives the test a window to pause
        runner
            .register_capability_handler(
                "atlas-1",
                "profile.fetch",
                capability_handler(|_| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(outputs(&[("did", json!("did:concord:alice"))]))
                }),
            )
            .await;
        runner.execute_workflow(&WorkflowId::new("wf-onboard"), HashMap::new()).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let executions = maestro.executions_for_workflow(&WorkflowId::new("wf-onboard")).await;
    assert_eq!(executions.len(), 1);
    let execution_id = executions[0].id.clone();

    maestro.pause_execution(&execution_id).await.unwrap();
    assert_eq!(
        maestro.execution(&execution_id).await.unwrap().state,
        ExecutionState::Paused
    );

    maestro.resume_execution(&execution_id).await.unwrap();
    let execution = handle.await.unwrap().unwrap();
    assert_eq!(execution.state, ExecutionState::Completed);

    let history = maestro
        .bus()
        .history(&HistoryQuery {
            types: vec![EventType::WorkflowPaused, EventType::WorkflowResumed],
            ..Default::default()
        })
        .await;
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_status_aggregation() {
    let maestro = onboarding_maestro().await;
    maestro
        .execute_workflow(&WorkflowId::new("wf-onboard"), HashMap::new())
        .await
        .unwrap();

    let status = maestro.status().await;
    assert_eq!(status.registry.total_agents, 3);
    assert_eq!(status.choreography.total_workflows, 1);
    assert_eq!(status.choreography.executions_by_state["completed"], 1);
    assert_eq!(status.active_executions, 0);
}
