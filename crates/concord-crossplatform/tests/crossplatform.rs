use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use concord_bus::EventBus;
use concord_crossplatform::{CrossPlatformAdapter, CrossPlatformConfig};
use concord_discovery::{AgentRegistration, DiscoveryQuery};
use concord_sentinel::{Sentinel, SentinelConfig};
use concord_types::{
    AgentId, ConcordError, Did, EmotionalState, SessionId,
};

fn registration(id: &str, caps: &[&str]) -> AgentRegistration {
    AgentRegistration {
        agent_id: AgentId::new(id),
        did: Did::new(format!("did:concord:{id}")),
        address: "10.0.0.1".into(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        metadata: HashMap::new(),
        endpoint: format!("https://agents.example/{id}"),
    }
}

async fn adapter() -> CrossPlatformAdapter {
    let bus = Arc::new(EventBus::default());
    let sentinel = Arc::new(Sentinel::new(SentinelConfig::default()));
    let adapter = CrossPlatformAdapter::new(CrossPlatformConfig::default(), bus, sentinel);

    adapter.register_agent(registration("bridge-1", &["relay"])).await.unwrap();
    adapter.register_agent(registration("guardian-1", &["scan"])).await.unwrap();
    adapter
}

#[tokio::test]
async fn test_connect_and_converse() {
    let adapter = adapter().await;
    let bridge = AgentId::new("bridge-1");
    let guardian = AgentId::new("guardian-1");

    let session = adapter.connect(&bridge, &guardian).await.unwrap();
    assert!(session.is_participant(&bridge));
    assert!(session.is_participant(&guardian));

    adapter
        .send_message(&session.id, &bridge, json!({"text": "threat report?"}), None)
        .await
        .unwrap();
    adapter
        .send_message(
            &session.id,
            &guardian,
            json!({"text": "all clear"}),
            Some(EmotionalState {
                label: "calm".into(),
                intensity: 0.2,
                observed_at: chrono::Utc::now(),
            }),
        )
        .await
        .unwrap();

    let messages = adapter.get_messages(&session.id, &bridge, None).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].from_agent, bridge);
    assert_eq!(messages[1].from_agent, guardian);
    // Replies address the other participant automatically
    assert_eq!(messages[1].to_agent, bridge);

    let states = adapter.context().get_emotional_states(&session.id).await;
    assert_eq!(states[&guardian].label, "calm");
}

#[tokio::test]
async fn test_outsider_cannot_use_session() {
    let adapter = adapter().await;
    adapter.register_agent(registration("weaver-1", &[])).await.unwrap();

    let session = adapter
        .connect(&AgentId::new("bridge-1"), &AgentId::new("guardian-1"))
        .await
        .unwrap();

    let err = adapter
        .send_message(&session.id, &AgentId::new("weaver-1"), json!("hi"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConcordError::InvalidArgument { .. }));

    let err = adapter
        .get_messages(&session.id, &AgentId::new("weaver-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConcordError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let adapter = adapter().await;
    let err = adapter
        .send_message(&SessionId::generate(), &AgentId::new("bridge-1"), json!("hi"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConcordError::NotFound { .. }));
}

#[tokio::test]
async fn test_connect_to_unregistered_target_fails() {
    let adapter = adapter().await;
    let err = adapter
        .connect(&AgentId::new("bridge-1"), &AgentId::new("ghost-9"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConcordError::NotFound { .. }));
}

#[tokio::test]
async fn test_discovery_through_adapter() {
    let adapter = adapter().await;

    let result = adapter
        .discover(&DiscoveryQuery { capabilities: vec!["relay".into()], ..Default::default() })
        .await;
    assert_eq!(result.total_count, 1);
    assert_eq!(result.agents[0].agent_id.as_str(), "bridge-1");
}

#[tokio::test]
async fn test_registration_is_idempotent_on_keys_only() {
    let adapter = adapter().await;

    // Same agent id again: key survives, discovery rejects the duplicate
    let err = adapter.register_agent(registration("bridge-1", &[])).await.unwrap_err();
    assert!(matches!(err, ConcordError::DuplicateId { .. }));

    // The original key still signs (a second connect works)
    adapter
        .connect(&AgentId::new("bridge-1"), &AgentId::new("guardian-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sweepers_start_and_stop() {
    let adapter = adapter().await;
    let guards = adapter.start_sweepers();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    drop(guards);
}
