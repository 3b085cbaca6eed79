//! Concord Bus - In-process pub/sub with a bounded history ring
//!
//! Publish appends to the history ring synchronously, then hands the event
//! to every matching subscription. Each subscription owns a dedicated
//! delivery task fed by an ordered channel, which gives:
//!
//! - per-subscriber FIFO with respect to publish order
//! - isolation: a failing subscriber neither blocks its peers nor
//!   propagates to the publisher
//!
//! Delivery order *between* subscribers is unspecified. Paused
//! subscriptions drop events published while paused; the history ring
//! remains available for catch-up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use concord_types::{
    AgentId, ConcordError, CorrelationId, Event, EventType, Result, SubscriptionId, WorkflowId,
};

/// Options for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Capacity of the history ring
    pub buffer_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { buffer_size: 10_000 }
    }
}

/// Async subscriber callback
///
/// Subscribers must tolerate redelivery; the bus does not deduplicate.
pub type EventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`]
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Subscription filter: intersection of every provided field
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Event must be one of these types (empty = any)
    pub types: HashSet<EventType>,
    /// Event must name this agent as source or target
    pub agent_id: Option<AgentId>,
    /// Event must belong to this workflow
    pub workflow_id: Option<WorkflowId>,
}

impl SubscriptionFilter {
    /// Filter on types alone
    pub fn for_types(types: impl IntoIterator<Item = EventType>) -> Self {
        Self { types: types.into_iter().collect(), ..Default::default() }
    }

    fn matches(&self, event: &Event) -> bool {
        if !self.types.is_empty() && !self.types.contains(&event.event_type) {
            return false;
        }
        if let Some(agent_id) = &self.agent_id {
            if !event.involves_agent(agent_id) {
                return false;
            }
        }
        if let Some(workflow_id) = &self.workflow_id {
            if event.workflow_id.as_ref() != Some(workflow_id) {
                return false;
            }
        }
        true
    }
}

/// History query; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub types: Vec<EventType>,
    pub source_agent: Option<AgentId>,
    pub workflow_id: Option<WorkflowId>,
    pub correlation_id: Option<CorrelationId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Aggregate bus statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStatistics {
    pub history_len: usize,
    pub subscriptions: usize,
    pub paused_subscriptions: usize,
    pub published_total: u64,
}

struct SubscriptionEntry {
    filter: SubscriptionFilter,
    paused: bool,
    sender: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct BusState {
    history: VecDeque<Event>,
    subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
    published_total: u64,
}

/// In-process event bus
pub struct EventBus {
    config: EventBusConfig,
    state: RwLock<BusState>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self { config, state: RwLock::new(BusState::default()) }
    }

    /// Register a subscriber; returns its subscription id
    ///
    /// The handler runs on a dedicated task; handler errors are logged and
    /// never reach the publisher.
    pub async fn subscribe(&self, filter: SubscriptionFilter, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::generate();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();

        let task_id = id.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = handler(event.clone()).await {
                    warn!(
                        subscription = %task_id,
                        event_id = %event.id,
                        error = %e,
                        "subscriber callback failed"
                    );
                }
            }
        });

        let mut state = self.state.write().await;
        state
            .subscriptions
            .insert(id.clone(), SubscriptionEntry { filter, paused: false, sender });
        debug!(subscription = %id, "subscriber registered");
        id
    }

    /// Drop a subscription; its delivery task drains and exits
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ConcordError::not_found("subscription", id.as_str()))
    }

    /// Stop delivering to a subscription without dropping it
    pub async fn pause(&self, id: &SubscriptionId) -> Result<()> {
        self.set_paused(id, true).await
    }

    /// Resume delivery to a paused subscription
    pub async fn resume(&self, id: &SubscriptionId) -> Result<()> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: &SubscriptionId, paused: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| ConcordError::not_found("subscription", id.as_str()))?;
        entry.paused = paused;
        Ok(())
    }

    /// Publish an event: synchronous history append, then fan-out
    pub async fn publish(&self, event: Event) {
        let mut state = self.state.write().await;

        state.history.push_back(event.clone());
        while state.history.len() > self.config.buffer_size {
            state.history.pop_front();
        }
        state.published_total += 1;

        let mut dead: Vec<SubscriptionId> = Vec::new();
        for (id, entry) in &state.subscriptions {
            if entry.paused || !entry.filter.matches(&event) {
                continue;
            }
            if entry.sender.send(event.clone()).is_err() {
                dead.push(id.clone());
            }
        }
        for id in dead {
            state.subscriptions.remove(&id);
        }
    }

    /// Filtered history retrieval, oldest first
    pub async fn history(&self, query: &HistoryQuery) -> Vec<Event> {
        let state = self.state.read().await;
        let matching: Vec<Event> = state
            .history
            .iter()
            .filter(|e| query.types.is_empty() || query.types.contains(&e.event_type))
            .filter(|e| {
                query.source_agent.as_ref().map(|a| &e.source_agent == a).unwrap_or(true)
            })
            .filter(|e| {
                query.workflow_id.as_ref().map(|w| e.workflow_id.as_ref() == Some(w)).unwrap_or(true)
            })
            .filter(|e| {
                query
                    .correlation_id
                    .as_ref()
                    .map(|c| &e.correlation_id == c)
                    .unwrap_or(true)
            })
            .filter(|e| query.since.map(|since| e.created_at >= since).unwrap_or(true))
            .cloned()
            .collect();

        match query.limit {
            Some(limit) if matching.len() > limit => {
                matching[matching.len() - limit..].to_vec()
            }
            _ => matching,
        }
    }

    /// Aggregate statistics
    pub async fn statistics(&self) -> BusStatistics {
        let state = self.state.read().await;
        BusStatistics {
            history_len: state.history.len(),
            subscriptions: state.subscriptions.len(),
            paused_subscriptions: state.subscriptions.values().filter(|s| s.paused).count(),
            published_total: state.published_total,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn collector() -> (Arc<Mutex<Vec<Event>>>, EventHandler) {
        let seen: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = handler(move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event);
                Ok(())
            }
        });
        (seen, handler)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_type_filtering_and_fifo() {
        let bus = EventBus::default();
        let (seen, handler) = collector();
        bus.subscribe(
            SubscriptionFilter::for_types([EventType::WorkflowStarted, EventType::WorkflowCompleted]),
            handler,
        )
        .await;

        bus.publish(Event::new(EventType::WorkflowStarted, "maestro")).await;
        bus.publish(Event::new(EventType::AgentRegistered, "maestro")).await;
        bus.publish(Event::new(EventType::WorkflowCompleted, "maestro")).await;
        settle().await;

        let seen = seen.lock().unwrap();
        let types: Vec<EventType> = seen.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::WorkflowStarted, EventType::WorkflowCompleted]);
    }

    #[tokio::test]
    async fn test_agent_filter_matches_source_or_target() {
        let bus = EventBus::default();
        let (seen, handler) = collector();
        bus.subscribe(
            SubscriptionFilter { agent_id: Some(AgentId::new("guardian-1")), ..Default::default() },
            handler,
        )
        .await;

        bus.publish(Event::new(EventType::AgentEvent, "guardian-1")).await;
        bus.publish(Event::new(EventType::AgentEvent, "bridge-1").with_target("guardian-1")).await;
        bus.publish(Event::new(EventType::AgentEvent, "bridge-1")).await;
        settle().await;

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated() {
        let bus = EventBus::default();

        bus.subscribe(
            SubscriptionFilter::default(),
            handler(|_| async { Err(ConcordError::invalid("subscriber exploded")) }),
        )
        .await;
        let (seen, ok_handler) = collector();
        bus.subscribe(SubscriptionFilter::default(), ok_handler).await;

        bus.publish(Event::new(EventType::AgentEvent, "bridge-1")).await;
        settle().await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_drops_resume_restores() {
        let bus = EventBus::default();
        let (seen, handler) = collector();
        let sub = bus.subscribe(SubscriptionFilter::default(), handler).await;

        bus.publish(Event::new(EventType::AgentEvent, "a")).await;
        bus.pause(&sub).await.unwrap();
        bus.publish(Event::new(EventType::AgentEvent, "b")).await;
        bus.resume(&sub).await.unwrap();
        bus.publish(Event::new(EventType::AgentEvent, "c")).await;
        settle().await;

        let sources: Vec<String> =
            seen.lock().unwrap().iter().map(|e| e.source_agent.to_string()).collect();
        assert_eq!(sources, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_history_ring_bound_and_queries() {
        let bus = EventBus::new(EventBusConfig { buffer_size: 5 });
        for i in 0..8 {
            bus.publish(
                Event::new(EventType::AgentEvent, format!("agent-{i}"))
                    .with_payload(serde_json::json!(i)),
            )
            .await;
        }

        let all = bus.history(&HistoryQuery::default()).await;
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].payload, serde_json::json!(3));

        let limited = bus.history(&HistoryQuery { limit: Some(2), ..Default::default() }).await;
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].payload, serde_json::json!(7));

        let by_source = bus
            .history(&HistoryQuery {
                source_agent: Some(AgentId::new("agent-4")),
                ..Default::default()
            })
            .await;
        assert_eq!(by_source.len(), 1);
    }

    #[tokio::test]
    async fn test_history_by_correlation() {
        let bus = EventBus::default();
        let correlation = CorrelationId::generate();

        bus.publish(
            Event::new(EventType::WorkflowStarted, "maestro").with_correlation(correlation.clone()),
        )
        .await;
        bus.publish(Event::new(EventType::WorkflowStarted, "maestro")).await;

        let matched = bus
            .history(&HistoryQuery { correlation_id: Some(correlation), ..Default::default() })
            .await;
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::default();
        let (seen, handler) = collector();
        let sub = bus.subscribe(SubscriptionFilter::default(), handler).await;

        bus.unsubscribe(&sub).await.unwrap();
        bus.publish(Event::new(EventType::AgentEvent, "a")).await;
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(bus.unsubscribe(&sub).await.is_err());
    }
}
