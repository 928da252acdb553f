//! Event bus: topic handlers plus a broadcast stream of every envelope

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::EventEnvelope;

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives events published on the topics it is subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "anonymous"
    }
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        (self.f)(envelope)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Outcome of the handlers of one `publish` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: &'static str,
    /// Handlers that returned `Ok`
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
    /// Stream receivers the envelope was broadcast to
    pub stream_receivers: usize,
}

/// Handler tasks started by one `publish` call.
///
/// Dropping it leaves the handlers running; failures are still logged.
#[derive(Debug)]
pub struct Publication {
    pub topic: &'static str,
    /// Handler tasks spawned
    pub dispatched: usize,
    /// Stream receivers the envelope was broadcast to
    pub stream_receivers: usize,
    report: JoinHandle<DeliveryReport>,
}

impl Publication {
    /// Wait until every handler has finished.
    pub async fn report(self) -> DeliveryReport {
        match self.report.await {
            Ok(report) => report,
            Err(_) => DeliveryReport {
                topic: self.topic,
                delivered: 0,
                failed: self.dispatched,
                stream_receivers: self.stream_receivers,
            },
        }
    }
}

/// Best-effort event bus. Nothing is queued for handlers that subscribe later.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    handlers: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    next_subscription: Arc<AtomicU64>,
    /// Number of events published (for monitoring)
    event_count: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with specified stream capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_subscription: Arc::new(AtomicU64::new(1)),
            event_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a handler for one topic
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let topic = topic.into();
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        debug!(topic = %topic, handler = handler.name(), "Event handler subscribed");
        self.handlers
            .write()
            .entry(topic)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Register a synchronous closure for one topic
    pub fn subscribe_fn<F>(
        &self,
        topic: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(
            topic,
            Arc::new(FnHandler {
                name: name.into(),
                f,
            }),
        )
    }

    /// Remove a handler. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        handlers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Subscribe to the stream of every published envelope.
    ///
    /// Events published before subscribing will not be received.
    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish an event to the handlers of its topic and to stream receivers.
    ///
    /// Each handler runs in its own task and `publish` returns without
    /// waiting for any of them. A handler that errors or panics is logged and
    /// counted as failed; the other handlers still receive the event.
    pub fn publish(&self, envelope: EventEnvelope) -> Publication {
        self.event_count.fetch_add(1, Ordering::Relaxed);
        let topic = envelope.topic();
        let stream_receivers = self.sender.send(envelope.clone()).unwrap_or(0);

        // Snapshot so handlers added during delivery do not see this event
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .get(topic)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();
        let dispatched = handlers.len();

        let envelope = Arc::new(envelope);
        let tasks: Vec<(String, JoinHandle<Result<(), HandlerError>>)> = handlers
            .into_iter()
            .map(|handler| {
                let name = handler.name().to_string();
                let envelope = Arc::clone(&envelope);
                (
                    name,
                    tokio::spawn(async move { handler.handle(&envelope).await }),
                )
            })
            .collect();

        let report = tokio::spawn(async move {
            let (names, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
            let mut report = DeliveryReport {
                topic,
                delivered: 0,
                failed: 0,
                stream_receivers,
            };
            for (name, outcome) in names.into_iter().zip(join_all(handles).await) {
                match outcome {
                    Ok(Ok(())) => report.delivered += 1,
                    Ok(Err(e)) => {
                        report.failed += 1;
                        warn!(topic, handler = %name, error = %e, "Event handler failed");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(topic, handler = %name, error = %e, "Event handler panicked");
                    }
                }
            }
            debug!(
                topic,
                delivered = report.delivered,
                failed = report.failed,
                "Event delivered"
            );
            report
        });

        Publication {
            topic,
            dispatched,
            stream_receivers,
            report,
        }
    }

    /// Number of handlers registered for a topic
    pub fn handler_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map_or(0, Vec::len)
    }

    /// Get the number of current stream subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> usize {
        self.event_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn completed() -> EventEnvelope {
        EventEnvelope::new(Event::ProjectCompleted {
            project_id: Uuid::new_v4(),
        })
    }

    fn counting_handler(bus: &EventBus, topic: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe_fn(topic, "counter", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        counter
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_topic_handlers_only() {
        let bus = EventBus::new();
        let on_topic = counting_handler(&bus, "project.completed");
        let off_topic = counting_handler(&bus, "project.failed");

        let report = bus.publish(completed()).report().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(on_topic.load(Ordering::SeqCst), 1);
        assert_eq!(off_topic.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        bus.subscribe_fn("project.completed", "failing", |_| {
            Err(HandlerError::new("nope"))
        });
        let counter = counting_handler(&bus, "project.completed");

        let report = bus.publish(completed()).report().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        bus.subscribe("project.completed", Arc::new(PanickingHandler));
        let counter = counting_handler(&bus, "project.completed");

        let report = bus.publish(completed()).report().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let bus = EventBus::new();
        bus.publish(completed()).report().await;

        let counter = counting_handler(&bus, "project.completed");
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        bus.publish(completed()).report().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe_fn("project.completed", "noop", |_| Ok(()));
        assert_eq!(bus.handler_count("project.completed"), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.handler_count("project.completed"), 0);

        let report = bus.publish(completed()).report().await;
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_stream_subscriber_receives_envelope() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        let envelope = completed();
        let report = bus.publish(envelope.clone()).report().await;
        assert_eq!(report.stream_receivers, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::new();
        let report = bus.publish(completed()).report().await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.stream_receivers, 0);
        assert_eq!(bus.event_count(), 1);
    }

    struct StalledHandler;

    #[async_trait]
    impl EventHandler for StalledHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_handlers() {
        let bus = EventBus::new();
        bus.subscribe("project.completed", Arc::new(StalledHandler));
        let counter = counting_handler(&bus, "project.completed");

        let publication = bus.publish(completed());
        assert_eq!(publication.dispatched, 2);

        // The fast handler still runs while the stalled one sleeps
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let report = tokio::time::timeout(std::time::Duration::from_millis(50), publication.report()).await;
        assert!(report.is_err(), "stalled handler cannot have finished");
    }

    #[test]
    fn test_clone_shares_handlers() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();

        bus2.subscribe_fn("phase.completed", "noop", |_| Ok(()));
        let _rx = bus2.subscribe_all();
        assert_eq!(bus1.handler_count("phase.completed"), 1);
        assert_eq!(bus1.subscriber_count(), 1);
    }
}
