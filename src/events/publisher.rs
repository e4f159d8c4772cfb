// src/events/publisher.rs
use arc_swap::ArcSwap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::{BackendLoad, EventSink, PublishedEvent, RoutingEvent, SinkError};
use crate::config::EventsConfig;
use crate::load_balancer::Strategy;
use crate::metrics::MetricsCollector;
use crate::registry::{BackendRegistry, Eligibility};
use crate::stats::StatsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    sink: Arc<dyn EventSink>,
    failures: u32,
}

struct FanOut {
    subscribers: Mutex<Vec<Subscriber>>,
    max_failures: u32,
    registry: Arc<BackendRegistry>,
    stats: Arc<StatsAggregator>,
    active: Arc<ArcSwap<Strategy>>,
}

impl FanOut {
    fn enrich(&self, event: RoutingEvent) -> PublishedEvent {
        let backends = self
            .registry
            .list(Eligibility::All)
            .iter()
            .map(|backend| {
                let load = self.stats.backend_load(&backend.id);
                BackendLoad {
                    backend_id: backend.id.clone(),
                    health: backend.health(),
                    active_connections: backend.active_connections(),
                    requests_per_sec: load.requests_per_sec,
                    avg_latency_ms: load.avg_latency_ms,
                }
            })
            .collect();

        // a selection is labelled with the strategy that made it, even if
        // a switch landed before the event was drained
        let strategy = match &event {
            RoutingEvent::SelectionMade { decision } => decision.strategy,
            _ => self.active.load().kind(),
        };

        PublishedEvent {
            kind: event.kind(),
            backend_ids: event.backend_ids(),
            timestamp: event.timestamp(),
            strategy,
            detail: event,
            backends,
        }
    }

    fn has_subscribers(&self) -> bool {
        !self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Enriches and delivers one event; returns what was delivered.
    fn handle(&self, event: RoutingEvent) -> Option<Arc<PublishedEvent>> {
        // load lookups walk every backend window, skip them with no audience
        if !self.has_subscribers() {
            return None;
        }
        let published = Arc::new(self.enrich(event));
        self.deliver(&published);
        Some(published)
    }

    fn deliver(&self, event: &Arc<PublishedEvent>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);

        subscribers.retain_mut(|subscriber| match deliver_one(subscriber.sink.as_ref(), event) {
            Ok(()) => {
                subscriber.failures = 0;
                true
            }
            Err(e) => {
                subscriber.failures += 1;
                if subscriber.failures >= self.max_failures {
                    warn!(
                        subscriber = subscriber.sink.name(),
                        failures = subscriber.failures,
                        error = %e,
                        "Dropping event subscriber after repeated delivery failures"
                    );
                    false
                } else {
                    debug!(subscriber = subscriber.sink.name(), error = %e, "Event delivery failed");
                    true
                }
            }
        });
    }
}

/// A panicking sink counts as a failed delivery so it cannot take the
/// fan-out task down with it.
fn deliver_one(sink: &dyn EventSink, event: &Arc<PublishedEvent>) -> Result<(), SinkError> {
    panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(event)))
        .unwrap_or(Err(SinkError::Panicked))
}

/// Fans routing events out to subscribers off the request path.
///
/// Must be created inside a tokio runtime: construction spawns the
/// delivery task, which exits once the publisher is dropped.
pub struct EventPublisher {
    tx: mpsc::Sender<RoutingEvent>,
    fan_out: Arc<FanOut>,
    next_id: AtomicU64,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EventPublisher {
    pub fn spawn(
        config: &EventsConfig,
        registry: Arc<BackendRegistry>,
        stats: Arc<StatsAggregator>,
        active: Arc<ArcSwap<Strategy>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<RoutingEvent>(config.queue_capacity.max(1));
        let fan_out = Arc::new(FanOut {
            subscribers: Mutex::new(Vec::new()),
            max_failures: config.max_delivery_failures.max(1),
            registry,
            stats,
            active,
        });

        let worker = fan_out.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker.handle(event);
            }
            debug!("Event publisher stopped");
        });

        Self {
            tx,
            fan_out,
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Enqueues an event without waiting. Events are dropped when the
    /// queue is full.
    pub fn publish(&self, event: RoutingEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(kind = ?event.kind(), "Event queue full, dropping event");
                if let Some(metrics) = &self.metrics {
                    metrics.events_dropped_total.inc();
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event publisher task has stopped");
            }
        }
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(subscriber = sink.name(), "Event subscriber added");
        self.fan_out
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                sink,
                failures: 0,
            });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .fan_out
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.fan_out
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendSpec, StatsConfig, StrategyKind};
    use crate::events::{ChannelSink, EventKind, SinkError};
    use crate::health::HealthStatus;
    use crate::registry::Backend;
    use crate::router::RoutingDecision;
    use chrono::Utc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use url::Url;

    struct BrokenSink {
        attempts: Arc<AtomicU32>,
    }

    impl EventSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        fn deliver(&self, _event: &Arc<PublishedEvent>) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Failed("socket reset".into()))
        }
    }

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        fn deliver(&self, _event: &Arc<PublishedEvent>) -> Result<(), SinkError> {
            panic!("sink bug");
        }
    }

    fn publisher(max_failures: u32) -> EventPublisher {
        let registry = Arc::new(BackendRegistry::new());
        registry
            .register(BackendSpec::new("a", Url::parse("http://127.0.0.1:5001").unwrap()))
            .unwrap();
        let config = EventsConfig {
            max_delivery_failures: max_failures,
            ..EventsConfig::default()
        };
        EventPublisher::spawn(
            &config,
            registry,
            Arc::new(StatsAggregator::new(StatsConfig::default())),
            Arc::new(ArcSwap::from_pointee(Strategy::new(StrategyKind::Weighted))),
            None,
        )
    }

    fn health_event() -> RoutingEvent {
        RoutingEvent::HealthChanged {
            backend_id: "a".into(),
            from: HealthStatus::Healthy,
            to: HealthStatus::Degraded,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_reach_subscribers_with_backend_load() {
        let publisher = publisher(3);
        let (sink, mut rx) = ChannelSink::new("dashboard", 8);
        publisher.subscribe(Arc::new(sink));

        publisher.publish(health_event());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::HealthChanged);
        assert_eq!(event.backend_ids, vec!["a".to_string()]);
        assert_eq!(event.strategy, StrategyKind::Weighted);
        assert_eq!(event.backends.len(), 1);
        assert_eq!(event.backends[0].active_connections, 0);
    }

    #[tokio::test]
    async fn test_broken_subscriber_dropped_after_repeated_failures() {
        let publisher = publisher(2);
        let attempts = Arc::new(AtomicU32::new(0));
        publisher.subscribe(Arc::new(BrokenSink {
            attempts: attempts.clone(),
        }));
        let (sink, mut rx) = ChannelSink::new("healthy", 8);
        publisher.subscribe(Arc::new(sink));

        for _ in 0..4 {
            publisher.publish(health_event());
        }
        for _ in 0..4 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_starve_others() {
        let publisher = publisher(2);
        publisher.subscribe(Arc::new(PanickingSink));
        let (sink, mut rx) = ChannelSink::new("healthy", 8);
        publisher.subscribe(Arc::new(sink));

        for _ in 0..3 {
            publisher.publish(health_event());
        }
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.kind, EventKind::HealthChanged);
        }

        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_selection_keeps_strategy_that_made_it() {
        let publisher = publisher(3);
        let (sink, mut rx) = ChannelSink::new("dashboard", 8);
        publisher.subscribe(Arc::new(sink));

        let backend = Backend::new(
            BackendSpec::new("a", Url::parse("http://127.0.0.1:5001").unwrap()),
            0,
        );
        let decision = RoutingDecision::new(&backend, StrategyKind::RoundRobin, "/", None, 0);
        publisher.publish(RoutingEvent::SelectionMade { decision });

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::SelectionMade);
        assert_eq!(event.strategy, StrategyKind::RoundRobin);
    }

    #[tokio::test]
    async fn test_events_without_subscribers_are_not_enriched() {
        let publisher = publisher(3);
        assert!(publisher.fan_out.handle(health_event()).is_none());

        let (sink, _rx) = ChannelSink::new("dashboard", 8);
        publisher.subscribe(Arc::new(sink));
        let published = publisher.fan_out.handle(health_event()).unwrap();
        assert_eq!(published.backends.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_subscriber_is_dropped() {
        let publisher = publisher(1);
        let (sink, rx) = ChannelSink::new("gone", 8);
        publisher.subscribe(Arc::new(sink));
        drop(rx);

        publisher.publish(health_event());
        for _ in 0..50 {
            if publisher.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let publisher = publisher(3);
        let (sink, _rx) = ChannelSink::new("dashboard", 8);
        let id = publisher.subscribe(Arc::new(sink));
        assert!(publisher.unsubscribe(id));
        assert!(!publisher.unsubscribe(id));
    }
}
