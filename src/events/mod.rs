//! Change notifications for live dashboards.
//!
//! The router hands events to `EventPublisher::publish`, which only enqueues.
//! A separate task attaches current per-backend load and fans each event
//! out to the registered sinks, so a slow or broken subscriber can never
//! reach back into request handling.

mod publisher;
mod sink;

pub use publisher::{EventPublisher, SubscriptionId};
pub use sink::{ChannelSink, EventSink, LogSink, SinkError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::StrategyKind;
use crate::health::HealthStatus;
use crate::router::RoutingDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SelectionMade,
    HealthChanged,
    StrategyChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SelectionMade => "selection_made",
            EventKind::HealthChanged => "health_changed",
            EventKind::StrategyChanged => "strategy_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RoutingEvent {
    SelectionMade {
        decision: RoutingDecision,
    },
    HealthChanged {
        backend_id: String,
        from: HealthStatus,
        to: HealthStatus,
        at: DateTime<Utc>,
    },
    StrategyChanged {
        from: StrategyKind,
        to: StrategyKind,
        at: DateTime<Utc>,
    },
}

impl RoutingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RoutingEvent::SelectionMade { .. } => EventKind::SelectionMade,
            RoutingEvent::HealthChanged { .. } => EventKind::HealthChanged,
            RoutingEvent::StrategyChanged { .. } => EventKind::StrategyChanged,
        }
    }

    pub fn backend_ids(&self) -> Vec<String> {
        match self {
            RoutingEvent::SelectionMade { decision } => vec![decision.backend_id.clone()],
            RoutingEvent::HealthChanged { backend_id, .. } => vec![backend_id.clone()],
            RoutingEvent::StrategyChanged { .. } => Vec::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RoutingEvent::SelectionMade { decision } => decision.timestamp,
            RoutingEvent::HealthChanged { at, .. } | RoutingEvent::StrategyChanged { at, .. } => *at,
        }
    }
}

/// Live load of one backend at publish time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendLoad {
    pub backend_id: String,
    pub health: HealthStatus,
    pub active_connections: usize,
    pub requests_per_sec: f64,
    pub avg_latency_ms: f64,
}

/// What subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub kind: EventKind,
    pub backend_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub detail: RoutingEvent,
    pub backends: Vec<BackendLoad>,
}
