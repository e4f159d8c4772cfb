// src/router/decision.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::StrategyKind;
use crate::registry::Backend;

/// Immutable record of one backend selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub backend_id: String,
    /// Strategy the backend was selected under; outcomes are booked here.
    pub strategy: StrategyKind,
    /// In-flight requests on the backend just before dispatch.
    pub queue_depth: usize,
    pub path: String,
    pub category: Option<String>,
    /// The request category matched the backend role.
    pub optimized: bool,
    /// Zero for the first dispatch of a request, one for its retry.
    pub attempt: u32,
}

impl RoutingDecision {
    pub fn new(
        backend: &Backend,
        strategy: StrategyKind,
        path: &str,
        category: Option<&str>,
        attempt: u32,
    ) -> Self {
        let optimized = match (category, backend.role.as_deref()) {
            (Some(category), Some(role)) => category == role,
            _ => false,
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            backend_id: backend.id.clone(),
            strategy,
            queue_depth: backend.active_connections(),
            path: path.to_string(),
            category: category.map(str::to_string),
            optimized,
            attempt,
        }
    }
}
