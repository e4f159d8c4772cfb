// src/load_balancer/least_connections.rs
use std::sync::Arc;

use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::registry::Backend;

/// Picks the backend with the fewest in-flight requests.
/// Ties go to the earliest registered backend.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer;

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn least_loaded(backends: &[Arc<Backend>]) -> Option<&Arc<Backend>> {
        // min_by_key keeps the first of equal minima
        backends.iter().min_by_key(|b| b.active_connections())
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        Self::least_loaded(backends).cloned()
    }

    fn name(&self) -> &'static str {
        "least-connections"
    }
}
