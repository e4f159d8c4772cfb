// src/load_balancer/weighted.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::registry::Backend;

#[derive(Debug, Default)]
struct WeightedState {
    current: HashMap<String, i64>,
    last: Option<String>,
}

/// Smooth weighted round-robin.
///
/// Every pick adds each backend's static weight to its running score, takes
/// the highest score and charges it the total weight. Over a run each
/// backend is chosen in proportion to its weight without bursts. The last
/// pick is never repeated while another backend is eligible.
#[derive(Debug, Default)]
pub struct WeightedBalancer {
    state: Mutex<WeightedState>,
}

impl WeightedBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let WeightedState { current, last } = &mut *state;

        // Backends that left the eligible set start from zero when they return.
        current.retain(|id, _| backends.iter().any(|b| &b.id == id));

        let mut total = 0i64;
        for backend in backends {
            let weight = i64::from(backend.weight);
            *current.entry(backend.id.clone()).or_insert(0) += weight;
            total += weight;
        }

        let avoid = if backends.len() > 1 { last.as_deref() } else { None };
        let mut chosen: Option<(&Arc<Backend>, i64)> = None;
        for backend in backends {
            if avoid == Some(backend.id.as_str()) {
                continue;
            }
            let score = current.get(&backend.id).copied().unwrap_or(0);
            if chosen.map_or(true, |(_, best)| score > best) {
                chosen = Some((backend, score));
            }
        }

        let (backend, _) = chosen?;
        if let Some(score) = current.get_mut(&backend.id) {
            *score -= total;
        }
        *last = Some(backend.id.clone());

        Some(backend.clone())
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}
