// src/load_balancer/dynamic.rs
use std::sync::Arc;

use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::registry::Backend;

/// Health-weighted selection: `weight / (1 + avg_latency_ms)`, highest wins.
#[derive(Debug, Default)]
pub struct DynamicBalancer;

impl DynamicBalancer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(backend: &Backend) -> f64 {
        f64::from(backend.weight) / (1.0 + backend.avg_latency_ms())
    }
}

impl LoadBalancer for DynamicBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        let mut best: Option<(&Arc<Backend>, f64, usize)> = None;

        for backend in backends {
            let score = Self::score(backend);
            let connections = backend.active_connections();
            // Earlier registration wins any remaining tie since we only replace on strict improvement.
            let better = match best {
                None => true,
                Some((_, best_score, best_conns)) => {
                    score > best_score || (score == best_score && connections < best_conns)
                }
            };
            if better {
                best = Some((backend, score, connections));
            }
        }

        best.map(|(backend, _, _)| backend.clone())
    }

    fn name(&self) -> &'static str {
        "dynamic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::pool;
    use std::time::Duration;

    fn pick(backends: &[Arc<Backend>]) -> String {
        DynamicBalancer::new()
            .select_backend(backends, &SelectionContext::default())
            .unwrap()
            .id
            .clone()
    }

    #[test]
    fn test_prefers_fast_backend() {
        let backends = pool(&[1, 1]);
        backends[0].record_outcome(Duration::from_millis(90), true);
        backends[1].record_outcome(Duration::from_millis(9), true);

        assert_eq!(pick(&backends), "backend2");
    }

    #[test]
    fn test_weight_offsets_latency() {
        let backends = pool(&[10, 1]);
        // 10 / 10 = 1.0 against 1 / 2 = 0.5
        backends[0].record_outcome(Duration::from_millis(9), true);
        backends[1].record_outcome(Duration::from_millis(1), true);

        assert_eq!(pick(&backends), "backend1");
    }

    #[test]
    fn test_ties_use_connections_then_order() {
        let backends = pool(&[1, 1, 1]);
        assert_eq!(pick(&backends), "backend1");

        backends[0].increment_connections(1);
        assert_eq!(pick(&backends), "backend2");
    }

    #[test]
    fn test_empty_pool() {
        assert!(DynamicBalancer::new()
            .select_backend(&[], &SelectionContext::default())
            .is_none());
    }
}
