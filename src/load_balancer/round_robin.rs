// src/load_balancer/round_robin.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::registry::Backend;

const NOT_STARTED: usize = usize::MAX;

/// Rotates through the eligible set in registration order.
///
/// The cursor remembers the registration ordinal of the last pick rather
/// than an index, so a backend dropping out of the eligible set never
/// shifts the rotation onto a slot already served this round.
#[derive(Debug)]
pub struct RoundRobinBalancer {
    last: AtomicUsize,
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            last: AtomicUsize::new(NOT_STARTED),
        }
    }

    fn successor<'a>(backends: &'a [Arc<Backend>], last: usize) -> &'a Arc<Backend> {
        if last != NOT_STARTED {
            if let Some(next) = backends.iter().find(|b| b.ordinal() > last) {
                return next;
            }
        }
        &backends[0]
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = Self::successor(backends, last);
            match self.last.compare_exchange_weak(
                last,
                next.ordinal(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(next.clone()),
                Err(actual) => last = actual,
            }
        }
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::pool;
    use proptest::prelude::*;

    fn pick(lb: &RoundRobinBalancer, backends: &[Arc<Backend>]) -> String {
        lb.select_backend(backends, &SelectionContext::default())
            .unwrap()
            .id
            .clone()
    }

    #[test]
    fn test_round_robin_sequence() {
        let lb = RoundRobinBalancer::new();
        let backends = pool(&[1, 1, 1]);

        let picks: Vec<String> = (0..6).map(|_| pick(&lb, &backends)).collect();
        assert_eq!(picks, vec!["backend1", "backend2", "backend3", "backend1", "backend2", "backend3"]);
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let lb = RoundRobinBalancer::new();
        assert!(lb.select_backend(&[], &SelectionContext::default()).is_none());
    }

    #[test]
    fn test_skips_backend_that_left_without_repeating() {
        let lb = RoundRobinBalancer::new();
        let all = pool(&[1, 1, 1]);

        assert_eq!(pick(&lb, &all), "backend1");
        assert_eq!(pick(&lb, &all), "backend2");

        // backend3 drops out: rotation wraps to backend1, backend2 is not served twice.
        let without_third = vec![all[0].clone(), all[1].clone()];
        assert_eq!(pick(&lb, &without_third), "backend1");
        assert_eq!(pick(&lb, &without_third), "backend2");

        // backend2 was last; if it drops out the next pick is the following ordinal.
        let without_second = vec![all[0].clone(), all[2].clone()];
        assert_eq!(pick(&lb, &without_second), "backend3");
        assert_eq!(pick(&lb, &without_second), "backend1");
    }

    proptest! {
        #[test]
        fn prop_full_cycle_visits_each_backend_once(size in 1usize..12, warmup in 0usize..30) {
            let lb = RoundRobinBalancer::new();
            let backends = pool(&vec![1; size]);
            for _ in 0..warmup {
                pick(&lb, &backends);
            }

            let mut cycle: Vec<String> = (0..size).map(|_| pick(&lb, &backends)).collect();
            cycle.sort();
            cycle.dedup();
            prop_assert_eq!(cycle.len(), size);
        }
    }
}
