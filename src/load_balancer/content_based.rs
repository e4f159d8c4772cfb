// src/load_balancer/content_based.rs
use std::sync::Arc;

use super::{LeastConnectionsBalancer, RoundRobinBalancer};
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::registry::Backend;

/// Category of a request path: its first non-empty segment.
///
/// `/video/intro.mp4` is `video`; `/` and `/favicon.ico` have none.
pub fn request_category(path: &str) -> Option<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let first = segments.next()?;
    // a bare file at the root is not a category
    segments.next().map(|_| first)
}

/// Sends each request to a backend whose role matches the request category,
/// least loaded first. Uncategorised traffic rotates round-robin.
#[derive(Debug, Default)]
pub struct ContentBasedBalancer {
    fallback: RoundRobinBalancer,
}

impl ContentBasedBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for ContentBasedBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if let Some(category) = ctx.category {
            let specialists: Vec<Arc<Backend>> = backends
                .iter()
                .filter(|b| b.role.as_deref() == Some(category))
                .cloned()
                .collect();

            if let Some(backend) = LeastConnectionsBalancer::least_loaded(&specialists) {
                return Some(backend.clone());
            }
        }

        self.fallback.select_backend(backends, ctx)
    }

    fn name(&self) -> &'static str {
        "content-based"
    }
}
