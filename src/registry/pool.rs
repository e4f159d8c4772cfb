// src/registry/pool.rs
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::backend::Backend;
use crate::config::BackendSpec;
use crate::error::RoutingError;
use crate::health::{HealthStatus, HealthTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    EligibleOnly,
    All,
}

/// The pool of known backends, in registration order.
///
/// Readers get a lock-free snapshot of the ordered list; per-backend state
/// lives in atomics on each `Backend`, so unrelated backends never contend.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: ArcSwap<Vec<Arc<Backend>>>,
    index: DashMap<String, Arc<Backend>>,
    register_lock: Mutex<()>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: ArcSwap::from_pointee(Vec::new()),
            index: DashMap::new(),
            register_lock: Mutex::new(()),
        }
    }

    pub fn register(&self, spec: BackendSpec) -> Result<Arc<Backend>, RoutingError> {
        let _guard = self.register_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.backends.load_full();
        if self.index.contains_key(&spec.name) || current.iter().any(|b| b.url == spec.url) {
            return Err(RoutingError::DuplicateBackend(spec.name));
        }

        let backend = Arc::new(Backend::new(spec, current.len()));
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(backend.clone());

        self.index.insert(backend.id.clone(), backend.clone());
        self.backends.store(Arc::new(next));

        tracing::info!(
            backend = %backend.id,
            url = %backend.url,
            weight = backend.weight,
            role = ?backend.role,
            "Registered backend"
        );
        Ok(backend)
    }

    pub fn list(&self, filter: Eligibility) -> Vec<Arc<Backend>> {
        let backends = self.backends.load();
        match filter {
            Eligibility::All => backends.iter().cloned().collect(),
            Eligibility::EligibleOnly => backends.iter().filter(|b| b.is_eligible()).cloned().collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Backend>> {
        self.index.get(id).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.backends.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn eligible_count(&self) -> usize {
        self.backends.load().iter().filter(|b| b.is_eligible()).count()
    }

    /// Returns the consecutive failure count, or `None` for a stale id.
    pub fn record_outcome(&self, id: &str, latency: Duration, success: bool) -> Option<u32> {
        match self.get(id) {
            Some(backend) => Some(backend.record_outcome(latency, success)),
            None => {
                tracing::warn!(backend = %id, "Ignoring outcome for unknown backend");
                None
            }
        }
    }

    pub fn set_health(
        &self,
        id: &str,
        status: HealthStatus,
    ) -> Result<Option<HealthTransition>, RoutingError> {
        let backend = self
            .get(id)
            .ok_or_else(|| RoutingError::UnknownBackend(id.to_string()))?;

        let transition = backend.set_health(status);
        if let Some(t) = &transition {
            tracing::debug!(backend = %id, from = %t.from, to = %t.to, "Health set explicitly");
        }
        Ok(transition)
    }

    /// Returns the new in-flight count, or `None` for a stale id.
    pub fn increment_connections(&self, id: &str, delta: isize) -> Option<usize> {
        match self.get(id) {
            Some(backend) => Some(backend.increment_connections(delta)),
            None => {
                tracing::warn!(backend = %id, delta, "Ignoring connection update for unknown backend");
                None
            }
        }
    }
}
