// src/registry/backend.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::BackendSpec;
use crate::health::{HealthStatus, HealthTransition};

/// Smoothing factor of the latency moving average. Recent samples dominate.
pub const LATENCY_SMOOTHING: f64 = 0.3;

/// Bit pattern of the moving average before the first sample arrives.
const NO_LATENCY: u64 = u64::MAX;

#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    pub weight: u32,
    pub role: Option<String>,
    pub registered_at: DateTime<Utc>,
    ordinal: usize,

    // Runtime state
    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    avg_latency_bits: AtomicU64,
    health_status: AtomicU8,
    consecutive_failures: AtomicU32,
}

impl Backend {
    pub fn new(spec: BackendSpec, ordinal: usize) -> Self {
        Self {
            id: spec.name,
            url: spec.url,
            weight: spec.weight.max(1),
            role: spec.role,
            registered_at: Utc::now(),
            ordinal,
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            avg_latency_bits: AtomicU64::new(NO_LATENCY),
            health_status: AtomicU8::new(HealthStatus::Healthy as u8),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Position in registration order.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Adjusts the in-flight counter by `delta`, saturating at zero.
    pub fn increment_connections(&self, delta: isize) -> usize {
        let previous = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add_signed(delta))
            })
            .unwrap_or_else(|current| current);

        if delta < 0 && previous < delta.unsigned_abs() {
            tracing::warn!(
                backend = %self.id,
                previous,
                delta,
                "connection counter would go negative, clamped to zero"
            );
        }

        previous.saturating_add_signed(delta)
    }

    /// Brackets one dispatch: the counter is released when the guard drops.
    pub fn connect(self: &Arc<Self>) -> ConnectionGuard {
        self.increment_connections(1);
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Folds one dispatch outcome into the counters and returns the
    /// consecutive failure count after it.
    pub fn record_outcome(&self, latency: Duration, success: bool) -> u32 {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(latency);

        if success {
            self.consecutive_failures.store(0, Ordering::Release);
            0
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
        }
    }

    fn observe_latency(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let _ = self
            .avg_latency_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let next = if bits == NO_LATENCY {
                    sample
                } else {
                    let current = f64::from_bits(bits);
                    LATENCY_SMOOTHING * sample + (1.0 - LATENCY_SMOOTHING) * current
                };
                Some(next.to_bits())
            });
    }

    /// Exponential moving average of dispatch latency; zero before any sample.
    pub fn avg_latency_ms(&self) -> f64 {
        match self.avg_latency_bits.load(Ordering::Acquire) {
            NO_LATENCY => 0.0,
            bits => f64::from_bits(bits),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::from(self.health_status.load(Ordering::Acquire))
    }

    pub fn is_eligible(&self) -> bool {
        self.health().is_eligible()
    }

    /// Unconditionally moves to `status`. Returns the transition if the state changed.
    pub fn set_health(&self, status: HealthStatus) -> Option<HealthTransition> {
        let previous = HealthStatus::from(self.health_status.swap(status as u8, Ordering::AcqRel));
        if status == HealthStatus::Healthy {
            self.consecutive_failures.store(0, Ordering::Release);
        }
        self.transition(previous, status)
    }

    /// Moves `from -> to` only if the backend is currently in `from`.
    pub fn transition_from(&self, from: HealthStatus, to: HealthStatus) -> Option<HealthTransition> {
        self.health_status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .and_then(|_| self.transition(from, to))
    }

    fn transition(&self, from: HealthStatus, to: HealthStatus) -> Option<HealthTransition> {
        (from != to).then(|| HealthTransition {
            backend_id: self.id.clone(),
            from,
            to,
        })
    }

    pub fn get_metrics(&self) -> BackendMetrics {
        BackendMetrics {
            id: self.id.clone(),
            url: self.url.to_string(),
            role: self.role.clone(),
            weight: self.weight,
            health: self.health(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendMetrics {
    pub id: String,
    pub url: String,
    pub role: Option<String>,
    pub weight: u32,
    pub health: HealthStatus,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub avg_latency_ms: f64,
}

/// Holds one in-flight slot on a backend until dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for ConnectionGuard {
    type Target = Backend;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.increment_connections(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Arc<Backend> {
        let spec = BackendSpec::new("a", Url::parse("http://127.0.0.1:5001").unwrap());
        Arc::new(Backend::new(spec, 0))
    }

    #[test]
    fn test_guard_brackets_connection_count() {
        let b = backend();
        {
            let _g1 = b.connect();
            let _g2 = b.connect();
            assert_eq!(b.active_connections(), 2);
        }
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn test_counter_never_goes_negative() {
        let b = backend();
        assert_eq!(b.increment_connections(-1), 0);
        assert_eq!(b.increment_connections(3), 3);
        assert_eq!(b.increment_connections(-5), 0);
    }

    #[test]
    fn test_latency_average_favours_recent_samples() {
        let b = backend();
        assert_eq!(b.avg_latency_ms(), 0.0);

        b.record_outcome(Duration::from_millis(100), true);
        assert!((b.avg_latency_ms() - 100.0).abs() < 1e-9);

        b.record_outcome(Duration::from_millis(200), true);
        assert!((b.avg_latency_ms() - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let b = backend();
        assert_eq!(b.record_outcome(Duration::from_millis(1), false), 1);
        assert_eq!(b.record_outcome(Duration::from_millis(1), false), 2);
        assert_eq!(b.record_outcome(Duration::from_millis(1), true), 0);

        let metrics = b.get_metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 2);
    }

    #[test]
    fn test_health_transitions() {
        let b = backend();
        assert!(b.set_health(HealthStatus::Healthy).is_none());

        let t = b.set_health(HealthStatus::Unreachable).unwrap();
        assert_eq!((t.from, t.to), (HealthStatus::Healthy, HealthStatus::Unreachable));
        assert!(!b.is_eligible());

        // Only a Degraded backend can be restored by a conditional transition.
        assert!(b
            .transition_from(HealthStatus::Degraded, HealthStatus::Healthy)
            .is_none());
        assert_eq!(b.health(), HealthStatus::Unreachable);
    }
}
