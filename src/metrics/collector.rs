// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use crate::health::HealthStatus;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub no_eligible_backend_total: IntCounterVec,
    pub retries_total: IntCounter,

    // Backend metrics
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,

    // Engine metrics
    pub strategy_switches_total: IntCounterVec,
    pub events_dropped_total: IntCounter,
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Dispatched requests by outcome"),
            &["backend", "strategy", "outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Backend dispatch duration in seconds",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let no_eligible_backend_total = IntCounterVec::new(
            Opts::new(
                "lb_no_eligible_backend_total",
                "Requests rejected because no backend was eligible",
            ),
            &["strategy"],
        )?;
        registry.register(Box::new(no_eligible_backend_total.clone()))?;

        let retries_total = IntCounter::new("lb_retries_total", "Dispatch retries against another backend")?;
        registry.register(Box::new(retries_total.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new(
                "lb_backend_connections_active",
                "Active backend connections",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (0=healthy, 1=degraded, 2=unreachable)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let strategy_switches_total = IntCounterVec::new(
            Opts::new("lb_strategy_switches_total", "Strategy switches by new strategy"),
            &["strategy"],
        )?;
        registry.register(Box::new(strategy_switches_total.clone()))?;

        let events_dropped_total =
            IntCounter::new("lb_events_dropped_total", "Events dropped on a full queue")?;
        registry.register(Box::new(events_dropped_total.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of eligible backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends =
            IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            no_eligible_backend_total,
            retries_total,
            backend_connections_active,
            backend_health_status,
            strategy_switches_total,
            events_dropped_total,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_backend_request(
        &self,
        backend: &str,
        strategy: &str,
        success: bool,
        duration: Duration,
    ) {
        let outcome = if success { "success" } else { "failure" };
        self.requests_total
            .with_label_values(&[backend, strategy, outcome])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_no_eligible_backend(&self, strategy: &str) {
        self.no_eligible_backend_total
            .with_label_values(&[strategy])
            .inc();
    }

    pub fn update_backend_connections(&self, backend: &str, count: usize) {
        self.backend_connections_active
            .with_label_values(&[backend])
            .set(count as i64);
    }

    pub fn update_backend_health(&self, backend: &str, status: HealthStatus) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(status as i64);
    }

    pub fn record_strategy_switch(&self, strategy: &str) {
        self.strategy_switches_total
            .with_label_values(&[strategy])
            .inc();
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }
}
