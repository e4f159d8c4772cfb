// src/router/engine.rs
use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::dispatch::{DispatchResponse, Dispatcher, HttpDispatcher, RouteRequest};
use super::RoutingDecision;
use crate::config::{BackendSpec, Config, FailurePolicy, StrategyKind};
use crate::error::RoutingError;
use crate::events::{EventPublisher, EventSink, RoutingEvent, SubscriptionId};
use crate::health::{HealthStatus, HealthTransition};
use crate::load_balancer::{create_strategy, request_category, SelectionContext, Strategy};
use crate::metrics::MetricsCollector;
use crate::registry::{Backend, BackendMetrics, BackendRegistry, ConnectionGuard, Eligibility};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::{StatsAggregator, StatsSnapshot};

/// What happened to one routed request.
#[derive(Debug)]
pub struct RoutingOutcome {
    /// Backend of the final attempt; `None` when nothing could be selected.
    pub backend_id: Option<String>,
    pub strategy: StrategyKind,
    pub status_code: u16,
    pub latency: Duration,
    pub attempts: u32,
    pub result: Result<DispatchResponse, RoutingError>,
}

impl RoutingOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

struct EngineInner {
    registry: Arc<BackendRegistry>,
    active: Arc<ArcSwap<Strategy>>,
    switch_lock: Mutex<()>,
    stats: Arc<StatsAggregator>,
    publisher: EventPublisher,
    dispatcher: Arc<dyn Dispatcher>,
    dispatch_timeout: Duration,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Picks a backend for each request, dispatches it and books the outcome.
///
/// Cloning is cheap and every clone drives the same registry and strategy.
#[derive(Clone)]
pub struct RoutingEngine {
    inner: Arc<EngineInner>,
}

pub struct RoutingEngineBuilder {
    config: Config,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RoutingEngineBuilder {
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registers the configured backends and starts the event task.
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<RoutingEngine, RoutingError> {
        let Self {
            config,
            dispatcher,
            metrics,
        } = self;

        let registry = Arc::new(BackendRegistry::new());
        for spec in config.backends.iter().cloned() {
            registry.register(spec)?;
        }

        let stats = Arc::new(StatsAggregator::new(config.stats.clone()));
        let active = Arc::new(ArcSwap::new(create_strategy(config.strategy)));
        let publisher = EventPublisher::spawn(
            &config.events,
            registry.clone(),
            stats.clone(),
            active.clone(),
            metrics.clone(),
        );

        let engine = RoutingEngine {
            inner: Arc::new(EngineInner {
                registry,
                active,
                switch_lock: Mutex::new(()),
                stats,
                publisher,
                dispatcher: dispatcher.unwrap_or_else(|| Arc::new(HttpDispatcher::new())),
                dispatch_timeout: config.dispatch.timeout(),
                retry: RetryPolicy::new(config.retry.clone()),
                failure_policy: config.failure_policy,
                metrics,
            }),
        };

        if let Some(metrics) = &engine.inner.metrics {
            for backend in engine.inner.registry.list(Eligibility::All) {
                metrics.update_backend_health(&backend.id, backend.health());
                metrics.update_backend_connections(&backend.id, 0);
            }
        }
        engine.inner.refresh_backend_counts();

        info!(
            strategy = %config.strategy,
            backends = engine.inner.registry.len(),
            "Routing engine ready"
        );
        Ok(engine)
    }
}

impl RoutingEngine {
    pub fn builder(config: Config) -> RoutingEngineBuilder {
        RoutingEngineBuilder {
            config,
            dispatcher: None,
            metrics: None,
        }
    }

    /// Routes one request under the strategy active when it arrived.
    ///
    /// A failed dispatch is retried once on a different eligible backend
    /// when the retry policy allows it. Accounting for each attempt runs
    /// on its own task, so dropping this future does not leak an
    /// in-flight slot or lose the outcome.
    pub async fn route(&self, request: RouteRequest) -> RoutingOutcome {
        let started = Instant::now();
        let strategy = self.inner.active.load_full();
        let kind = strategy.kind();
        let request = Arc::new(request);
        let category = request_category(&request.path).map(str::to_string);
        let ctx = SelectionContext {
            category: category.as_deref(),
            path: &request.path,
        };

        let mut tried: Vec<String> = Vec::new();
        let mut last_failure: Option<RoutingError> = None;
        let mut attempt: u32 = 0;

        loop {
            let eligible: Vec<Arc<Backend>> = self
                .inner
                .registry
                .list(Eligibility::EligibleOnly)
                .into_iter()
                .filter(|backend| !tried.contains(&backend.id))
                .collect();

            let backend = match strategy.select(&eligible, &ctx) {
                Ok(backend) => backend,
                Err(err) => {
                    if let Some(failure) = last_failure.take() {
                        debug!(attempt, "No other eligible backend to retry on");
                        return self.outcome(tried.pop(), kind, started, attempt, Err(failure));
                    }
                    warn!(strategy = %kind, path = %request.path, "No eligible backend");
                    self.inner.stats.record_rejection(kind);
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.record_no_eligible_backend(kind.as_str());
                    }
                    return self.outcome(None, kind, started, 0, Err(err));
                }
            };

            let decision = Arc::new(RoutingDecision::new(
                &backend,
                kind,
                &request.path,
                ctx.category,
                attempt,
            ));
            debug!(
                backend = %backend.id,
                strategy = %kind,
                queue_depth = decision.queue_depth,
                attempt,
                "Selected backend"
            );
            self.inner.publisher.publish(RoutingEvent::SelectionMade {
                decision: (*decision).clone(),
            });
            tried.push(backend.id.clone());

            let guard = backend.connect();
            let task = tokio::spawn(self.inner.clone().dispatch(guard, decision, request.clone()));
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(RoutingError::UpstreamError {
                    backend: backend.id.clone(),
                    message: e.to_string(),
                }),
            };

            match result {
                Ok(response) => {
                    return self.outcome(Some(backend.id.clone()), kind, started, attempt + 1, Ok(response));
                }
                Err(err) => match self.inner.retry.decide(&err, attempt) {
                    RetryDecision::NoRetry => {
                        return self.outcome(Some(backend.id.clone()), kind, started, attempt + 1, Err(err));
                    }
                    RetryDecision::Retry => {
                        attempt += 1;
                        warn!(backend = %backend.id, error = %err, attempt, "Retrying on another backend");
                        if let Some(metrics) = &self.inner.metrics {
                            metrics.retries_total.inc();
                        }
                        last_failure = Some(err);
                        self.inner.retry.pause(attempt).await;
                    }
                },
            }
        }
    }

    fn outcome(
        &self,
        backend_id: Option<String>,
        strategy: StrategyKind,
        started: Instant,
        attempts: u32,
        result: Result<DispatchResponse, RoutingError>,
    ) -> RoutingOutcome {
        let status_code = match &result {
            Ok(response) => response.status,
            Err(err) => err.status_code(),
        };
        RoutingOutcome {
            backend_id,
            strategy,
            status_code,
            latency: started.elapsed(),
            attempts,
            result,
        }
    }

    /// Swaps in fresh state for `name`. Selections already made keep
    /// booking their outcomes to the strategy they were made under.
    pub fn set_strategy(&self, name: &str) -> Result<StrategyKind, RoutingError> {
        let kind: StrategyKind = name.parse()?;
        self.set_strategy_kind(kind);
        Ok(kind)
    }

    pub fn set_strategy_kind(&self, kind: StrategyKind) {
        let _switch = self
            .inner
            .switch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let previous = self.inner.active.load().kind();
        self.inner.active.store(create_strategy(kind));

        info!(from = %previous, to = %kind, "Routing strategy switched");
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_strategy_switch(kind.as_str());
        }
        self.inner.publisher.publish(RoutingEvent::StrategyChanged {
            from: previous,
            to: kind,
            at: Utc::now(),
        });
    }

    pub fn active_strategy(&self) -> StrategyKind {
        self.inner.active.load().kind()
    }

    pub fn register_backend(&self, spec: BackendSpec) -> Result<Arc<Backend>, RoutingError> {
        spec.validate()
            .map_err(|e| RoutingError::InvalidBackend(e.to_string()))?;

        let backend = self.inner.registry.register(spec)?;
        if let Some(metrics) = &self.inner.metrics {
            metrics.update_backend_health(&backend.id, backend.health());
            metrics.update_backend_connections(&backend.id, 0);
        }
        self.inner.refresh_backend_counts();
        Ok(backend)
    }

    /// Applies an explicit health status, e.g. from an operator or a probe.
    pub fn set_health(
        &self,
        id: &str,
        status: HealthStatus,
    ) -> Result<Option<HealthTransition>, RoutingError> {
        let transition = self.inner.registry.set_health(id, status)?;
        if let Some(transition) = &transition {
            self.inner.announce(transition);
        }
        Ok(transition)
    }

    pub fn backends(&self) -> Vec<BackendMetrics> {
        self.inner
            .registry
            .list(Eligibility::All)
            .iter()
            .map(|backend| backend.get_metrics())
            .collect()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.inner.registry
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner
            .stats
            .snapshot(&self.inner.registry, self.active_strategy())
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.inner.publisher.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.publisher.unsubscribe(id)
    }
}

impl EngineInner {
    /// One attempt against one backend, from dispatch to booked outcome.
    async fn dispatch(
        self: Arc<Self>,
        guard: ConnectionGuard,
        decision: Arc<RoutingDecision>,
        request: Arc<RouteRequest>,
    ) -> Result<DispatchResponse, RoutingError> {
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_connections(&guard.id, guard.active_connections());
        }

        let result = match timeout(self.dispatch_timeout, self.dispatcher.dispatch(&guard, &request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(RoutingError::UpstreamError {
                backend: guard.id.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(RoutingError::UpstreamTimeout {
                backend: guard.id.clone(),
                timeout: self.dispatch_timeout,
            }),
        };

        let latency = match &result {
            Err(RoutingError::UpstreamTimeout { .. }) => self.dispatch_timeout,
            _ => started.elapsed(),
        };

        let backend = guard.backend().clone();
        drop(guard);
        self.complete(&backend, decision, latency, &result);
        result
    }

    fn complete(
        &self,
        backend: &Backend,
        decision: Arc<RoutingDecision>,
        latency: Duration,
        result: &Result<DispatchResponse, RoutingError>,
    ) {
        let success = result.is_ok();
        let Some(failures) = self.registry.record_outcome(&backend.id, latency, success) else {
            return;
        };
        let strategy = decision.strategy;
        self.stats.record(decision, latency, success);

        if let Some(metrics) = &self.metrics {
            metrics.record_backend_request(&backend.id, strategy.as_str(), success, latency);
            metrics.update_backend_connections(&backend.id, backend.active_connections());
        }

        let transition = match result {
            Ok(_) => backend.transition_from(HealthStatus::Degraded, HealthStatus::Healthy),
            Err(err) => {
                debug!(backend = %backend.id, error = %err, failures, "Dispatch failed");
                if failures >= self.failure_policy.unreachable_after {
                    backend.set_health(HealthStatus::Unreachable)
                } else if failures >= self.failure_policy.degraded_after {
                    backend.transition_from(HealthStatus::Healthy, HealthStatus::Degraded)
                } else {
                    None
                }
            }
        };

        if let Some(transition) = transition {
            self.announce(&transition);
        }
    }

    fn announce(&self, transition: &HealthTransition) {
        match transition.to {
            HealthStatus::Healthy => info!(
                backend = %transition.backend_id,
                from = %transition.from,
                "Backend is healthy again"
            ),
            to => warn!(
                backend = %transition.backend_id,
                from = %transition.from,
                to = %to,
                "Backend health changed"
            ),
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&transition.backend_id, transition.to);
        }
        self.refresh_backend_counts();

        self.publisher.publish(RoutingEvent::HealthChanged {
            backend_id: transition.backend_id.clone(),
            from: transition.from,
            to: transition.to,
            at: Utc::now(),
        });
    }

    fn refresh_backend_counts(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.registry.eligible_count(), self.registry.len());
        }
    }
}
