// src/stats/aggregator.rs
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::window::{RollingWindow, Sample, WindowSummary};
use crate::config::{StatsConfig, StrategyKind};
use crate::registry::{BackendMetrics, BackendRegistry, Eligibility};
use crate::router::RoutingDecision;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BucketKey {
    Backend(String),
    Strategy(StrategyKind),
}

#[derive(Debug)]
struct Bucket {
    requests: u64,
    errors: u64,
    rejected: u64,
    window: RollingWindow,
}

impl Bucket {
    fn new(config: &StatsConfig) -> Self {
        Self {
            requests: 0,
            errors: 0,
            rejected: 0,
            window: RollingWindow::new(config.window_size, config.max_age()),
        }
    }
}

/// Per-backend and per-strategy counters with rolling latency windows.
///
/// Buckets are sharded through a `DashMap`, so recording an outcome only
/// touches the shards of its own backend and strategy.
#[derive(Debug)]
pub struct StatsAggregator {
    config: StatsConfig,
    buckets: DashMap<BucketKey, Bucket>,
    sequence: AtomicU64,
    since: Mutex<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub total_requests: u64,
    pub total_failures: u64,
    pub eligible_backends: usize,
    pub backends: Vec<BackendStats>,
    pub strategies: Vec<StrategyStats>,
    pub recent: Vec<CompletedDecision>,
}

impl StatsSnapshot {
    pub fn backend(&self, id: &str) -> Option<&BackendStats> {
        self.backends.iter().find(|b| b.backend.id == id)
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<&StrategyStats> {
        self.strategies.iter().find(|s| s.strategy == kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    #[serde(flatten)]
    pub backend: BackendMetrics,
    /// Requests since the last stats reset.
    pub requests: u64,
    pub errors: u64,
    pub window: WindowSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    pub strategy: StrategyKind,
    pub requests: u64,
    pub errors: u64,
    /// Requests turned away because nothing was eligible.
    pub rejected: u64,
    pub window: WindowSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedDecision {
    #[serde(flatten)]
    pub decision: RoutingDecision,
    pub latency_ms: f64,
    pub success: bool,
}

/// Live load of one backend, cheap enough to attach to every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    pub requests_per_sec: f64,
    pub avg_latency_ms: f64,
}

impl StatsAggregator {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            sequence: AtomicU64::new(0),
            since: Mutex::new(Utc::now()),
        }
    }

    pub fn record(&self, decision: Arc<RoutingDecision>, latency: Duration, success: bool) {
        let sample = Sample {
            seq: self.sequence.fetch_add(1, Ordering::Relaxed),
            at: Instant::now(),
            latency_ms: latency.as_secs_f64() * 1000.0,
            success,
            decision,
        };

        let strategy = BucketKey::Strategy(sample.decision.strategy);
        let backend = BucketKey::Backend(sample.decision.backend_id.clone());
        self.push(strategy, sample.clone());
        self.push(backend, sample);
    }

    fn push(&self, key: BucketKey, sample: Sample) {
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(&self.config));
        bucket.requests += 1;
        if !sample.success {
            bucket.errors += 1;
        }
        bucket.window.push(sample);
    }

    pub fn record_rejection(&self, strategy: StrategyKind) {
        self.buckets
            .entry(BucketKey::Strategy(strategy))
            .or_insert_with(|| Bucket::new(&self.config))
            .rejected += 1;
    }

    pub fn backend_load(&self, id: &str) -> LoadSummary {
        self.buckets
            .get(&BucketKey::Backend(id.to_string()))
            .map(|bucket| {
                let (requests_per_sec, avg_latency_ms) = bucket.window.load(Instant::now());
                LoadSummary {
                    requests_per_sec,
                    avg_latency_ms,
                }
            })
            .unwrap_or_default()
    }

    /// Clears windows and counters; registry totals are left alone.
    pub fn reset(&self) {
        self.buckets.clear();
        *self.since.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
        tracing::info!("Routing statistics reset");
    }

    pub fn snapshot(&self, registry: &BackendRegistry, active: StrategyKind) -> StatsSnapshot {
        let now = Instant::now();
        let mut recent: Vec<Sample> = Vec::new();

        let backends: Vec<BackendStats> = registry
            .list(Eligibility::All)
            .iter()
            .map(|backend| {
                let key = BucketKey::Backend(backend.id.clone());
                let captured = self.buckets.get(&key).map(|bucket| {
                    recent.extend(bucket.window.iter().rev().take(self.config.recent_decisions).cloned());
                    (bucket.requests, bucket.errors, bucket.window.capture(now))
                });
                // the shard guard is gone before any sorting happens
                let (requests, errors, window) = captured.unwrap_or_default();
                BackendStats {
                    backend: backend.get_metrics(),
                    requests,
                    errors,
                    window: window.summary(now),
                }
            })
            .collect();

        let strategies: Vec<StrategyStats> = StrategyKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let (requests, errors, rejected, window) = self
                    .buckets
                    .get(&BucketKey::Strategy(kind))
                    .map(|bucket| {
                        (bucket.requests, bucket.errors, bucket.rejected, bucket.window.capture(now))
                    })?;
                Some(StrategyStats {
                    strategy: kind,
                    requests,
                    errors,
                    rejected,
                    window: window.summary(now),
                })
            })
            .collect();

        recent.sort_by_key(|s| s.seq);
        let skip = recent.len().saturating_sub(self.config.recent_decisions);
        let recent = recent
            .into_iter()
            .skip(skip)
            .map(|s| CompletedDecision {
                decision: (*s.decision).clone(),
                latency_ms: s.latency_ms,
                success: s.success,
            })
            .collect();

        StatsSnapshot {
            taken_at: Utc::now(),
            since: *self.since.lock().unwrap_or_else(PoisonError::into_inner),
            strategy: active,
            total_requests: backends.iter().map(|b| b.requests).sum(),
            total_failures: backends.iter().map(|b| b.errors).sum(),
            eligible_backends: registry.eligible_count(),
            backends,
            strategies,
            recent,
        }
    }
}
