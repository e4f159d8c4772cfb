// src/stats/window.rs
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::router::RoutingDecision;

#[derive(Debug, Clone)]
pub struct Sample {
    /// Monotonic record order across all buckets.
    pub seq: u64,
    pub at: Instant,
    pub latency_ms: f64,
    pub success: bool,
    pub decision: Arc<RoutingDecision>,
}

/// Bounded by both a sample count and a sample age; whichever limit is hit
/// first evicts from the front.
#[derive(Debug)]
pub struct RollingWindow {
    samples: VecDeque<Sample>,
    max_samples: usize,
    max_age: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowSummary {
    pub samples: usize,
    pub errors: usize,
    pub error_rate: f64,
    pub requests_per_sec: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub optimized_rate: f64,
}

impl RollingWindow {
    pub fn new(max_samples: usize, max_age: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.min(1024)),
            max_samples: max_samples.max(1),
            max_age,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        let now = sample.at;
        self.samples.push_back(sample);
        self.evict(now);
    }

    pub fn evict(&mut self, now: Instant) {
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        while self
            .samples
            .front()
            .is_some_and(|s| now.saturating_duration_since(s.at) > self.max_age)
        {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Requests per second and mean latency without sorting.
    pub fn load(&self, now: Instant) -> (f64, f64) {
        let mut count = 0usize;
        let mut total = 0.0;
        let mut oldest = None;
        for sample in self.live(now) {
            oldest.get_or_insert(sample.at);
            count += 1;
            total += sample.latency_ms;
        }
        if count == 0 {
            return (0.0, 0.0);
        }
        (rate(oldest, count, now, self.max_age), total / count as f64)
    }

    /// Copies out the live samples so the summary can be computed after
    /// the lock guarding this window is released.
    pub fn capture(&self, now: Instant) -> WindowCapture {
        WindowCapture {
            points: self
                .live(now)
                .map(|s| Point {
                    at: s.at,
                    latency_ms: s.latency_ms,
                    success: s.success,
                    optimized: s.decision.optimized,
                })
                .collect(),
            max_age: self.max_age,
        }
    }

    pub fn summary(&self, now: Instant) -> WindowSummary {
        self.capture(now).summary(now)
    }

    // Samples still inside the age bound at `now`, even if no push has evicted them yet.
    fn live(&self, now: Instant) -> impl Iterator<Item = &Sample> {
        let max_age = self.max_age;
        self.samples
            .iter()
            .filter(move |s| now.saturating_duration_since(s.at) <= max_age)
    }
}

#[derive(Debug, Clone, Copy)]
struct Point {
    at: Instant,
    latency_ms: f64,
    success: bool,
    optimized: bool,
}

/// Owned copy of a window's live samples, oldest first.
#[derive(Debug, Clone, Default)]
pub struct WindowCapture {
    points: Vec<Point>,
    max_age: Duration,
}

impl WindowCapture {
    pub fn summary(&self, now: Instant) -> WindowSummary {
        let n = self.points.len();
        if n == 0 {
            return WindowSummary::default();
        }

        let errors = self.points.iter().filter(|p| !p.success).count();
        let optimized = self.points.iter().filter(|p| p.optimized).count();

        let mut latencies: Vec<f64> = self.points.iter().map(|p| p.latency_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        WindowSummary {
            samples: n,
            errors,
            error_rate: errors as f64 / n as f64,
            requests_per_sec: rate(self.points.first().map(|p| p.at), n, now, self.max_age),
            avg_latency_ms: latencies.iter().sum::<f64>() / n as f64,
            p50_latency_ms: percentile(&latencies, 50.0),
            p95_latency_ms: percentile(&latencies, 95.0),
            p99_latency_ms: percentile(&latencies, 99.0),
            optimized_rate: optimized as f64 / n as f64,
        }
    }
}

fn rate(oldest: Option<Instant>, count: usize, now: Instant, max_age: Duration) -> f64 {
    let span = oldest
        .map(|at| now.saturating_duration_since(at))
        .unwrap_or_default()
        .clamp(Duration::from_secs(1), max_age.max(Duration::from_secs(1)));
    count as f64 / span.as_secs_f64()
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
