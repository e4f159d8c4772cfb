// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::registry::{Backend, Eligibility};
use crate::router::RoutingEngine;
use anyhow::Result;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::HealthStatus;

#[derive(Debug, Default, Clone, Copy)]
struct ProbeStreak {
    successes: u32,
    failures: u32,
}

/// Periodic liveness probe feeding `RoutingEngine::set_health`.
///
/// Runs beside request handling and never touches selection state itself.
pub struct HealthChecker {
    config: HealthCheckConfig,
    engine: RoutingEngine,
    client: Client,
    streaks: DashMap<String, ProbeStreak>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, engine: RoutingEngine) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            engine,
            client,
            streaks: DashMap::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn start(self: Arc<Self>) {
        let mut interval = interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting health checker with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.clone().check_all_backends().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn check_all_backends(self: Arc<Self>) -> Vec<HealthCheckResult> {
        let backends = self.engine.registry().list(Eligibility::All);
        let mut tasks = Vec::new();

        for backend in backends {
            let checker = self.clone();
            tasks.push(tokio::spawn(async move { checker.check_backend(backend).await }));
        }

        let mut results = Vec::new();
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => error!("Health check error: {}", e),
                Err(e) => error!("Task join error: {}", e),
            }
        }

        let healthy = results.iter().filter(|r| r.healthy).count();
        debug!(
            "Health check complete: {} passing, {} failing",
            healthy,
            results.len() - healthy
        );
        results
    }

    async fn check_backend(&self, backend: Arc<Backend>) -> Result<HealthCheckResult> {
        let start = std::time::Instant::now();
        let url = format!(
            "{}/{}",
            backend.url.as_str().trim_end_matches('/'),
            self.config.path.trim_start_matches('/')
        );

        let result = timeout(self.config.timeout(), self.client.get(&url).send()).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (healthy, error) = match result {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    (true, None)
                } else {
                    (false, Some(format!("HTTP {}", status)))
                }
            }
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("Request timeout".to_string())),
        };

        self.apply(&backend, healthy)?;

        if let Some(error) = &error {
            debug!(backend = %backend.id, %error, "Health probe failed");
        }

        Ok(HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error,
        })
    }

    /// Folds one probe result into the backend's streak and reports a
    /// status change once a threshold is reached.
    fn apply(&self, backend: &Backend, healthy: bool) -> Result<()> {
        let streak = {
            let mut streak = self.streaks.entry(backend.id.clone()).or_default();
            if healthy {
                streak.successes += 1;
                streak.failures = 0;
            } else {
                streak.failures += 1;
                streak.successes = 0;
            }
            *streak
        };

        let current = backend.health();
        if healthy
            && current != HealthStatus::Healthy
            && streak.successes >= self.config.healthy_threshold.max(1)
        {
            info!(
                "Backend {} is now healthy after {} consecutive successes",
                backend.id, streak.successes
            );
            self.engine.set_health(&backend.id, HealthStatus::Healthy)?;
        } else if !healthy
            && current != HealthStatus::Unreachable
            && streak.failures >= self.config.unhealthy_threshold.max(1)
        {
            warn!(
                "Backend {} is now unreachable after {} consecutive failed probes",
                backend.id, streak.failures
            );
            self.engine.set_health(&backend.id, HealthStatus::Unreachable)?;
        }
        Ok(())
    }
}
