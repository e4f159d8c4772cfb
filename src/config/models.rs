// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::RoutingError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            strategy: StrategyKind::default(),
            backends: Vec::new(),
            dispatch: DispatchConfig::default(),
            retry: RetryConfig::default(),
            failure_policy: FailurePolicy::default(),
            health_check: HealthCheckConfig::default(),
            stats: StatsConfig::default(),
            events: EventsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut urls = HashSet::new();

        for backend in &self.backends {
            backend.validate()?;
            if !names.insert(backend.name.as_str()) {
                bail!("duplicate backend name: {}", backend.name);
            }
            if !urls.insert(backend.url.as_str()) {
                bail!("duplicate backend url: {}", backend.url);
            }
        }

        if self.dispatch.timeout_ms == 0 {
            bail!("dispatch.timeout_ms must be greater than zero");
        }

        self.failure_policy.validate()?;

        if self.health_check.healthy_threshold == 0 || self.health_check.unhealthy_threshold == 0 {
            bail!("health_check thresholds must be greater than zero");
        }

        if self.stats.window_size == 0 || self.stats.window_secs == 0 {
            bail!("stats window bounds must be greater than zero");
        }

        if self.events.queue_capacity == 0 || self.events.subscriber_buffer == 0 {
            bail!("event queue capacities must be greater than zero");
        }

        Ok(())
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Backend selection policy names accepted by config and the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
    Dynamic,
    ContentBased,
    FileSize,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::RoundRobin,
        StrategyKind::LeastConnections,
        StrategyKind::Weighted,
        StrategyKind::Dynamic,
        StrategyKind::ContentBased,
        StrategyKind::FileSize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round-robin",
            StrategyKind::LeastConnections => "least-connections",
            StrategyKind::Weighted => "weighted",
            StrategyKind::Dynamic => "dynamic",
            StrategyKind::ContentBased => "content-based",
            StrategyKind::FileSize => "file-size",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RoutingError::UnknownStrategy(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendSpec {
    pub name: String,
    pub url: Url,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Category of work this backend serves (e.g. "video", "api").
    #[serde(default)]
    pub role: Option<String>,
}

impl BackendSpec {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            weight: default_weight(),
            role: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("backend name must not be empty");
        }
        if self.weight == 0 {
            bail!("backend {} must have a positive weight", self.name);
        }
        Ok(())
    }
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_dispatch_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            backoff_base_ms: 0,
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn default_max_retries() -> u32 {
    1
}

fn default_backoff_max_ms() -> u64 {
    100
}

/// Passive health transitions driven by consecutive dispatch failures.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct FailurePolicy {
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    #[serde(default = "default_unreachable_after")]
    pub unreachable_after: u32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            degraded_after: default_degraded_after(),
            unreachable_after: default_unreachable_after(),
        }
    }
}

impl FailurePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.degraded_after == 0 || self.unreachable_after == 0 {
            bail!("failure_policy thresholds must be greater than zero");
        }
        if self.degraded_after > self.unreachable_after {
            bail!(
                "failure_policy.degraded_after ({}) must not exceed unreachable_after ({})",
                self.degraded_after,
                self.unreachable_after
            );
        }
        Ok(())
    }
}

fn default_degraded_after() -> u32 {
    2
}

fn default_unreachable_after() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_one")]
    pub healthy_threshold: u32,
    #[serde(default = "default_one")]
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            path: default_health_path(),
            healthy_threshold: 1,
            unhealthy_threshold: 1,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_health_interval_secs() -> u64 {
    5
}

fn default_health_timeout_secs() -> u64 {
    3
}

fn default_health_path() -> String {
    "/health".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsConfig {
    /// Maximum samples kept per bucket.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Maximum sample age in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_recent_decisions")]
    pub recent_decisions: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_secs: default_window_secs(),
            recent_decisions: default_recent_decisions(),
        }
    }
}

impl StatsConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_window_size() -> usize {
    1000
}

fn default_window_secs() -> u64 {
    60
}

fn default_recent_decisions() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_delivery_failures")]
    pub max_delivery_failures: u32,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_delivery_failures: default_max_delivery_failures(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_delivery_failures() -> u32 {
    3
}

fn default_subscriber_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, port: u16) -> BackendSpec {
        BackendSpec::new(name, Url::parse(&format!("http://127.0.0.1:{port}")).unwrap())
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!(matches!(
            "random".parse::<StrategyKind>(),
            Err(RoutingError::UnknownStrategy(name)) if name == "random"
        ));
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = r#"
strategy: least-connections
backends:
  - name: ServerA
    url: http://localhost:5001
    role: video
  - name: ServerB
    url: http://localhost:5002
    weight: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.strategy, StrategyKind::LeastConnections);
        assert_eq!(config.backends[0].weight, 1);
        assert_eq!(config.backends[0].role.as_deref(), Some("video"));
        assert_eq!(config.backends[1].weight, 3);
        assert_eq!(config.failure_policy.unreachable_after, 3);
        assert_eq!(config.dispatch.timeout(), Duration::from_secs(10));
        assert!(config.retry.enabled);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_weight() {
        let mut config = Config::default();
        config.backends = vec![backend("a", 5001), backend("a", 5002)];
        assert!(config.validate().is_err());

        config.backends = vec![backend("a", 5001), backend("b", 5001)];
        assert!(config.validate().is_err());

        config.backends = vec![backend("a", 5001).with_weight(0)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_failure_policy() {
        let mut config = Config::default();
        config.failure_policy = FailurePolicy {
            degraded_after: 4,
            unreachable_after: 3,
        };
        assert!(config.validate().is_err());
    }
}
