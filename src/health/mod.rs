// src/health/mod.rs
mod checker;
mod status;

pub use checker::{HealthCheckResult, HealthChecker};
pub use status::{HealthStatus, HealthTransition};
