// src/health/status.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Health of a backend as seen by the router.
///
/// `Degraded` backends stay eligible; only `Unreachable` ones are skipped.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy = 0,
    Degraded = 1,
    Unreachable = 2,
}

impl HealthStatus {
    pub fn is_eligible(&self) -> bool {
        *self != HealthStatus::Unreachable
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unreachable => "unreachable",
        }
    }
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unreachable,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unreachable" => Ok(HealthStatus::Unreachable),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

/// A health change applied to one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthTransition {
    pub backend_id: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_round_trip() {
        for status in [HealthStatus::Healthy, HealthStatus::Degraded, HealthStatus::Unreachable] {
            assert_eq!(HealthStatus::from(status as u8), status);
            assert_eq!(status.as_str().parse::<HealthStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_only_unreachable_is_ineligible() {
        assert!(HealthStatus::Healthy.is_eligible());
        assert!(HealthStatus::Degraded.is_eligible());
        assert!(!HealthStatus::Unreachable.is_eligible());
    }
}
