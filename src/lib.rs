// src/lib.rs
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod router;
pub mod server;
pub mod stats;

pub use config::{BackendSpec, Config, StrategyKind};
pub use error::RoutingError;
pub use router::{RouteRequest, RoutingEngine, RoutingOutcome};
