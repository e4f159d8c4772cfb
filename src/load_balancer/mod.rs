// src/load_balancer/mod.rs
mod algorithm;
mod content_based;
mod dynamic;
mod file_size;
mod least_connections;
mod round_robin;
mod weighted;

pub use algorithm::{LoadBalancer, SelectionContext, Strategy};
pub use content_based::{request_category, ContentBasedBalancer};
pub use dynamic::DynamicBalancer;
pub use file_size::{is_large_file, FileSizeBalancer};
pub use least_connections::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedBalancer;
pub use crate::config::StrategyKind;

use std::sync::Arc;

pub fn create_strategy(kind: StrategyKind) -> Arc<Strategy> {
    tracing::debug!(strategy = %kind, "Initialising strategy state");
    Arc::new(Strategy::new(kind))
}
