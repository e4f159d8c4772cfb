// src/load_balancer/algorithm.rs
use std::sync::Arc;

use super::{
    ContentBasedBalancer, DynamicBalancer, FileSizeBalancer, LeastConnectionsBalancer,
    RoundRobinBalancer, WeightedBalancer,
};
use crate::error::RoutingError;
use crate::registry::Backend;

use crate::config::StrategyKind;

/// Request attributes a strategy may consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext<'a> {
    /// First path segment of the request, e.g. `video` for `/video/a.mp4`.
    pub category: Option<&'a str>,
    /// Request path, query included.
    pub path: &'a str,
}

/// Per-variant selection. `backends` is the eligible set in registration order.
pub trait LoadBalancer: Send + Sync {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}

/// The active selection policy together with its private cursor state.
///
/// A fresh value always starts from the variant's initial state, so
/// replacing the active `Strategy` is how a switch resets state.
#[derive(Debug)]
pub enum Strategy {
    RoundRobin(RoundRobinBalancer),
    LeastConnections(LeastConnectionsBalancer),
    Weighted(WeightedBalancer),
    Dynamic(DynamicBalancer),
    ContentBased(ContentBasedBalancer),
    FileSize(FileSizeBalancer),
}

impl Strategy {
    pub fn new(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::RoundRobin => Strategy::RoundRobin(RoundRobinBalancer::new()),
            StrategyKind::LeastConnections => Strategy::LeastConnections(LeastConnectionsBalancer::new()),
            StrategyKind::Weighted => Strategy::Weighted(WeightedBalancer::new()),
            StrategyKind::Dynamic => Strategy::Dynamic(DynamicBalancer::new()),
            StrategyKind::ContentBased => Strategy::ContentBased(ContentBasedBalancer::new()),
            StrategyKind::FileSize => Strategy::FileSize(FileSizeBalancer::new()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::RoundRobin(_) => StrategyKind::RoundRobin,
            Strategy::LeastConnections(_) => StrategyKind::LeastConnections,
            Strategy::Weighted(_) => StrategyKind::Weighted,
            Strategy::Dynamic(_) => StrategyKind::Dynamic,
            Strategy::ContentBased(_) => StrategyKind::ContentBased,
            Strategy::FileSize(_) => StrategyKind::FileSize,
        }
    }

    fn balancer(&self) -> &dyn LoadBalancer {
        match self {
            Strategy::RoundRobin(lb) => lb,
            Strategy::LeastConnections(lb) => lb,
            Strategy::Weighted(lb) => lb,
            Strategy::Dynamic(lb) => lb,
            Strategy::ContentBased(lb) => lb,
            Strategy::FileSize(lb) => lb,
        }
    }

    pub fn select(
        &self,
        eligible: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Result<Arc<Backend>, RoutingError> {
        self.balancer()
            .select_backend(eligible, ctx)
            .ok_or(RoutingError::NoEligibleBackend)
    }

    pub fn name(&self) -> &'static str {
        self.balancer().name()
    }
}
