mod aggregator;
mod window;

pub use aggregator::{
    BackendStats, CompletedDecision, LoadSummary, StatsAggregator, StatsSnapshot, StrategyStats,
};
pub use window::{RollingWindow, Sample, WindowSummary};
