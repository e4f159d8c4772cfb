mod backend;
mod pool;

pub use backend::{Backend, BackendMetrics, ConnectionGuard, LATENCY_SMOOTHING};
pub use pool::{BackendRegistry, Eligibility};
