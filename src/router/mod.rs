// src/router/mod.rs
mod decision;
mod dispatch;
mod engine;

pub use decision::RoutingDecision;
pub use dispatch::{DispatchError, DispatchResponse, Dispatcher, HttpDispatcher, RouteRequest};
pub use engine::{RoutingEngine, RoutingEngineBuilder, RoutingOutcome};
