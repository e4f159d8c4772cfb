mod strategy;

pub use strategy::{RetryDecision, RetryPolicy};
