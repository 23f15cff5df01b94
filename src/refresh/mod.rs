//! Usage Refresh Engine: per-profile fetch, retry, breaker and scheduling.

pub mod circuit_breaker;
pub mod engine;
pub mod scheduler;
pub mod thresholds;

pub use engine::{RefreshEngine, RefreshOutcome};
pub use scheduler::RefreshScheduler;
