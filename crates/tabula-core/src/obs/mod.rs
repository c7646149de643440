//! Observability: metrics counters and the sink boundary that feeds them.
//! Logging goes through `tracing` directly at each call site.

pub mod metrics;
pub mod sink;
