//! Metrics Module
//!
//! Prometheus counters for refreshes and named context builds.

pub mod collector;
pub mod server;

pub use collector::{Metrics, MetricsSummary};
pub use server::MetricsServer;
