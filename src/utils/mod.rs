// Utils

pub mod common;
pub mod prometheus_metrics;
