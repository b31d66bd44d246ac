//! Metrics sink seam
//!
//! The core emits counters and histograms through `MetricsSink`; wiring to
//! a real telemetry backend lives outside this workspace.

use log::debug;

pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &'static str, value: u64);
    fn histogram(&self, name: &'static str, value: f64);
}

/// Writes every emission to the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn counter(&self, name: &'static str, value: u64) {
        debug!("metric counter {} += {}", name, value);
    }

    fn histogram(&self, name: &'static str, value: f64) {
        debug!("metric histogram {} = {:.3}", name, value);
    }
}
