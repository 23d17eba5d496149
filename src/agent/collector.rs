//! Host metric sampling

use sysinfo::System;
use tracing::trace;

use crate::Metric;

/// Name of the counter incremented on every poll
pub const POLL_COUNT: &str = "PollCount";

/// Build the gauge set from raw host readings
///
/// Memory figures are in bytes, CPU usage in percent, one gauge per core
/// numbered from 1.
pub fn host_gauges(total: u64, free: u64, used: u64, cpu_usage: &[f32]) -> Vec<Metric> {
    let mut gauges = vec![
        Metric::gauge("TotalMemory", total as f64),
        Metric::gauge("FreeMemory", free as f64),
        Metric::gauge("UsedMemory", used as f64),
    ];

    gauges.extend(
        cpu_usage
            .iter()
            .enumerate()
            .map(|(i, usage)| Metric::gauge(format!("CPUutilization{}", i + 1), *usage as f64)),
    );

    gauges
}

/// Samples memory and CPU usage of the local host
///
/// Gauges hold the reading of the latest poll. The poll counter keeps
/// growing until a report drains it.
pub struct HostSampler {
    system: System,
    gauges: Vec<Metric>,
    poll_count: i64,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            gauges: Vec::new(),
            poll_count: 0,
        }
    }

    /// Refresh readings and count the poll
    pub fn poll(&mut self) {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let usage: Vec<f32> = self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();

        self.gauges = host_gauges(
            self.system.total_memory(),
            self.system.free_memory(),
            self.system.used_memory(),
            &usage,
        );
        self.poll_count += 1;

        trace!("polled {} gauges (poll #{})", self.gauges.len(), self.poll_count);
    }

    /// Gauges of the latest poll
    pub fn gauges(&self) -> &[Metric] {
        &self.gauges
    }

    /// Polls not yet handed to a report
    pub fn pending_polls(&self) -> i64 {
        self.poll_count
    }

    /// Take the pending poll count, resetting it to zero
    pub fn take_poll_count(&mut self) -> i64 {
        std::mem::take(&mut self.poll_count)
    }

    /// Give back a poll count that could not be delivered
    pub fn restore_poll_count(&mut self, delta: i64) {
        self.poll_count = self.poll_count.saturating_add(delta);
    }

    /// Everything a report should send, draining the poll count
    pub fn drain_report(&mut self) -> (Vec<Metric>, i64) {
        let delta = self.take_poll_count();
        let mut metrics = self.gauges.clone();
        metrics.push(Metric::counter(POLL_COUNT, delta));
        (metrics, delta)
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}
