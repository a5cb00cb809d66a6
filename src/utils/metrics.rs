//! Pipeline metrics for Strix
//!
//! Lock-free counters updated by the pipeline stages and readable from any
//! thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Counters covering the life of one pipeline
#[derive(Debug)]
pub struct PipelineMetrics {
    /// Start time
    pub start_time: SystemTime,
    /// Packets pulled from the source
    packets_read: AtomicU64,
    /// Results delivered to the sink
    packets_delivered: AtomicU64,
    /// Batches sent downstream by the emitter
    batches_emitted: AtomicU64,
    /// Flow rows created
    flows_created: AtomicU64,
    /// Flow rows destroyed
    flows_destroyed: AtomicU64,
    /// Packets refused because a shard hit its flow budget
    max_flows_hits: AtomicU64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            start_time: SystemTime::now(),
            packets_read: AtomicU64::new(0),
            packets_delivered: AtomicU64::new(0),
            batches_emitted: AtomicU64::new(0),
            flows_created: AtomicU64::new(0),
            flows_destroyed: AtomicU64::new(0),
            max_flows_hits: AtomicU64::new(0),
        }
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet_read(&self) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_delivered(&self) {
        self.packets_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_emitted(&self) {
        self.batches_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flow_created(&self) {
        self.flows_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flow_destroyed(&self) {
        self.flows_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_max_flows_hit(&self) {
        self.max_flows_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read.load(Ordering::Relaxed)
    }

    pub fn packets_delivered(&self) -> u64 {
        self.packets_delivered.load(Ordering::Relaxed)
    }

    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted.load(Ordering::Relaxed)
    }

    pub fn flows_created(&self) -> u64 {
        self.flows_created.load(Ordering::Relaxed)
    }

    pub fn flows_destroyed(&self) -> u64 {
        self.flows_destroyed.load(Ordering::Relaxed)
    }

    pub fn max_flows_hits(&self) -> u64 {
        self.max_flows_hits.load(Ordering::Relaxed)
    }

    /// Flows currently live across all shards
    pub fn active_flows(&self) -> u64 {
        self.flows_created().saturating_sub(self.flows_destroyed())
    }

    /// Packets read per second since start
    pub fn packets_per_second(&self) -> f64 {
        match self.start_time.elapsed() {
            Ok(elapsed) if elapsed.as_secs_f64() > 0.0 => {
                self.packets_read() as f64 / elapsed.as_secs_f64()
            }
            _ => 0.0,
        }
    }

    /// Format metrics as a string
    pub fn format(&self) -> String {
        let uptime_secs = self
            .start_time
            .elapsed()
            .map(|e| e.as_secs_f64())
            .unwrap_or(0.0);
        format!(
            "Uptime: {:.1}s\n\
             Packets: {} read, {} delivered\n\
             Batches: {}\n\
             Flows: {} live ({} created, {} destroyed, {} refused)\n\
             Throughput: {:.2} packets/sec",
            uptime_secs,
            self.packets_read(),
            self.packets_delivered(),
            self.batches_emitted(),
            self.active_flows(),
            self.flows_created(),
            self.flows_destroyed(),
            self.max_flows_hits(),
            self.packets_per_second(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_active_flows() {
        let metrics = PipelineMetrics::new();
        metrics.record_flow_created();
        metrics.record_flow_created();
        metrics.record_flow_destroyed();
        assert_eq!(metrics.active_flows(), 1);

        metrics.record_packet_read();
        metrics.record_packet_delivered();
        assert_eq!(metrics.packets_read(), 1);
        assert_eq!(metrics.packets_delivered(), 1);
    }
}
