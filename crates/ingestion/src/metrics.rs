//! Ingestion metrics

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total records / datagrams read
    pub packets_read: AtomicU64,

    /// Packets handed to the pipeline
    pub packets_admitted: AtomicU64,

    /// Packets on ports no sensor claims
    pub packets_unmapped: AtomicU64,

    /// Packets dropped by the live receiver because the queue was full
    pub packets_dropped: AtomicU64,

    /// Size validation failures
    pub size_errors: AtomicU64,

    /// Sensor id validation failures
    pub id_errors: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        counter!("lidar_packets_read_total").increment(1);
    }

    pub fn record_admitted(&self) {
        self.packets_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmapped(&self) {
        self.packets_unmapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("lidar_packets_dropped_total").increment(1);
    }

    pub fn record_size_error(&self, sensor: usize) {
        self.size_errors.fetch_add(1, Ordering::Relaxed);
        counter!("lidar_validation_errors_total", "sensor" => sensor.to_string(), "kind" => "size")
            .increment(1);
    }

    pub fn record_id_error(&self, sensor: usize) {
        self.id_errors.fetch_add(1, Ordering::Relaxed);
        counter!("lidar_validation_errors_total", "sensor" => sensor.to_string(), "kind" => "id")
            .increment(1);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            packets_admitted: self.packets_admitted.load(Ordering::Relaxed),
            packets_unmapped: self.packets_unmapped.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            size_errors: self.size_errors.load(Ordering::Relaxed),
            id_errors: self.id_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_read: u64,
    pub packets_admitted: u64,
    pub packets_unmapped: u64,
    pub packets_dropped: u64,
    pub size_errors: u64,
    pub id_errors: u64,
}
