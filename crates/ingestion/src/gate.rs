//! Packet admission policy shared by packet sources
//!
//! Size mismatches are always dropped (the packet cannot be decoded). Id
//! mismatches are dropped in strict mode and passed through in soft mode.
//! Both are counted per sensor either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use contracts::{
    ImuPacket, LidarPacket, Packet, PacketKind, Result, ScanError, SensorDescriptor,
    ValidationCounts,
};
use tracing::{trace, warn};

use crate::format::{PacketFormat, PacketValidation, IMU_PACKET_BYTES};
use crate::metrics::IngestionMetrics;

#[derive(Debug, Default)]
struct Counters {
    size: AtomicU64,
    id: AtomicU64,
}

/// Port map plus validation state of a packet source
#[derive(Debug)]
pub struct PacketGate {
    formats: Vec<PacketFormat>,
    ports: HashMap<u16, (usize, PacketKind)>,
    counters: Vec<Counters>,
    soft_id_check: bool,
    metrics: Arc<IngestionMetrics>,
}

impl PacketGate {
    /// Build the port map from the descriptors
    ///
    /// # Errors
    /// `PortCollision` when two sensors (or the lidar and imu stream of one
    /// sensor) share a port.
    pub fn new(
        sensors: &[SensorDescriptor],
        soft_id_check: bool,
        metrics: Arc<IngestionMetrics>,
    ) -> Result<Self> {
        let mut ports: HashMap<u16, (usize, PacketKind)> = HashMap::new();
        for (sensor, desc) in sensors.iter().enumerate() {
            let streams = [
                (desc.udp_port_lidar, PacketKind::Lidar),
                (desc.udp_port_imu, PacketKind::Imu),
            ];
            for (port, kind) in streams {
                let Some(port) = port else { continue };
                if let Some(&(first, _)) = ports.get(&port) {
                    return Err(ScanError::PortCollision {
                        port,
                        first,
                        second: sensor,
                    });
                }
                ports.insert(port, (sensor, kind));
            }
        }

        Ok(Self {
            formats: sensors.iter().map(PacketFormat::from_descriptor).collect(),
            ports,
            counters: sensors.iter().map(|_| Counters::default()).collect(),
            soft_id_check,
            metrics,
        })
    }

    pub fn formats(&self) -> &[PacketFormat] {
        &self.formats
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    /// Sensor and stream kind a port belongs to
    pub fn lookup(&self, port: u16) -> Option<(usize, PacketKind)> {
        self.ports.get(&port).copied()
    }

    /// Validate and wrap a payload; `None` when the packet is dropped
    pub fn admit(&self, sensor: usize, kind: PacketKind, payload: Bytes, host_timestamp: u64) -> Option<Packet> {
        let counters = self.counters.get(sensor)?;
        match kind {
            PacketKind::Imu => {
                if payload.len() != IMU_PACKET_BYTES {
                    counters.size.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_size_error(sensor);
                    trace!(sensor, len = payload.len(), "imu packet size mismatch");
                    return None;
                }
                Some(Packet::Imu(ImuPacket {
                    buf: payload,
                    host_timestamp,
                }))
            }
            PacketKind::Lidar => {
                match self.formats[sensor].validate(&payload) {
                    PacketValidation::Ok => {}
                    PacketValidation::SizeMismatch { expected, actual } => {
                        counters.size.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_size_error(sensor);
                        trace!(sensor, expected, actual, "lidar packet size mismatch");
                        return None;
                    }
                    PacketValidation::IdMismatch { serial, init_id } => {
                        let n = counters.id.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_id_error(sensor);
                        if n == 0 {
                            warn!(
                                sensor,
                                serial,
                                init_id,
                                soft = self.soft_id_check,
                                "lidar packet id mismatch"
                            );
                        }
                        if !self.soft_id_check {
                            return None;
                        }
                    }
                }
                Some(Packet::Lidar(LidarPacket {
                    buf: payload,
                    host_timestamp,
                }))
            }
        }
    }

    pub fn counts(&self) -> Vec<ValidationCounts> {
        self.counters
            .iter()
            .map(|c| ValidationCounts {
                size_errors: c.size.load(Ordering::Relaxed),
                id_errors: c.id.load(Ordering::Relaxed),
            })
            .collect()
    }
}
