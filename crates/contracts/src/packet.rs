//! Raw packet types
//!
//! A packet is transient: owned by the producer until the batcher consumes it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Lidar packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LidarPacket {
    pub buf: Bytes,
    /// Host capture timestamp (ns)
    pub host_timestamp: u64,
}

/// IMU packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImuPacket {
    pub buf: Bytes,
    /// Host capture timestamp (ns)
    pub host_timestamp: u64,
}

/// Packet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Lidar,
    Imu,
}

/// Any packet produced by a packet source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Lidar(LidarPacket),
    Imu(ImuPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Lidar(_) => PacketKind::Lidar,
            Packet::Imu(_) => PacketKind::Imu,
        }
    }

    pub fn buf(&self) -> &Bytes {
        match self {
            Packet::Lidar(p) => &p.buf,
            Packet::Imu(p) => &p.buf,
        }
    }

    pub fn host_timestamp(&self) -> u64 {
        match self {
            Packet::Lidar(p) => p.host_timestamp,
            Packet::Imu(p) => p.host_timestamp,
        }
    }
}

/// Packet tagged with its sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorPacket {
    /// Sensor index assigned at source open time
    pub sensor: usize,
    /// Seek offset of the packet record, when the source is seekable
    pub offset: Option<u64>,
    pub packet: Packet,
}

/// Validation error counters of one sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCounts {
    /// Packets whose size did not match the sensor's packet format
    pub size_errors: u64,
    /// Packets whose serial / init id did not match the descriptor
    pub id_errors: u64,
}

impl ValidationCounts {
    pub fn total(&self) -> u64 {
        self.size_errors + self.id_errors
    }
}

impl std::ops::Add for ValidationCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            size_errors: self.size_errors + rhs.size_errors,
            id_errors: self.id_errors + rhs.id_errors,
        }
    }
}
