//! SensorDescriptor - per-sensor metadata
//!
//! Immutable configuration of one sensor, created when a source is opened
//! and shared read-only by every pipeline stage afterwards.

use std::time::Duration;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::ChanField;

/// Sensor metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Sensor serial number (checked against every lidar packet)
    pub serial: u64,

    /// Initialization id of the sensor session (checked against every lidar packet)
    pub init_id: u32,

    /// Product line, e.g. "OS-1-64"
    #[serde(default)]
    pub product_line: String,

    /// Firmware version string
    #[serde(default)]
    pub firmware: String,

    /// Destination UDP port of lidar packets
    #[serde(default)]
    pub udp_port_lidar: Option<u16>,

    /// Destination UDP port of IMU packets
    #[serde(default)]
    pub udp_port_imu: Option<u16>,

    /// Pixel geometry and packet profile
    pub format: DataFormat,

    /// Rotation rate (Hz)
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: f64,

    /// Beam altitude angles (degrees), one per row
    #[serde(default)]
    pub beam_altitude_angles: Vec<f64>,

    /// Beam azimuth offsets (degrees), one per row
    #[serde(default)]
    pub beam_azimuth_angles: Vec<f64>,

    /// Sensor-to-world extrinsic transform
    #[serde(default = "default_extrinsic")]
    pub extrinsic: Matrix4<f64>,
}

fn default_frequency_hz() -> f64 {
    10.0
}

fn default_extrinsic() -> Matrix4<f64> {
    Matrix4::identity()
}

impl SensorDescriptor {
    /// Rows of every frame produced by this sensor
    #[inline]
    pub fn rows(&self) -> usize {
        self.format.pixels_per_column
    }

    /// Columns of every frame produced by this sensor
    #[inline]
    pub fn columns(&self) -> usize {
        self.format.columns_per_frame
    }

    /// Nominal time between two frames
    pub fn frame_period(&self) -> Duration {
        if self.frequency_hz > 0.0 {
            Duration::from_secs_f64(1.0 / self.frequency_hz)
        } else {
            Duration::ZERO
        }
    }

    /// Short human-readable label used in logs
    pub fn label(&self) -> String {
        if self.product_line.is_empty() {
            format!("sn{}", self.serial)
        } else {
            format!("{} sn{}", self.product_line, self.serial)
        }
    }
}

/// Pixel geometry and packet profile of a sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormat {
    /// Beams per column (frame rows)
    pub pixels_per_column: usize,

    /// Columns per rotation (frame columns)
    pub columns_per_frame: usize,

    /// Columns carried by one lidar packet
    pub columns_per_packet: usize,

    /// Per-row pixel shift used for destaggering
    #[serde(default)]
    pub pixel_shift_by_row: Vec<i32>,

    /// Lidar packet profile
    #[serde(default)]
    pub lidar_profile: LidarProfile,
}

impl DataFormat {
    /// Packets needed to carry one full frame
    pub fn packets_per_frame(&self) -> usize {
        if self.columns_per_packet == 0 {
            return 0;
        }
        self.columns_per_frame.div_ceil(self.columns_per_packet)
    }
}

/// Lidar packet profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LidarProfile {
    /// Full precision range, signal, reflectivity and near-IR
    #[default]
    Legacy,
    /// Range in 8 mm units, 8-bit reflectivity and near-IR, no signal
    LowDataRate,
}

impl LidarProfile {
    /// Channel fields that do not survive an encode/decode cycle exactly
    pub fn lossy_fields(&self) -> &'static [ChanField] {
        match self {
            LidarProfile::Legacy => &[],
            LidarProfile::LowDataRate => &[ChanField::Range, ChanField::Signal, ChanField::NearIr],
        }
    }

    /// Whether the field is carried exactly by this profile
    pub fn is_lossless(&self, field: ChanField) -> bool {
        !self.lossy_fields().contains(&field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_json() -> &'static str {
        r#"{
            "serial": 992109000123,
            "init_id": 5431,
            "product_line": "OS-1-64",
            "udp_port_lidar": 7502,
            "format": {
                "pixels_per_column": 64,
                "columns_per_frame": 1024,
                "columns_per_packet": 16
            }
        }"#
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc: SensorDescriptor = serde_json::from_str(descriptor_json()).unwrap();
        assert_eq!(desc.rows(), 64);
        assert_eq!(desc.columns(), 1024);
        assert_eq!(desc.udp_port_imu, None);
        assert_eq!(desc.format.lidar_profile, LidarProfile::Legacy);
        assert_eq!(desc.extrinsic, Matrix4::identity());
        assert_eq!(desc.frame_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_packets_per_frame_rounds_up() {
        let mut desc: SensorDescriptor = serde_json::from_str(descriptor_json()).unwrap();
        assert_eq!(desc.format.packets_per_frame(), 64);
        desc.format.columns_per_packet = 100;
        assert_eq!(desc.format.packets_per_frame(), 11);
    }

    #[test]
    fn test_lossy_fields() {
        assert!(LidarProfile::Legacy.is_lossless(ChanField::Range));
        assert!(!LidarProfile::LowDataRate.is_lossless(ChanField::Range));
        assert!(LidarProfile::LowDataRate.is_lossless(ChanField::Reflectivity));
    }
}
