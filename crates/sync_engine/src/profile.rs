//! Per-sensor decoding profile
//!
//! Resolved once from a [`SensorDescriptor`] when a source is opened and
//! handed to every batcher of that sensor.

use std::time::Duration;

use contracts::{ChanField, Frame, SensorDescriptor};
use ingestion::PacketFormat;

#[derive(Debug, Clone, PartialEq)]
pub struct SensorProfile {
    pub sensor: usize,
    pub format: PacketFormat,
    pub rows: usize,
    pub cols: usize,
    /// Channels the packet profile cannot carry at full precision
    pub lossy: &'static [ChanField],
    pub frame_period: Duration,
}

impl SensorProfile {
    pub fn from_descriptor(sensor: usize, desc: &SensorDescriptor) -> Self {
        Self {
            sensor,
            format: PacketFormat::from_descriptor(desc),
            rows: desc.rows(),
            cols: desc.columns(),
            lossy: desc.format.lidar_profile.lossy_fields(),
            frame_period: desc.frame_period(),
        }
    }

    /// Profiles of all sensors, in sensor order
    pub fn resolve_all(sensors: &[SensorDescriptor]) -> Vec<Self> {
        sensors
            .iter()
            .enumerate()
            .map(|(i, d)| Self::from_descriptor(i, d))
            .collect()
    }

    /// Empty frame with this sensor's geometry
    #[inline]
    pub fn new_frame(&self, frame_id: u32) -> Frame {
        Frame::new(frame_id, self.rows, self.cols)
    }

    pub fn is_lossless(&self, field: ChanField) -> bool {
        !self.lossy.contains(&field)
    }
}
