//! # Ingestion
//!
//! Packet-level input of the scan pipeline.
//!
//! Responsibilities:
//! - Lidar packet format: validation, column decoding, re-encoding
//! - Capture files and the capture packet source (seekable, pace-able)
//! - Live UDP packet source (receiver threads, bounded queue, timeout)
//! - Port mapping, port guessing and validation counters
//! - In-memory indexed container of encoded scan messages
//!
//! ## Usage Example
//!
//! ```no_run
//! use contracts::PacketMultiSource;
//! use ingestion::{CaptureOptions, CapturePacketSource};
//! use std::path::Path;
//!
//! # fn run(sensors: Vec<contracts::SensorDescriptor>) -> contracts::Result<()> {
//! let source = CapturePacketSource::open(Path::new("drive.cap"), sensors, CaptureOptions::default())?;
//! while let Some(p) = source.next_packet()? {
//!     println!("sensor {} at {:?}", p.sensor, p.offset);
//! }
//! # Ok(())
//! # }
//! ```

mod capture;
mod capture_source;
mod container;
mod format;
mod gate;
mod metrics;
mod scan_codec;
mod udp_source;

// Re-exports
pub use capture::{CaptureReader, CaptureRecord, CaptureWriter, FILE_HEADER_BYTES};
pub use capture_source::{CaptureOptions, CapturePacketSource, PORT_GUESS_RECORDS};
pub use container::{ContainerBuilder, MemoryContainer};
pub use format::{
    encode_imu, PacketFormat, PacketValidation, PacketWriter, HEADER_BYTES, IMU_PACKET_BYTES,
};
pub use gate::PacketGate;
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use scan_codec::{decode_frame, encode_frame};
pub use udp_source::{UdpOptions, UdpPacketSource};
