//! Lidar packet format
//!
//! Little-endian layout:
//!
//! ```text
//! header (20 bytes)
//!   u16 packet_type   u16 reserved   u32 frame_id   u32 init_id   u64 serial
//! columns_per_packet x column
//!   u64 timestamp     u16 measurement_id            u16 status
//!   pixels_per_column x pixel
//!     legacy        u32 range  u16 signal  u16 reflectivity  u16 near_ir  u16 reserved
//!     low data rate u16 range/8             u8 reflectivity   u8 near_ir
//! ```
//!
//! IMU packets are a fixed 48-byte block.
//!
//! A [`PacketFormat`] is resolved once per sensor when a source is opened and
//! passed explicitly to everything that decodes or validates packets.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{ColumnHeader, Frame, LidarProfile, SensorDescriptor};

pub const PACKET_TYPE_LIDAR: u16 = 0x0001;
pub const HEADER_BYTES: usize = 20;
pub const COLUMN_HEADER_BYTES: usize = 12;
pub const IMU_PACKET_BYTES: usize = 48;

/// Measurement id written into padding columns of the last packet of a frame
pub const PADDING_MEASUREMENT_ID: u16 = u16::MAX;

/// Result of checking a lidar packet against its sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketValidation {
    Ok,
    SizeMismatch { expected: usize, actual: usize },
    IdMismatch { serial: u64, init_id: u32 },
}

/// Per-sensor packet format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFormat {
    pub profile: LidarProfile,
    pub pixels_per_column: usize,
    pub columns_per_packet: usize,
    pub columns_per_frame: usize,
    pub serial: u64,
    pub init_id: u32,
}

impl PacketFormat {
    pub fn from_descriptor(desc: &SensorDescriptor) -> Self {
        Self {
            profile: desc.format.lidar_profile,
            pixels_per_column: desc.format.pixels_per_column,
            columns_per_packet: desc.format.columns_per_packet,
            columns_per_frame: desc.format.columns_per_frame,
            serial: desc.serial,
            init_id: desc.init_id,
        }
    }

    #[inline]
    pub fn pixel_bytes(&self) -> usize {
        match self.profile {
            LidarProfile::Legacy => 12,
            LidarProfile::LowDataRate => 4,
        }
    }

    #[inline]
    pub fn column_bytes(&self) -> usize {
        COLUMN_HEADER_BYTES + self.pixels_per_column * self.pixel_bytes()
    }

    /// Exact size of one lidar packet
    #[inline]
    pub fn lidar_packet_size(&self) -> usize {
        HEADER_BYTES + self.columns_per_packet * self.column_bytes()
    }

    /// Frame id of a lidar packet (no size check beyond the header)
    pub fn frame_id(buf: &[u8]) -> Option<u32> {
        let mut b = buf.get(4..8)?;
        Some(b.get_u32_le())
    }

    /// `(serial, init_id)` of a lidar packet
    pub fn sensor_ids(buf: &[u8]) -> Option<(u64, u32)> {
        let mut b = buf.get(8..HEADER_BYTES)?;
        let init_id = b.get_u32_le();
        let serial = b.get_u64_le();
        Some((serial, init_id))
    }

    /// Size check first, then sensor identity
    pub fn validate(&self, buf: &[u8]) -> PacketValidation {
        let expected = self.lidar_packet_size();
        if buf.len() != expected {
            return PacketValidation::SizeMismatch {
                expected,
                actual: buf.len(),
            };
        }
        match Self::sensor_ids(buf) {
            Some((serial, init_id)) if serial == self.serial && init_id == self.init_id => {
                PacketValidation::Ok
            }
            Some((serial, init_id)) => PacketValidation::IdMismatch { serial, init_id },
            None => PacketValidation::SizeMismatch {
                expected,
                actual: buf.len(),
            },
        }
    }

    /// Column header `i` of a packet
    pub fn column_header(&self, buf: &[u8], i: usize) -> Option<ColumnHeader> {
        let start = HEADER_BYTES + i * self.column_bytes();
        let mut b = buf.get(start..start + COLUMN_HEADER_BYTES)?;
        Some(ColumnHeader {
            timestamp: b.get_u64_le(),
            measurement_id: b.get_u16_le(),
            status: b.get_u16_le(),
        })
    }

    /// Write every valid column of a packet into `frame` at its measurement id
    ///
    /// Columns whose status is not valid, and columns whose measurement id is
    /// outside the frame, are skipped. Returns the number of columns written.
    pub fn decode_into(&self, buf: &[u8], frame: &mut Frame) -> usize {
        if buf.len() < self.lidar_packet_size() {
            return 0;
        }
        let mut written = 0;
        for i in 0..self.columns_per_packet {
            let Some(header) = self.column_header(buf, i) else {
                break;
            };
            let col = usize::from(header.measurement_id);
            if !header.is_valid() || col >= frame.cols() {
                continue;
            }
            frame.headers[col] = header;

            let mut px = &buf[HEADER_BYTES + i * self.column_bytes() + COLUMN_HEADER_BYTES..];
            let rows = self.pixels_per_column.min(frame.rows());
            for row in 0..rows {
                let at = row * frame.cols() + col;
                match self.profile {
                    LidarProfile::Legacy => {
                        frame.range[at] = px.get_u32_le();
                        frame.signal[at] = px.get_u16_le();
                        frame.reflectivity[at] = px.get_u16_le();
                        frame.near_ir[at] = px.get_u16_le();
                        px.advance(2);
                    }
                    LidarProfile::LowDataRate => {
                        frame.range[at] = u32::from(px.get_u16_le()) * 8;
                        frame.signal[at] = 0;
                        frame.reflectivity[at] = u16::from(px.get_u8());
                        frame.near_ir[at] = u16::from(px.get_u8());
                    }
                }
            }
            written += 1;
        }
        written
    }
}

/// Encodes frames back to lidar packets
#[derive(Debug, Clone)]
pub struct PacketWriter {
    format: PacketFormat,
}

impl PacketWriter {
    pub fn new(format: PacketFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &PacketFormat {
        &self.format
    }

    /// Split a frame into packets of `columns_per_packet` columns
    ///
    /// Columns that were never captured are written with their (invalid)
    /// header so that decoding skips them; the tail of the last packet is
    /// padded with invalid columns.
    pub fn encode(&self, frame: &Frame) -> Vec<Bytes> {
        let f = &self.format;
        let cols = frame.cols();
        let per_packet = f.columns_per_packet.max(1);
        let mut packets = Vec::with_capacity(cols.div_ceil(per_packet));

        for first in (0..cols).step_by(per_packet) {
            let mut buf = BytesMut::with_capacity(f.lidar_packet_size());
            buf.put_u16_le(PACKET_TYPE_LIDAR);
            buf.put_u16_le(0);
            buf.put_u32_le(frame.frame_id);
            buf.put_u32_le(f.init_id);
            buf.put_u64_le(f.serial);

            for col in first..first + per_packet {
                if col < cols {
                    self.put_column(&mut buf, frame, col);
                } else {
                    self.put_padding(&mut buf);
                }
            }
            packets.push(buf.freeze());
        }
        packets
    }

    fn put_column(&self, buf: &mut BytesMut, frame: &Frame, col: usize) {
        let header = frame.headers[col];
        buf.put_u64_le(header.timestamp);
        buf.put_u16_le(col as u16);
        buf.put_u16_le(header.status);

        for row in 0..self.format.pixels_per_column {
            let in_frame = row < frame.rows();
            let at = row * frame.cols() + col;
            let (range, signal, refl, nir) = if in_frame {
                (
                    frame.range[at],
                    frame.signal[at],
                    frame.reflectivity[at],
                    frame.near_ir[at],
                )
            } else {
                (0, 0, 0, 0)
            };
            match self.format.profile {
                LidarProfile::Legacy => {
                    buf.put_u32_le(range);
                    buf.put_u16_le(signal);
                    buf.put_u16_le(refl);
                    buf.put_u16_le(nir);
                    buf.put_u16_le(0);
                }
                LidarProfile::LowDataRate => {
                    buf.put_u16_le((range / 8).min(u32::from(u16::MAX)) as u16);
                    buf.put_u8(refl.min(u16::from(u8::MAX)) as u8);
                    buf.put_u8(nir.min(u16::from(u8::MAX)) as u8);
                }
            }
        }
    }

    fn put_padding(&self, buf: &mut BytesMut) {
        buf.put_u64_le(0);
        buf.put_u16_le(PADDING_MEASUREMENT_ID);
        buf.put_u16_le(0);
        buf.put_bytes(0, self.format.pixels_per_column * self.format.pixel_bytes());
    }
}

/// Encode an IMU packet
pub fn encode_imu(sys_ts: u64, accel: [f32; 3], gyro: [f32; 3]) -> Bytes {
    let mut buf = BytesMut::with_capacity(IMU_PACKET_BYTES);
    buf.put_u64_le(sys_ts);
    buf.put_u64_le(sys_ts);
    buf.put_u64_le(sys_ts);
    for v in accel.iter().chain(gyro.iter()) {
        buf.put_f32_le(*v);
    }
    buf.freeze()
}
