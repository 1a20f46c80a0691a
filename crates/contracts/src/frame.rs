//! Frame - one decoded rotation of a single sensor
//!
//! Dense row-major channel arrays plus per-column headers. Dimensions are
//! fixed per sensor for the lifetime of a source.

use serde::{Deserialize, Serialize};

/// Channel field identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChanField {
    Range,
    Signal,
    Reflectivity,
    NearIr,
}

impl ChanField {
    pub const ALL: [ChanField; 4] = [
        ChanField::Range,
        ChanField::Signal,
        ChanField::Reflectivity,
        ChanField::NearIr,
    ];
}

/// Per-column header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeader {
    /// Sensor clock timestamp (ns)
    pub timestamp: u64,
    /// Azimuth position of the column within the rotation
    pub measurement_id: u16,
    /// Status word, bit 0 set when the column was captured
    pub status: u16,
}

impl ColumnHeader {
    pub const STATUS_VALID: u16 = 0x0001;

    pub fn valid(timestamp: u64, measurement_id: u16) -> Self {
        Self {
            timestamp,
            measurement_id,
            status: Self::STATUS_VALID,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.status & Self::STATUS_VALID != 0
    }
}

/// Decoded scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Rotation counter reported by the sensor
    pub frame_id: u32,
    rows: usize,
    cols: usize,
    /// Range (mm)
    pub range: Vec<u32>,
    pub signal: Vec<u16>,
    pub reflectivity: Vec<u16>,
    pub near_ir: Vec<u16>,
    /// One header per column
    pub headers: Vec<ColumnHeader>,
}

impl Frame {
    /// Create an empty frame, every column marked as not captured
    pub fn new(frame_id: u32, rows: usize, cols: usize) -> Self {
        let pixels = rows * cols;
        Self {
            frame_id,
            rows,
            cols,
            range: vec![0; pixels],
            signal: vec![0; pixels],
            reflectivity: vec![0; pixels],
            near_ir: vec![0; pixels],
            headers: vec![ColumnHeader::default(); cols],
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Read one pixel, widened to u32
    pub fn pixel(&self, field: ChanField, row: usize, col: usize) -> u32 {
        let i = self.offset(row, col);
        match field {
            ChanField::Range => self.range[i],
            ChanField::Signal => u32::from(self.signal[i]),
            ChanField::Reflectivity => u32::from(self.reflectivity[i]),
            ChanField::NearIr => u32::from(self.near_ir[i]),
        }
    }

    /// Write one pixel; 16-bit fields keep the low 16 bits
    pub fn set_pixel(&mut self, field: ChanField, row: usize, col: usize, value: u32) {
        let i = self.offset(row, col);
        match field {
            ChanField::Range => self.range[i] = value,
            ChanField::Signal => self.signal[i] = value as u16,
            ChanField::Reflectivity => self.reflectivity[i] = value as u16,
            ChanField::NearIr => self.near_ir[i] = value as u16,
        }
    }

    /// Number of columns whose status marks a valid capture
    pub fn valid_columns(&self) -> usize {
        self.headers.iter().filter(|h| h.is_valid()).count()
    }

    /// True iff every column was captured
    pub fn is_complete(&self) -> bool {
        self.headers.iter().all(ColumnHeader::is_valid)
    }

    /// Representative timestamp: first valid column timestamp
    pub fn timestamp(&self) -> Option<u64> {
        self.headers.iter().find(|h| h.is_valid()).map(|h| h.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_is_empty() {
        let frame = Frame::new(3, 4, 8);
        assert_eq!(frame.range.len(), 32);
        assert_eq!(frame.valid_columns(), 0);
        assert!(!frame.is_complete());
        assert_eq!(frame.timestamp(), None);
    }

    #[test]
    fn test_timestamp_skips_invalid_columns() {
        let mut frame = Frame::new(0, 2, 4);
        frame.headers[0] = ColumnHeader {
            timestamp: 10,
            measurement_id: 0,
            status: 0,
        };
        frame.headers[2] = ColumnHeader::valid(30, 2);
        frame.headers[3] = ColumnHeader::valid(40, 3);
        assert_eq!(frame.timestamp(), Some(30));
        assert_eq!(frame.valid_columns(), 2);
        assert!(!frame.is_complete());

        frame.headers[0] = ColumnHeader::valid(10, 0);
        frame.headers[1] = ColumnHeader::valid(20, 1);
        assert!(frame.is_complete());
        assert_eq!(frame.timestamp(), Some(10));
    }

    #[test]
    fn test_pixel_access() {
        let mut frame = Frame::new(0, 2, 3);
        frame.set_pixel(ChanField::Range, 1, 2, 123_456);
        frame.set_pixel(ChanField::NearIr, 0, 1, 77);
        assert_eq!(frame.pixel(ChanField::Range, 1, 2), 123_456);
        assert_eq!(frame.range[5], 123_456);
        assert_eq!(frame.pixel(ChanField::NearIr, 0, 1), 77);
        assert_eq!(frame.pixel(ChanField::Signal, 0, 1), 0);
    }
}
