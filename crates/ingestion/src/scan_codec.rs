//! Scan message codec
//!
//! Encodes a whole decoded frame as one container message payload.
//!
//! ```text
//! b"SCN1"  u32 frame_id  u32 rows  u32 cols
//! cols x (u64 timestamp  u16 measurement_id  u16 status)
//! rows*cols x u32 range, then u16 signal, u16 reflectivity, u16 near_ir
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{ColumnHeader, Frame, Result, ScanError};

const SCAN_MAGIC: &[u8; 4] = b"SCN1";
const PREFIX_BYTES: usize = 16;

pub fn encoded_len(rows: usize, cols: usize) -> usize {
    PREFIX_BYTES + cols * 12 + rows * cols * (4 + 2 * 3)
}

pub fn encode_frame(frame: &Frame) -> Bytes {
    let (rows, cols) = (frame.rows(), frame.cols());
    let mut buf = BytesMut::with_capacity(encoded_len(rows, cols));
    buf.put_slice(SCAN_MAGIC);
    buf.put_u32_le(frame.frame_id);
    buf.put_u32_le(rows as u32);
    buf.put_u32_le(cols as u32);
    for h in &frame.headers {
        buf.put_u64_le(h.timestamp);
        buf.put_u16_le(h.measurement_id);
        buf.put_u16_le(h.status);
    }
    frame.range.iter().for_each(|v| buf.put_u32_le(*v));
    for channel in [&frame.signal, &frame.reflectivity, &frame.near_ir] {
        channel.iter().for_each(|v| buf.put_u16_le(*v));
    }
    buf.freeze()
}

/// Decode a scan message; `offset` is only used for error reporting
pub fn decode_frame(payload: &[u8], offset: u64) -> Result<Frame> {
    let mut b = payload;
    if b.len() < PREFIX_BYTES || &b[..4] != SCAN_MAGIC {
        return Err(ScanError::corrupt(offset, "not a scan message"));
    }
    b.advance(4);
    let frame_id = b.get_u32_le();
    let rows = b.get_u32_le() as usize;
    let cols = b.get_u32_le() as usize;
    if payload.len() != encoded_len(rows, cols) {
        return Err(ScanError::corrupt(
            offset,
            format!(
                "scan message of {} bytes, expected {} for {rows}x{cols}",
                payload.len(),
                encoded_len(rows, cols)
            ),
        ));
    }

    let mut frame = Frame::new(frame_id, rows, cols);
    for h in frame.headers.iter_mut() {
        *h = ColumnHeader {
            timestamp: b.get_u64_le(),
            measurement_id: b.get_u16_le(),
            status: b.get_u16_le(),
        };
    }
    frame.range.iter_mut().for_each(|v| *v = b.get_u32_le());
    for channel in [&mut frame.signal, &mut frame.reflectivity, &mut frame.near_ir] {
        channel.iter_mut().for_each(|v| *v = b.get_u16_le());
    }
    Ok(frame)
}
