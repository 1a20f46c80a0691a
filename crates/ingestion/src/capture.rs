//! Packet capture files
//!
//! ```text
//! file header (8 bytes)   b"LCAP"  u16 version  u16 reserved
//! record                  u64 host_timestamp  u16 dst_port  u32 len  [len bytes]
//! ```
//!
//! All integers little-endian. Record offsets are stable byte positions and
//! can be fed back to [`CaptureReader::seek`].

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use contracts::{Result, ScanError};

pub const CAPTURE_MAGIC: &[u8; 4] = b"LCAP";
pub const CAPTURE_VERSION: u16 = 1;
pub const FILE_HEADER_BYTES: u64 = 8;
const RECORD_HEADER_BYTES: usize = 14;
const MAX_PAYLOAD_BYTES: u32 = 65_535;

/// One captured datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    /// Byte offset of the record header
    pub offset: u64,
    pub host_timestamp: u64,
    pub dst_port: u16,
    pub payload: Bytes,
}

/// Sequential reader with seek support
#[derive(Debug)]
pub struct CaptureReader<R> {
    inner: R,
    position: u64,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> CaptureReader<R> {
    /// Wrap a stream positioned at the file header
    pub fn new(mut inner: R) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; FILE_HEADER_BYTES as usize];
        inner
            .read_exact(&mut header)
            .map_err(|_| ScanError::corrupt(0, "truncated capture header"))?;
        if &header[..4] != CAPTURE_MAGIC {
            return Err(ScanError::corrupt(0, "not a capture file"));
        }
        let version = (&header[4..6]).get_u16_le();
        if version != CAPTURE_VERSION {
            return Err(ScanError::corrupt(
                4,
                format!("unsupported capture version {version}"),
            ));
        }
        Ok(Self {
            inner,
            position: FILE_HEADER_BYTES,
        })
    }

    /// Offset of the next record
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset < FILE_HEADER_BYTES {
            return Err(ScanError::corrupt(offset, "seek into capture header"));
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Rewind to the first record
    pub fn reset(&mut self) -> Result<()> {
        self.seek(FILE_HEADER_BYTES)
    }

    /// Next record, `None` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<CaptureRecord>> {
        let offset = self.position;
        let mut header = [0u8; RECORD_HEADER_BYTES];
        match read_full(&mut self.inner, &mut header)? {
            0 => return Ok(None),
            n if n < RECORD_HEADER_BYTES => {
                return Err(ScanError::corrupt(offset, "truncated record header"));
            }
            _ => {}
        }

        let mut h = &header[..];
        let host_timestamp = h.get_u64_le();
        let dst_port = h.get_u16_le();
        let len = h.get_u32_le();
        if len > MAX_PAYLOAD_BYTES {
            return Err(ScanError::corrupt(
                offset,
                format!("record length {len} exceeds datagram size"),
            ));
        }

        let mut payload = BytesMut::zeroed(len as usize);
        self.inner
            .read_exact(&mut payload)
            .map_err(|_| ScanError::corrupt(offset, "truncated record payload"))?;

        self.position = offset + RECORD_HEADER_BYTES as u64 + u64::from(len);
        Ok(Some(CaptureRecord {
            offset,
            host_timestamp,
            dst_port,
            payload: payload.freeze(),
        }))
    }
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Appending writer
#[derive(Debug)]
pub struct CaptureWriter<W: Write> {
    inner: W,
    records: u64,
}

impl CaptureWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        let mut header = BytesMut::with_capacity(FILE_HEADER_BYTES as usize);
        header.put_slice(CAPTURE_MAGIC);
        header.put_u16_le(CAPTURE_VERSION);
        header.put_u16_le(0);
        inner.write_all(&header)?;
        Ok(Self { inner, records: 0 })
    }

    pub fn write_record(&mut self, host_timestamp: u64, dst_port: u16, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|l| *l <= MAX_PAYLOAD_BYTES)
            .ok_or_else(|| ScanError::Other(format!("payload of {} bytes", payload.len())))?;
        let mut header = BytesMut::with_capacity(RECORD_HEADER_BYTES);
        header.put_u64_le(host_timestamp);
        header.put_u16_le(dst_port);
        header.put_u32_le(len);
        self.inner.write_all(&header)?;
        self.inner.write_all(payload)?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.inner.flush()?)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Vec<u8> {
        let mut w = CaptureWriter::new(Vec::new()).unwrap();
        w.write_record(100, 7502, b"abc").unwrap();
        w.write_record(200, 7503, b"").unwrap();
        w.write_record(300, 7502, b"defgh").unwrap();
        assert_eq!(w.records(), 3);
        w.into_inner()
    }

    #[test]
    fn test_read_back_records() {
        let mut r = CaptureReader::new(Cursor::new(sample())).unwrap();
        let a = r.next_record().unwrap().unwrap();
        assert_eq!(a.offset, FILE_HEADER_BYTES);
        assert_eq!(a.payload.as_ref(), b"abc");
        let b = r.next_record().unwrap().unwrap();
        assert_eq!(b.offset, FILE_HEADER_BYTES + 14 + 3);
        assert!(b.payload.is_empty());
        let c = r.next_record().unwrap().unwrap();
        assert_eq!((c.host_timestamp, c.dst_port), (300, 7502));
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn test_seek_and_reset() {
        let mut r = CaptureReader::new(Cursor::new(sample())).unwrap();
        r.next_record().unwrap();
        let second = r.position();
        r.next_record().unwrap();
        r.seek(second).unwrap();
        assert_eq!(r.next_record().unwrap().unwrap().host_timestamp, 200);
        r.reset().unwrap();
        assert_eq!(r.next_record().unwrap().unwrap().host_timestamp, 100);
        assert!(r.seek(2).is_err());
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let mut data = sample();
        data.truncate(data.len() - 2);
        let mut r = CaptureReader::new(Cursor::new(data)).unwrap();
        r.next_record().unwrap();
        r.next_record().unwrap();
        assert!(matches!(r.next_record(), Err(ScanError::Corrupt { .. })));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let err = CaptureReader::new(Cursor::new(b"PCAP\x01\x00\x00\x00".to_vec())).unwrap_err();
        assert!(matches!(err, ScanError::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cap");
        let mut w = CaptureWriter::create(&path).unwrap();
        w.write_record(1, 2, b"xyz").unwrap();
        w.flush().unwrap();
        drop(w);
        let mut r = CaptureReader::open(&path).unwrap();
        assert_eq!(r.next_record().unwrap().unwrap().payload.as_ref(), b"xyz");
    }
}
