//! Source contracts
//!
//! Three layers, leaf-first:
//! - [`PacketMultiSource`]: raw packets of N sensors (capture file, live UDP)
//! - [`ContainerReader`]: an indexed container of encoded scan messages
//! - [`MultiScanSource`] / [`ScanSource`]: decoded, collated frame sets
//!
//! Implementations use interior locking: every method takes `&self`, so a
//! source can be closed from one thread while another thread is blocked in
//! a read.

use std::sync::Arc;

use bytes::Bytes;

use crate::{Frame, FrameSet, Result, SensorDescriptor, SensorPacket, ValidationCounts};

/// Lazy sequence of frame sets
pub type FrameSetIter<'a> = Box<dyn Iterator<Item = Result<FrameSet>> + Send + 'a>;

/// Lazy sequence of single-sensor frames
pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<Frame>> + Send + 'a>;

/// Container message iterator
pub type MessageIter = Box<dyn Iterator<Item = Result<ContainerMessage>> + Send>;

/// Packet source of one or more sensors
pub trait PacketMultiSource: Send + Sync {
    /// Descriptors, indexed by sensor
    fn metadata(&self) -> &[SensorDescriptor];

    /// Next admitted packet with its sensor index
    ///
    /// Returns `Ok(None)` at end of stream and after `close`.
    ///
    /// # Errors
    /// - `Timeout` on a live source with no data before the deadline
    /// - `Io` / `Corrupt` on unrecoverable read failures
    fn next_packet(&self) -> Result<Option<SensorPacket>>;

    /// Position the next read at a byte offset previously reported by
    /// [`position`](Self::position)
    fn seek(&self, offset: u64) -> Result<()>;

    /// Offset of the next packet record, `None` when not seekable or closed
    fn position(&self) -> Option<u64>;

    /// Rewind to the first packet
    fn restart(&self) -> Result<()>;

    /// Turn real-time pacing on or off; index builds and random access
    /// replays run unpaced
    fn set_paced(&self, _paced: bool) {}

    /// Release the underlying handle; safe to call concurrently with a read
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Whether [`seek`](Self::seek) is supported
    fn is_seekable(&self) -> bool;

    fn is_live(&self) -> bool;

    /// Validation error counters, indexed by sensor
    fn validation_error_counts(&self) -> Vec<ValidationCounts>;
}

/// Scan stream of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStream {
    pub stream_id: u32,
    /// Sensor index into [`ContainerReader::sensors`]
    pub sensor: usize,
}

/// One encoded container message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMessage {
    pub stream_id: u32,
    /// Message timestamp (ns)
    pub ts: u64,
    pub payload: Bytes,
}

/// Reader over an indexed container
pub trait ContainerReader: Send {
    /// Sensor descriptors stored in the container
    fn sensors(&self) -> &[SensorDescriptor];

    /// Scan streams and the sensor each one belongs to
    fn scan_streams(&self) -> &[ScanStream];

    /// Earliest message timestamp
    fn start_ts(&self) -> Option<u64>;

    /// Latest message timestamp
    fn end_ts(&self) -> Option<u64>;

    /// Messages of the given streams in timestamp order, bounds inclusive
    fn messages(
        &self,
        stream_ids: &[u32],
        start_ts: Option<u64>,
        end_ts: Option<u64>,
    ) -> Result<MessageIter>;

    /// Number of messages in a stream (requires an index)
    fn message_count(&self, stream_id: u32) -> Result<usize>;

    /// Timestamp of the message with the given ordinal (requires an index)
    fn ts_by_message_index(&self, stream_id: u32, ordinal: usize) -> Result<u64>;

    fn has_index(&self) -> bool;

    /// Build the message index in place
    fn build_index(&mut self) -> Result<()>;
}

/// Python-style slice over frame set ordinals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSpec {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: Option<isize>,
}

impl SliceSpec {
    pub fn range(start: isize, stop: isize) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    pub fn with_step(mut self, step: isize) -> Self {
        self.step = Some(step);
        self
    }
}

/// Collated multi-sensor scan source
pub trait MultiScanSource: Send + Sync {
    /// Descriptors, indexed by sensor
    fn metadata(&self) -> &[SensorDescriptor];

    fn sensor_count(&self) -> usize {
        self.metadata().len()
    }

    fn is_live(&self) -> bool;

    /// Whether random access (`len`, `get`, `get_slice`) is available
    fn is_indexed(&self) -> bool;

    /// Frames available per sensor, `None` when not indexed
    fn scans_num(&self) -> Vec<Option<usize>>;

    /// Number of frame sets
    ///
    /// # Errors
    /// `NotIndexed` when the source has no index
    fn len(&self) -> Result<usize>;

    /// Frame set by ordinal; negative ordinals count from the end
    ///
    /// # Errors
    /// - `NotIndexed` when the source has no index
    /// - `OutOfRange` outside `[-len, len)`
    fn get(&self, index: isize) -> Result<FrameSet>;

    /// Frame sets selected by a slice
    fn get_slice(&self, slice: SliceSpec) -> Result<Vec<FrameSet>>;

    /// Forward iteration from the current position; finite unless cycling
    fn iter(&self) -> Result<FrameSetIter<'_>>;

    /// Rewind forward iteration to the first frame set
    fn reset(&self) -> Result<()>;

    fn close(&self);
}

/// Single-sensor scan source
pub trait ScanSource: Send + Sync {
    fn metadata(&self) -> &SensorDescriptor;

    fn is_live(&self) -> bool;

    fn is_indexed(&self) -> bool;

    fn len(&self) -> Result<usize>;

    /// Frame by ordinal; `None` when the sensor had no frame in that set
    fn get(&self, index: isize) -> Result<Option<Frame>>;

    fn get_slice(&self, slice: SliceSpec) -> Result<Vec<Option<Frame>>>;

    /// Forward iteration over the frames this sensor produced
    fn iter(&self) -> Result<FrameIter<'_>>;

    fn close(&self);
}

/// Scan source of either capability
#[derive(Clone)]
pub enum AnyScanSource {
    Single(Arc<dyn ScanSource>),
    Multi(Arc<dyn MultiScanSource>),
}

impl AnyScanSource {
    pub fn sensor_count(&self) -> usize {
        match self {
            AnyScanSource::Single(_) => 1,
            AnyScanSource::Multi(s) => s.sensor_count(),
        }
    }

    pub fn metadata(&self) -> Vec<SensorDescriptor> {
        match self {
            AnyScanSource::Single(s) => vec![s.metadata().clone()],
            AnyScanSource::Multi(s) => s.metadata().to_vec(),
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            AnyScanSource::Single(s) => s.is_live(),
            AnyScanSource::Multi(s) => s.is_live(),
        }
    }

    pub fn is_indexed(&self) -> bool {
        match self {
            AnyScanSource::Single(s) => s.is_indexed(),
            AnyScanSource::Multi(s) => s.is_indexed(),
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self {
            AnyScanSource::Single(s) => s.len(),
            AnyScanSource::Multi(s) => s.len(),
        }
    }

    pub fn as_multi(&self) -> Option<&Arc<dyn MultiScanSource>> {
        match self {
            AnyScanSource::Multi(s) => Some(s),
            AnyScanSource::Single(_) => None,
        }
    }

    pub fn close(&self) {
        match self {
            AnyScanSource::Single(s) => s.close(),
            AnyScanSource::Multi(s) => s.close(),
        }
    }
}

impl std::fmt::Debug for AnyScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyScanSource::Single(s) => f
                .debug_tuple("Single")
                .field(&s.metadata().label())
                .finish(),
            AnyScanSource::Multi(s) => f.debug_tuple("Multi").field(&s.sensor_count()).finish(),
        }
    }
}
