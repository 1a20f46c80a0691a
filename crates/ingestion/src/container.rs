//! In-memory indexed container
//!
//! Holds encoded scan messages per stream, ordered by timestamp. Created
//! through [`ContainerBuilder`], either with a message index or without one
//! (the index can then be built in place).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use contracts::{
    ContainerMessage, ContainerReader, Frame, MessageIter, Result, ScanError, ScanStream,
    SensorDescriptor,
};
use tracing::{debug, instrument};

use crate::scan_codec::encode_frame;

/// Container builder
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    sensors: Vec<SensorDescriptor>,
    streams: Vec<ScanStream>,
    messages: Vec<ContainerMessage>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor with one scan stream; returns the stream id
    pub fn add_sensor(&mut self, desc: SensorDescriptor) -> u32 {
        let sensor = self.sensors.len();
        let stream_id = self.streams.len() as u32 + 1;
        self.sensors.push(desc);
        self.streams.push(ScanStream { stream_id, sensor });
        stream_id
    }

    /// Append a frame to a stream, stamped with its representative timestamp
    ///
    /// Frames without a valid column cannot be timestamped and are skipped.
    pub fn push_frame(&mut self, stream_id: u32, frame: &Frame) -> Result<()> {
        if !self.streams.iter().any(|s| s.stream_id == stream_id) {
            return Err(ScanError::Other(format!("unknown stream {stream_id}")));
        }
        let Some(ts) = frame.timestamp() else {
            return Ok(());
        };
        self.messages.push(ContainerMessage {
            stream_id,
            ts,
            payload: encode_frame(frame),
        });
        Ok(())
    }

    pub fn build(mut self, indexed: bool) -> MemoryContainer {
        // stable: equal timestamps keep insertion order
        self.messages.sort_by_key(|m| m.ts);
        let mut container = MemoryContainer {
            sensors: self.sensors,
            streams: self.streams,
            messages: Arc::new(self.messages),
            index: None,
        };
        if indexed {
            container.index = Some(container.compute_index());
        }
        container
    }
}

/// Indexed container held in memory
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    sensors: Vec<SensorDescriptor>,
    streams: Vec<ScanStream>,
    messages: Arc<Vec<ContainerMessage>>,
    /// stream id -> message timestamps by ordinal
    index: Option<BTreeMap<u32, Vec<u64>>>,
}

impl MemoryContainer {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    fn compute_index(&self) -> BTreeMap<u32, Vec<u64>> {
        let mut index: BTreeMap<u32, Vec<u64>> =
            self.streams.iter().map(|s| (s.stream_id, Vec::new())).collect();
        for m in self.messages.iter() {
            if let Some(ts) = index.get_mut(&m.stream_id) {
                ts.push(m.ts);
            }
        }
        index
    }

    fn stream_index(&self, stream_id: u32) -> Result<&Vec<u64>> {
        self.index
            .as_ref()
            .ok_or(ScanError::NotIndexed)?
            .get(&stream_id)
            .ok_or_else(|| ScanError::Other(format!("unknown stream {stream_id}")))
    }
}

impl ContainerReader for MemoryContainer {
    fn sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    fn scan_streams(&self) -> &[ScanStream] {
        &self.streams
    }

    fn start_ts(&self) -> Option<u64> {
        self.messages.first().map(|m| m.ts)
    }

    fn end_ts(&self) -> Option<u64> {
        self.messages.last().map(|m| m.ts)
    }

    fn messages(&self, stream_ids: &[u32], start_ts: Option<u64>, end_ts: Option<u64>) -> Result<MessageIter> {
        let wanted: HashSet<u32> = stream_ids.iter().copied().collect();
        let messages = Arc::clone(&self.messages);
        let start = start_ts.unwrap_or(0);
        let end = end_ts.unwrap_or(u64::MAX);
        let first = messages.partition_point(|m| m.ts < start);

        let iter = (first..messages.len())
            .map(move |i| messages[i].clone())
            .take_while(move |m| m.ts <= end)
            .filter(move |m| wanted.contains(&m.stream_id))
            .map(Ok);
        Ok(Box::new(iter))
    }

    fn message_count(&self, stream_id: u32) -> Result<usize> {
        Ok(self.stream_index(stream_id)?.len())
    }

    fn ts_by_message_index(&self, stream_id: u32, ordinal: usize) -> Result<u64> {
        let ts = self.stream_index(stream_id)?;
        ts.get(ordinal).copied().ok_or(ScanError::OutOfRange {
            index: ordinal as isize,
            len: ts.len(),
        })
    }

    fn has_index(&self) -> bool {
        self.index.is_some()
    }

    #[instrument(name = "container_build_index", skip(self))]
    fn build_index(&mut self) -> Result<()> {
        let index = self.compute_index();
        debug!(streams = index.len(), messages = self.messages.len(), "container indexed");
        self.index = Some(index);
        Ok(())
    }
}
