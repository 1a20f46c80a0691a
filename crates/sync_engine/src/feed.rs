//! Frame feeds over packet sources and containers
//!
//! A feed demultiplexes one shared input into per-sensor frame queues for the
//! [`Collator`](crate::Collator). Look-ahead is bounded: when another sensor
//! already has `lag_frames` frames queued, a sensor without data reports
//! [`Feed::Lagging`] instead of reading further. Targeted replays read
//! without that bound.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use contracts::{
    Frame, MessageIter, Packet, PacketMultiSource, Result, ScanStream, SourceConfig, StreamIndex,
};
use ingestion::decode_frame;
use metrics::gauge;
use tracing::{debug, trace};

use crate::batcher::{Batched, ScanBatcher};
use crate::collator::{Feed, FrameFeed};
use crate::profile::SensorProfile;

/// Replay target of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Every frame
    All,
    /// Only this frame id, then exhausted
    Frame(u32),
    /// Nothing
    Disabled,
    Satisfied,
}

/// Feed over a [`PacketMultiSource`]
pub struct PacketFeed<'a> {
    source: &'a dyn PacketMultiSource,
    batchers: Vec<ScanBatcher>,
    queues: Vec<VecDeque<Batched>>,
    scratch: VecDeque<Batched>,
    targets: Vec<Target>,
    complete_only: bool,
    lag_frames: usize,
    finished: bool,
    packets: u64,
    recorder: Option<StreamIndex>,
}

impl<'a> PacketFeed<'a> {
    pub fn new(source: &'a dyn PacketMultiSource, profiles: &[SensorProfile], config: &SourceConfig) -> Self {
        Self {
            source,
            batchers: profiles.iter().cloned().map(ScanBatcher::new).collect(),
            queues: profiles.iter().map(|_| VecDeque::new()).collect(),
            scratch: VecDeque::new(),
            targets: vec![Target::All; profiles.len()],
            complete_only: config.complete,
            lag_frames: config.lag_frames.max(1),
            finished: false,
            packets: 0,
            recorder: None,
        }
    }

    /// Record the first offset of every frame into a fresh [`StreamIndex`]
    pub fn recording(mut self) -> Self {
        self.recorder = Some(StreamIndex::new(self.batchers.len()));
        self
    }

    /// Produce exactly one frame per sensor: the given frame id, or nothing
    /// for `None`. Frames below a target are ignored.
    pub fn with_targets(mut self, targets: &[Option<u32>]) -> Self {
        self.lag_frames = usize::MAX;
        for (sensor, target) in targets.iter().enumerate() {
            let Some(slot) = self.targets.get_mut(sensor) else { break };
            *slot = match target {
                Some(id) => Target::Frame(*id),
                None => Target::Disabled,
            };
            self.batchers[sensor].set_floor(*target);
        }
        self
    }

    /// Packets read so far
    #[inline]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn index_mut(&mut self) -> Option<&mut StreamIndex> {
        self.recorder.as_mut()
    }

    pub fn into_index(self) -> Option<StreamIndex> {
        self.recorder
    }

    /// Straggler packets dropped, per sensor
    pub fn stragglers(&self) -> Vec<u64> {
        self.batchers.iter().map(ScanBatcher::stragglers).collect()
    }

    fn done(&self, sensor: usize) -> bool {
        matches!(self.targets[sensor], Target::Disabled | Target::Satisfied)
    }

    fn all_done(&self) -> bool {
        (0..self.targets.len()).all(|s| self.done(s))
    }

    /// Read one packet and route the frames it closes
    fn pump(&mut self) -> Result<()> {
        let Some(sp) = self.source.next_packet()? else {
            self.finished = true;
            for sensor in 0..self.batchers.len() {
                self.batchers[sensor].finish(&mut self.scratch);
                self.route(sensor);
            }
            debug!(packets = self.packets, "packet feed drained");
            return Ok(());
        };
        self.packets += 1;
        let Packet::Lidar(lidar) = sp.packet else {
            return Ok(());
        };
        let Some(batcher) = self.batchers.get_mut(sp.sensor) else {
            return Ok(());
        };
        batcher.push(&lidar.buf, sp.offset, &mut self.scratch);
        self.route(sp.sensor);
        Ok(())
    }

    fn route(&mut self, sensor: usize) {
        while let Some(b) = self.scratch.pop_front() {
            let frame_id = b.frame.frame_id;
            if let (Some(index), Some(offset)) = (self.recorder.as_mut(), b.first_offset) {
                index.record_frame(sensor, u64::from(frame_id), offset);
            }
            if self.complete_only && !b.frame.is_complete() {
                trace!(sensor, frame_id, "incomplete frame skipped");
                continue;
            }
            match self.targets[sensor] {
                Target::All => self.queues[sensor].push_back(b),
                Target::Frame(id) if id == frame_id => {
                    self.queues[sensor].push_back(b);
                    self.targets[sensor] = Target::Satisfied;
                }
                Target::Frame(id) if frame_id > id => self.targets[sensor] = Target::Satisfied,
                _ => {}
            }
        }
        gauge!("lidar_feed_queue_depth", "sensor" => sensor.to_string())
            .set(self.queues[sensor].len() as f64);
    }
}

impl FrameFeed for PacketFeed<'_> {
    fn sensor_count(&self) -> usize {
        self.batchers.len()
    }

    fn next_frame(&mut self, sensor: usize) -> Result<Feed> {
        if sensor >= self.queues.len() {
            return Ok(Feed::Exhausted);
        }
        loop {
            if let Some(b) = self.queues[sensor].pop_front() {
                return Ok(Feed::Ready(b.frame));
            }
            if self.finished || self.done(sensor) || self.all_done() {
                return Ok(Feed::Exhausted);
            }
            let ahead = self
                .queues
                .iter()
                .enumerate()
                .any(|(s, q)| s != sensor && q.len() >= self.lag_frames);
            if ahead {
                return Ok(Feed::Lagging);
            }
            self.pump()?;
        }
    }
}

/// Feed over the scan messages of a container
///
/// Message ordinals are counted per stream over every message, so they
/// match the container's own message index.
pub struct ContainerFeed<'a> {
    messages: MessageIter,
    sensor_of: HashMap<u32, usize>,
    queues: Vec<VecDeque<(u64, u64, Frame)>>,
    /// Next ordinal per sensor
    ordinals: Vec<u64>,
    /// `(ordinal, ts)` of frames handed to the collator, oldest first
    handed: Vec<VecDeque<(u64, u64)>>,
    complete_only: bool,
    lag_frames: usize,
    closed: &'a AtomicBool,
    finished: bool,
}

impl<'a> ContainerFeed<'a> {
    pub fn new(
        messages: MessageIter,
        streams: &[ScanStream],
        sensor_count: usize,
        config: &SourceConfig,
        closed: &'a AtomicBool,
    ) -> Self {
        Self {
            messages,
            sensor_of: streams.iter().map(|s| (s.stream_id, s.sensor)).collect(),
            queues: vec![VecDeque::new(); sensor_count],
            ordinals: vec![0; sensor_count],
            handed: vec![VecDeque::new(); sensor_count],
            complete_only: config.complete,
            lag_frames: config.lag_frames.max(1),
            closed,
            finished: false,
        }
    }

    /// `(ordinal, ts)` of a frame the collator consumed from `sensor`
    ///
    /// Must be called once per filled slot, in set order.
    pub fn consumed(&mut self, sensor: usize) -> Option<(u64, u64)> {
        self.handed.get_mut(sensor)?.pop_front()
    }

    fn pump(&mut self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            self.finished = true;
            return Ok(());
        }
        let Some(message) = self.messages.next().transpose()? else {
            self.finished = true;
            return Ok(());
        };
        let Some(&sensor) = self.sensor_of.get(&message.stream_id) else {
            return Ok(());
        };
        let ordinal = self.ordinals[sensor];
        self.ordinals[sensor] += 1;

        let frame = decode_frame(&message.payload, ordinal)?;
        if frame.timestamp().is_none() || (self.complete_only && !frame.is_complete()) {
            trace!(sensor, ordinal, "container frame skipped");
            return Ok(());
        }
        self.queues[sensor].push_back((ordinal, message.ts, frame));
        Ok(())
    }
}

impl FrameFeed for ContainerFeed<'_> {
    fn sensor_count(&self) -> usize {
        self.queues.len()
    }

    fn next_frame(&mut self, sensor: usize) -> Result<Feed> {
        if sensor >= self.queues.len() {
            return Ok(Feed::Exhausted);
        }
        loop {
            if let Some((ordinal, ts, frame)) = self.queues[sensor].pop_front() {
                self.handed[sensor].push_back((ordinal, ts));
                return Ok(Feed::Ready(frame));
            }
            if self.finished {
                return Ok(Feed::Exhausted);
            }
            let ahead = self
                .queues
                .iter()
                .enumerate()
                .any(|(s, q)| s != sensor && q.len() >= self.lag_frames);
            if ahead {
                return Ok(Feed::Lagging);
            }
            self.pump()?;
        }
    }

    fn discard(&mut self, sensor: usize) {
        if let Some(handed) = self.handed.get_mut(sensor) {
            handed.pop_back();
        }
    }
}
