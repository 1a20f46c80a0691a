//! Frame Batcher
//!
//! Turns one sensor's packet sequence into frames. Columns land at their
//! measurement id, so packets of a frame may arrive out of order or not at
//! all.
//!
//! Watermark rules, per sensor:
//! - a packet for the open frame is decoded into it; a frame that becomes
//!   complete is closed and emitted right away
//! - a packet with a higher frame id closes the open frame (emitted if it
//!   has at least one valid column) and opens a new one
//! - a packet below the open frame id, or at or below the highest closed
//!   id, is a straggler: dropped and counted, a closed frame never reopens

use std::collections::VecDeque;

use contracts::Frame;
use ingestion::PacketFormat;
use tracing::{instrument, trace};

use crate::profile::SensorProfile;

/// A frame closed by the batcher
#[derive(Debug, Clone, PartialEq)]
pub struct Batched {
    pub frame: Frame,
    /// Seek offset of the first packet that contributed to the frame
    pub first_offset: Option<u64>,
}

#[derive(Debug)]
struct OpenFrame {
    frame: Frame,
    first_offset: Option<u64>,
}

#[derive(Debug)]
pub struct ScanBatcher {
    profile: SensorProfile,
    open: Option<OpenFrame>,
    /// Highest closed frame id
    watermark: Option<u32>,
    /// Frame ids below the floor are ignored without counting
    floor: Option<u32>,
    stragglers: u64,
}

impl ScanBatcher {
    pub fn new(profile: SensorProfile) -> Self {
        Self {
            profile,
            open: None,
            watermark: None,
            floor: None,
            stragglers: 0,
        }
    }

    pub fn profile(&self) -> &SensorProfile {
        &self.profile
    }

    #[inline]
    pub fn watermark(&self) -> Option<u32> {
        self.watermark
    }

    /// Frame id currently being assembled
    #[inline]
    pub fn open_frame_id(&self) -> Option<u32> {
        self.open.as_ref().map(|o| o.frame.frame_id)
    }

    /// Straggler packets dropped so far
    #[inline]
    pub fn stragglers(&self) -> u64 {
        self.stragglers
    }

    /// Ignore frame ids below `floor` (used when replaying from a seek offset)
    pub fn set_floor(&mut self, floor: Option<u32>) {
        self.floor = floor;
    }

    /// Forget the open frame and the watermark
    pub fn reset(&mut self) {
        self.open = None;
        self.watermark = None;
        self.floor = None;
    }

    /// Feed one validated lidar packet; closed frames are appended to `out`
    ///
    /// Returns the number of frames appended.
    #[instrument(
        level = "trace",
        name = "batcher_push",
        skip(self, buf, out),
        fields(sensor = self.profile.sensor)
    )]
    pub fn push(&mut self, buf: &[u8], offset: Option<u64>, out: &mut VecDeque<Batched>) -> usize {
        let Some(frame_id) = PacketFormat::frame_id(buf) else {
            return 0;
        };
        if self.floor.is_some_and(|f| frame_id < f) {
            return 0;
        }
        let below_open = self.open_frame_id().is_some_and(|open| frame_id < open);
        let closed = self.watermark.is_some_and(|w| frame_id <= w);
        if below_open || closed {
            self.stragglers += 1;
            observability::record_straggler(self.profile.sensor);
            trace!(frame_id, watermark = ?self.watermark, "straggler dropped");
            return 0;
        }

        let mut emitted = 0;
        if self.open_frame_id().is_some_and(|open| frame_id > open) {
            emitted += self.close(out);
        }
        let open = self.open.get_or_insert_with(|| OpenFrame {
            frame: self.profile.new_frame(frame_id),
            first_offset: offset,
        });
        self.profile.format.decode_into(buf, &mut open.frame);
        if open.frame.is_complete() {
            emitted += self.close(out);
        }
        emitted
    }

    /// Close the open frame at end of stream
    pub fn finish(&mut self, out: &mut VecDeque<Batched>) -> usize {
        self.close(out)
    }

    fn close(&mut self, out: &mut VecDeque<Batched>) -> usize {
        let Some(open) = self.open.take() else {
            return 0;
        };
        let frame_id = open.frame.frame_id;
        self.watermark = Some(self.watermark.map_or(frame_id, |w| w.max(frame_id)));
        if open.frame.valid_columns() == 0 {
            trace!(sensor = self.profile.sensor, frame_id, "empty frame discarded");
            return 0;
        }
        observability::record_frame_emitted(self.profile.sensor, open.frame.is_complete());
        out.push_back(Batched {
            frame: open.frame,
            first_offset: open.first_offset,
        });
        1
    }
}
