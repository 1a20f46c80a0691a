//! Collator
//!
//! Merges N per-sensor frame streams into frame sets. One pending frame is
//! held per sensor; each step takes the smallest pending timestamp `t_min`
//! and closes a set holding every pending frame with a timestamp in
//! `[t_min, t_min + dt)`. Only the sensors whose frame was taken advance.
//!
//! Sets come out with non-decreasing `t_min`. A frame that shows up below
//! the last emitted `t_min` (a sensor that lagged behind the look-ahead
//! bound) is dropped and counted as late.

use contracts::{Frame, FrameSet, Result};
use tracing::{debug, instrument, trace};

/// Outcome of asking a feed for a sensor's next frame
#[derive(Debug)]
pub enum Feed {
    Ready(Frame),
    /// No frame yet, and the other sensors are too far ahead to wait
    Lagging,
    Exhausted,
}

/// Per-sensor frame supplier of a [`Collator`]
pub trait FrameFeed {
    fn sensor_count(&self) -> usize;

    fn next_frame(&mut self, sensor: usize) -> Result<Feed>;

    /// The frame last returned for `sensor` was dropped by the collator
    fn discard(&mut self, _sensor: usize) {}
}

/// Feed over in-memory frame iterators, one per sensor
///
/// Frames without a valid column carry no timestamp and are skipped.
pub struct IterFeed<I> {
    iters: Vec<I>,
}

impl<I: Iterator<Item = Frame>> IterFeed<I> {
    pub fn new(iters: Vec<I>) -> Self {
        Self { iters }
    }
}

impl<I: Iterator<Item = Frame>> FrameFeed for IterFeed<I> {
    fn sensor_count(&self) -> usize {
        self.iters.len()
    }

    fn next_frame(&mut self, sensor: usize) -> Result<Feed> {
        let Some(iter) = self.iters.get_mut(sensor) else {
            return Ok(Feed::Exhausted);
        };
        Ok(iter
            .find(|f| f.timestamp().is_some())
            .map_or(Feed::Exhausted, Feed::Ready))
    }
}

pub struct Collator<F> {
    feed: F,
    dt: u64,
    pending: Vec<Option<Frame>>,
    exhausted: Vec<bool>,
    /// `t_min` of the last emitted set
    floor: Option<u64>,
    late: Vec<u64>,
}

impl<F: FrameFeed> Collator<F> {
    pub fn new(feed: F, dt_ns: u64) -> Self {
        let n = feed.sensor_count();
        Self {
            feed,
            dt: dt_ns,
            pending: vec![None; n],
            exhausted: vec![false; n],
            floor: None,
            late: vec![0; n],
        }
    }

    /// Frames dropped for arriving below an emitted set, per sensor
    pub fn late_frames(&self) -> &[u64] {
        &self.late
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    pub fn into_feed(self) -> F {
        self.feed
    }

    /// Next frame set, `None` once every sensor is exhausted and drained
    ///
    /// A feed error leaves the pending frames in place; calling again
    /// resumes where the failed call stopped.
    #[instrument(level = "trace", name = "collator_next_set", skip(self))]
    pub fn next_set(&mut self) -> Result<Option<FrameSet>> {
        self.fill()?;

        let Some(t_min) = self.pending.iter().flatten().filter_map(Frame::timestamp).min() else {
            return Ok(None);
        };
        let t_end = t_min.saturating_add(self.dt);

        let slots = self
            .pending
            .iter_mut()
            .map(|slot| {
                let in_window = slot
                    .as_ref()
                    .and_then(Frame::timestamp)
                    .is_some_and(|ts| ts < t_end);
                if in_window {
                    slot.take()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        let set = FrameSet::from_slots(slots);
        self.floor = Some(t_min);
        trace!(t_min, filled = set.filled(), "frame set closed");
        Ok(Some(set))
    }

    /// Fetch a frame for every empty slot
    ///
    /// A lagging sensor is asked again once the others took frames off
    /// their queues, so it only misses the set while they stay ahead.
    fn fill(&mut self) -> Result<()> {
        loop {
            let mut taken = false;
            let mut lagging = false;
            for sensor in 0..self.pending.len() {
                if self.pending[sensor].is_some() || self.exhausted[sensor] {
                    continue;
                }
                match self.pull(sensor)? {
                    Feed::Ready(frame) => {
                        self.pending[sensor] = Some(frame);
                        taken = true;
                    }
                    Feed::Lagging => lagging = true,
                    Feed::Exhausted => self.exhausted[sensor] = true,
                }
            }
            if !(taken && lagging) {
                return Ok(());
            }
        }
    }

    /// Next usable frame of a sensor, skipping untimed and late frames
    fn pull(&mut self, sensor: usize) -> Result<Feed> {
        loop {
            let frame = match self.feed.next_frame(sensor)? {
                Feed::Ready(frame) => frame,
                other => return Ok(other),
            };
            match frame.timestamp() {
                Some(ts) if self.floor.is_some_and(|floor| ts < floor) => {
                    self.late[sensor] += 1;
                    observability::record_late_frame(sensor);
                    debug!(sensor, ts, floor = ?self.floor, "late frame dropped");
                }
                Some(_) => return Ok(Feed::Ready(frame)),
                None => {}
            }
            self.feed.discard(sensor);
        }
    }
}

impl<F: FrameFeed> Iterator for Collator<F> {
    type Item = Result<FrameSet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_set().transpose()
    }
}
