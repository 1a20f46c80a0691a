//! FrameSet - one collation result, one slot per sensor

use serde::{Deserialize, Serialize};

use crate::Frame;

/// Aligned bundle of at most one frame per sensor
///
/// Slot `i` always belongs to the sensor with index `i` assigned at source
/// open time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSet {
    slots: Vec<Option<Frame>>,
}

impl FrameSet {
    /// All slots absent
    pub fn empty(sensor_count: usize) -> Self {
        Self {
            slots: vec![None; sensor_count],
        }
    }

    pub fn from_slots(slots: Vec<Option<Frame>>) -> Self {
        Self { slots }
    }

    /// Number of slots (always the sensor count)
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, sensor: usize) -> Option<&Frame> {
        self.slots.get(sensor).and_then(Option::as_ref)
    }

    pub fn set(&mut self, sensor: usize, frame: Frame) {
        if let Some(slot) = self.slots.get_mut(sensor) {
            *slot = Some(frame);
        }
    }

    pub fn take(&mut self, sensor: usize) -> Option<Frame> {
        self.slots.get_mut(sensor).and_then(Option::take)
    }

    pub fn slots(&self) -> &[Option<Frame>] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<Option<Frame>> {
        self.slots
    }

    /// Present frames with their sensor index
    pub fn frames(&self) -> impl Iterator<Item = (usize, &Frame)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|f| (i, f)))
    }

    /// Number of present frames
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Smallest representative timestamp among present frames
    pub fn timestamp(&self) -> Option<u64> {
        self.frames().filter_map(|(_, f)| f.timestamp()).min()
    }

    /// Frame ids per slot
    pub fn frame_ids(&self) -> Vec<Option<u32>> {
        self.slots
            .iter()
            .map(|s| s.as_ref().map(|f| f.frame_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColumnHeader;

    fn frame_at(frame_id: u32, ts: u64) -> Frame {
        let mut frame = Frame::new(frame_id, 1, 2);
        frame.headers[0] = ColumnHeader::valid(ts, 0);
        frame
    }

    #[test]
    fn test_frame_set_slots() {
        let mut set = FrameSet::empty(3);
        assert_eq!(set.len(), 3);
        assert_eq!(set.filled(), 0);
        assert_eq!(set.timestamp(), None);

        set.set(2, frame_at(5, 900));
        set.set(0, frame_at(4, 1000));
        assert_eq!(set.filled(), 2);
        assert_eq!(set.timestamp(), Some(900));
        assert_eq!(set.frame_ids(), vec![Some(4), None, Some(5)]);

        let indices: Vec<usize> = set.frames().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);

        assert!(set.take(2).is_some());
        assert!(set.get(2).is_none());
    }
}
