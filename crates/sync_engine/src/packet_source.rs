//! Indexed multi-scan source over a packet source
//!
//! Forward iteration runs batcher and collator over the live packet stream.
//! With an index, `get(i)` seeks the packet source to the first packet of
//! set `i`, replays just the member frames of that set and restores the
//! read position.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use contracts::{
    FrameSet, FrameSetIter, IndexProgress, MultiScanSource, PacketMultiSource, Result, ScanError,
    SensorDescriptor, SliceSpec, SourceConfig, StreamIndex,
};
use tracing::{debug, info, instrument, warn};

use crate::collator::Collator;
use crate::feed::PacketFeed;
use crate::profile::SensorProfile;
use crate::slicer::{resolve_index, slice_indices};

/// Packets between two progress reports of an index build
const PROGRESS_EVERY: u64 = 1000;

pub struct PacketScanSource {
    source: Arc<dyn PacketMultiSource>,
    config: SourceConfig,
    profiles: Vec<SensorProfile>,
    index: OnceLock<StreamIndex>,
    /// Serialises collation steps with random access replays
    access: Mutex<()>,
}

impl PacketScanSource {
    /// Wrap a packet source; builds the index right away when
    /// `config.index` is set and the source can seek
    pub fn open(source: Arc<dyn PacketMultiSource>, config: SourceConfig) -> Result<Self> {
        let profiles = SensorProfile::resolve_all(source.metadata());
        let this = Self {
            source,
            config,
            profiles,
            index: OnceLock::new(),
            access: Mutex::new(()),
        };
        if this.config.index {
            if this.source.is_seekable() {
                this.build_index(|_| {})?;
            } else {
                warn!("index requested on a source that cannot seek; random access disabled");
            }
        }
        Ok(this)
    }

    pub fn profiles(&self) -> &[SensorProfile] {
        &self.profiles
    }

    pub fn packet_source(&self) -> &Arc<dyn PacketMultiSource> {
        &self.source
    }

    pub fn index(&self) -> Option<&StreamIndex> {
        self.index.get()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.access.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One full forward pass recording the first offset of every frame and
    /// the members of every frame set; rewinds the source afterwards
    ///
    /// Returns the existing index when one was already built.
    #[instrument(name = "packet_source_build_index", skip_all)]
    pub fn build_index(&self, mut progress: impl FnMut(IndexProgress)) -> Result<&StreamIndex> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        if !self.source.is_seekable() {
            return Err(ScanError::index_build("packet source cannot seek"));
        }

        let _guard = self.lock();
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        self.source.set_paced(false);
        let built = self.index_pass(&mut progress);
        self.source.set_paced(true);
        let rewind = self.source.restart();
        let index = built.map_err(|e| match e {
            ScanError::IndexBuild { .. } => e,
            other => ScanError::index_build(other.to_string()),
        })?;
        rewind?;

        info!(
            sets = index.len(),
            frames = ?index.frames_per_sensor(),
            "stream index built"
        );
        Ok(self.index.get_or_init(|| index))
    }

    fn index_pass(&self, progress: &mut impl FnMut(IndexProgress)) -> Result<StreamIndex> {
        self.source.restart()?;
        let feed = PacketFeed::new(&*self.source, &self.profiles, &self.config).recording();
        let mut collator = Collator::new(feed, self.config.dt_ns);
        let mut reported = 0;

        while let Some(set) = collator.next_set()? {
            let members: Vec<Option<u64>> =
                set.frame_ids().into_iter().map(|id| id.map(u64::from)).collect();
            let feed = collator.feed_mut();
            let packets = feed.packets();
            let index = feed
                .index_mut()
                .ok_or_else(|| ScanError::index_build("feed is not recording"))?;
            if index.push_set(members).is_none() {
                return Err(ScanError::index_build("frame set without packet offsets"));
            }
            if packets >= reported + PROGRESS_EVERY {
                reported = packets;
                progress(IndexProgress {
                    processed: packets,
                    total: None,
                });
            }
        }

        let feed = collator.into_feed();
        let processed = feed.packets();
        progress(IndexProgress {
            processed,
            total: Some(processed),
        });
        observability::record_index_progress(1.0);
        feed.into_index()
            .ok_or_else(|| ScanError::index_build("feed is not recording"))
    }

    fn indexed(&self) -> Result<&StreamIndex> {
        self.index.get().ok_or(ScanError::NotIndexed)
    }

    /// Replay one indexed set, then restore the read position
    fn replay(&self, ordinal: usize) -> Result<FrameSet> {
        let index = self.indexed()?;
        let entry = index.entry(ordinal).ok_or(ScanError::OutOfRange {
            index: ordinal as isize,
            len: index.len(),
        })?;
        let targets: Vec<Option<u32>> = entry
            .members
            .iter()
            .map(|m| m.and_then(|k| u32::try_from(k).ok()))
            .collect();

        let _guard = self.lock();
        let resume = self.source.position();
        self.source.set_paced(false);
        let replayed = self.source.seek(entry.seek).and_then(|()| {
            let feed = PacketFeed::new(&*self.source, &self.profiles, &self.config).with_targets(&targets);
            Collator::new(feed, u64::MAX).next_set()
        });
        self.source.set_paced(true);
        if let Some(position) = resume {
            self.source.seek(position)?;
        }

        let set = replayed?.ok_or_else(|| {
            ScanError::index_build(format!("frame set {ordinal} could not be replayed"))
        })?;
        let got = set.frame_ids();
        if got != targets {
            return Err(ScanError::index_build(format!(
                "replayed frame set {ordinal} has members {got:?}, index has {targets:?}"
            )));
        }
        Ok(set)
    }
}

impl MultiScanSource for PacketScanSource {
    fn metadata(&self) -> &[SensorDescriptor] {
        self.source.metadata()
    }

    fn is_live(&self) -> bool {
        self.source.is_live()
    }

    fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    fn scans_num(&self) -> Vec<Option<usize>> {
        match self.index.get() {
            Some(index) => index.frames_per_sensor().into_iter().map(Some).collect(),
            None => vec![None; self.profiles.len()],
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.indexed()?.len())
    }

    #[instrument(name = "packet_source_get", skip(self))]
    fn get(&self, index: isize) -> Result<FrameSet> {
        let ordinal = resolve_index(index, self.len()?)?;
        self.replay(ordinal)
    }

    fn get_slice(&self, slice: SliceSpec) -> Result<Vec<FrameSet>> {
        slice_indices(slice, self.len()?)?
            .into_iter()
            .map(|i| self.replay(i))
            .collect()
    }

    fn iter(&self) -> Result<FrameSetIter<'_>> {
        Ok(Box::new(PacketSetIter {
            owner: self,
            collator: self.collator(),
            yielded: false,
            done: false,
        }))
    }

    fn reset(&self) -> Result<()> {
        let _guard = self.lock();
        self.source.restart()
    }

    fn close(&self) {
        self.source.close();
    }
}

impl PacketScanSource {
    fn collator(&self) -> Collator<PacketFeed<'_>> {
        Collator::new(
            PacketFeed::new(&*self.source, &self.profiles, &self.config),
            self.config.dt_ns,
        )
    }
}

/// Forward iteration; restarts at the end when cycling
struct PacketSetIter<'a> {
    owner: &'a PacketScanSource,
    collator: Collator<PacketFeed<'a>>,
    /// A set was produced during the current pass
    yielded: bool,
    done: bool,
}

impl Iterator for PacketSetIter<'_> {
    type Item = Result<FrameSet>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let step = {
                let _guard = self.owner.lock();
                self.collator.next_set()
            };
            match step {
                Ok(Some(set)) => {
                    self.yielded = true;
                    observability::record_frame_set(&set);
                    return Some(Ok(set));
                }
                Ok(None) => {
                    let source = &self.owner.source;
                    let can_cycle = self.owner.config.cycle && self.yielded && !source.is_closed();
                    if !can_cycle || source.is_live() {
                        self.done = true;
                        return None;
                    }
                    if let Err(e) = source.restart() {
                        self.done = true;
                        return Some(Err(e));
                    }
                    debug!("cycling to first frame set");
                    self.collator = self.owner.collator();
                    self.yielded = false;
                }
                Err(e) => {
                    // timeouts leave the pipeline usable
                    self.done = !e.is_timeout();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColumnHeader, Frame};
    use ingestion::{CaptureOptions, CapturePacketSource, CaptureReader, CaptureWriter, PacketWriter};
    use std::io::Cursor;

    const MS: u64 = 1_000_000;

    fn sensor(serial: u64, port: u16) -> SensorDescriptor {
        let mut desc: SensorDescriptor = serde_json::from_value(serde_json::json!({
            "serial": serial,
            "init_id": 1,
            "format": {
                "pixels_per_column": 1,
                "columns_per_frame": 2,
                "columns_per_packet": 1
            }
        }))
        .unwrap();
        desc.udp_port_lidar = Some(port);
        desc
    }

    fn frame(frame_id: u32, ts: u64) -> Frame {
        let mut f = Frame::new(frame_id, 1, 2);
        f.headers[0] = ColumnHeader::valid(ts, 0);
        f.headers[1] = ColumnHeader::valid(ts + 1, 1);
        f.range[0] = frame_id;
        f
    }

    /// Capture of `(sensor, frame id, ms)` frames, written in schedule order
    fn record(sensor_count: usize, schedule: &[(usize, u32, u64)]) -> (Vec<SensorDescriptor>, Vec<u8>) {
        let sensors: Vec<SensorDescriptor> = (0..sensor_count)
            .map(|s| sensor(s as u64 + 1, 7502 + 2 * s as u16))
            .collect();
        let writers: Vec<PacketWriter> = sensors
            .iter()
            .map(|d| PacketWriter::new(ingestion::PacketFormat::from_descriptor(d)))
            .collect();
        let mut w = CaptureWriter::new(Vec::new()).unwrap();
        for &(s, id, ms) in schedule {
            for p in writers[s].encode(&frame(id, ms * MS)) {
                w.write_record(ms * MS, sensors[s].udp_port_lidar.unwrap(), &p).unwrap();
            }
        }
        (sensors, w.into_inner())
    }

    /// Sensor A at 0/100/200 ms, sensor B at 5/205 ms
    fn capture() -> (Vec<SensorDescriptor>, Vec<u8>) {
        record(2, &[(0, 0, 0), (1, 0, 5), (0, 1, 100), (0, 2, 200), (1, 1, 205)])
    }

    fn open_capture((sensors, data): (Vec<SensorDescriptor>, Vec<u8>), config: SourceConfig) -> PacketScanSource {
        let reader = CaptureReader::new(Cursor::new(data)).unwrap();
        let packets = CapturePacketSource::new(reader, sensors, CaptureOptions::default()).unwrap();
        PacketScanSource::open(Arc::new(packets), config).unwrap()
    }

    fn open(config: SourceConfig) -> PacketScanSource {
        open_capture(capture(), config)
    }

    fn config(index: bool) -> SourceConfig {
        SourceConfig {
            dt_ns: 50 * MS,
            index,
            ..Default::default()
        }
    }

    fn ids(set: &FrameSet) -> Vec<Option<u32>> {
        set.frame_ids()
    }

    #[test]
    fn test_forward_iteration() {
        let source = open(config(false));
        assert!(!source.is_indexed());
        let sets: Vec<_> = source.iter().unwrap().map(|s| ids(&s.unwrap())).collect();
        assert_eq!(
            sets,
            vec![
                vec![Some(0), Some(0)],
                vec![Some(1), None],
                vec![Some(2), Some(1)],
            ]
        );
        assert!(matches!(source.get(0), Err(ScanError::NotIndexed)));
        assert!(matches!(source.len(), Err(ScanError::NotIndexed)));
    }

    #[test]
    fn test_indexed_random_access() {
        let source = open(config(true));
        assert!(source.is_indexed());
        assert_eq!(source.len().unwrap(), 3);
        assert_eq!(source.scans_num(), vec![Some(3), Some(2)]);

        assert_eq!(ids(&source.get(1).unwrap()), vec![Some(1), None]);
        assert_eq!(ids(&source.get(-1).unwrap()), vec![Some(2), Some(1)]);
        assert!(matches!(
            source.get(3),
            Err(ScanError::OutOfRange { index: 3, len: 3 })
        ));
        assert!(source.get_slice(SliceSpec::range(2, 2)).unwrap().is_empty());

        let sets = source.get_slice(SliceSpec::default().with_step(-1)).unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(ids(&sets[0]), vec![Some(2), Some(1)]);
        let first = source.get(0).unwrap();
        assert_eq!(first.get(0).unwrap().range[0], 0);
    }

    #[test]
    fn test_get_restores_iteration_position() {
        let source = open(config(true));
        let mut iter = source.iter().unwrap();
        let first = iter.next().unwrap().unwrap();
        assert_eq!(ids(&first), vec![Some(0), Some(0)]);

        assert_eq!(ids(&source.get(-1).unwrap()), vec![Some(2), Some(1)]);
        let rest: Vec<_> = iter.map(|s| ids(&s.unwrap())).collect();
        assert_eq!(rest, vec![vec![Some(1), None], vec![Some(2), Some(1)]]);
    }

    #[test]
    fn test_cycle_restarts() {
        let source = open(SourceConfig {
            cycle: true,
            ..config(false)
        });
        let sets: Vec<_> = source.iter().unwrap().take(7).map(|s| ids(&s.unwrap())).collect();
        assert_eq!(sets[3], sets[0]);
        assert_eq!(sets[6], sets[0]);
    }

    #[test]
    fn test_build_index_reports_progress() {
        let source = open(config(false));
        let mut reports = Vec::new();
        let index = source.build_index(|p| reports.push(p)).unwrap();
        assert_eq!(index.len(), 3);
        let last = reports.last().unwrap();
        assert_eq!(last.fraction(), Some(1.0));
        assert_eq!(last.processed, 10);
        assert!(source.is_indexed());
    }

    fn t_min(set: &FrameSet) -> u64 {
        set.frames().filter_map(|(_, f)| f.timestamp()).min().unwrap()
    }

    #[test]
    fn test_clock_skewed_late_sensor_keeps_set_order() {
        // sensor B starts recording after A's first 20 frames, with an older clock
        let mut schedule: Vec<(usize, u32, u64)> = (0..20).map(|i| (0, i, 1000 + 100 * u64::from(i))).collect();
        schedule.extend((0..3).map(|i| (1, i, 100 * u64::from(i))));
        let source = open_capture(record(2, &schedule), config(false));

        let sets: Vec<FrameSet> = source.iter().unwrap().map(|s| s.unwrap()).collect();
        let t_mins: Vec<u64> = sets.iter().map(t_min).collect();
        assert!(t_mins.windows(2).all(|w| w[0] <= w[1]), "{t_mins:?}");
        assert_eq!(sets.len(), 20);
        assert!(sets.iter().all(|s| s.get(1).is_none()));
    }

    #[test]
    fn test_replay_matches_iteration_at_single_frame_lag() {
        // three sensors with jittered clocks and interleaved arrival
        let mut schedule = Vec::new();
        for i in 0..12u32 {
            let base = 20 * u64::from(i);
            schedule.push((2, i, base + u64::from(i % 3) * 4));
            schedule.push((0, i, base + 1));
            if i % 4 != 1 {
                schedule.push((1, i, base + u64::from(i % 2) * 6));
            }
        }
        let config = SourceConfig {
            dt_ns: 7 * MS,
            lag_frames: 1,
            complete: true,
            index: true,
            ..Default::default()
        };
        let source = open_capture(record(3, &schedule), config);
        let iterated: Vec<Vec<Option<u32>>> = source.iter().unwrap().map(|s| ids(&s.unwrap())).collect();
        assert_eq!(source.len().unwrap(), iterated.len());
        for (i, expected) in iterated.iter().enumerate() {
            assert_eq!(&ids(&source.get(i as isize).unwrap()), expected, "set {i}");
        }
        let t_mins: Vec<u64> = source.get_slice(SliceSpec::default()).unwrap().iter().map(t_min).collect();
        assert!(t_mins.windows(2).all(|w| w[0] <= w[1]), "{t_mins:?}");
    }

    #[test]
    fn test_equal_timestamps_stay_together_at_single_frame_lag() {
        let config = SourceConfig {
            dt_ns: MS,
            lag_frames: 1,
            ..Default::default()
        };
        // B's frame closes first, while A has nothing queued yet
        let source = open_capture(record(2, &[(1, 0, 0), (0, 0, 0)]), config);
        let sets: Vec<_> = source.iter().unwrap().map(|s| ids(&s.unwrap())).collect();
        assert_eq!(sets, vec![vec![Some(0), Some(0)]]);
    }

    #[test]
    fn test_close_ends_iteration() {
        let source = open(config(false));
        let mut iter = source.iter().unwrap();
        assert!(iter.next().is_some());
        source.close();
        assert!(iter.next().is_none());
    }
}
