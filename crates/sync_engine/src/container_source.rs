//! Multi-scan source over an indexed container
//!
//! Frame sets are formed by collating the decoded scan messages of every
//! stream. Index members are per-stream message ordinals, so `get(i)` reads
//! each member message directly through the container's message index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use config_loader::MetadataLoader;
use contracts::{
    ContainerReader, Frame, FrameSet, FrameSetIter, MultiScanSource, Result, ScanError, ScanStream,
    SensorDescriptor, SliceSpec, SourceConfig, StreamIndex,
};
use ingestion::decode_frame;
use tracing::{debug, info, instrument};

use crate::collator::Collator;
use crate::feed::ContainerFeed;
use crate::slicer::{resolve_index, slice_indices};

pub struct ContainerScanSource<R> {
    reader: Mutex<Option<R>>,
    sensors: Vec<SensorDescriptor>,
    streams: Vec<ScanStream>,
    /// Scan stream of each sensor
    stream_of: Vec<u32>,
    config: SourceConfig,
    reader_indexed: bool,
    index: OnceLock<StreamIndex>,
    closed: AtomicBool,
}

impl<R: ContainerReader> ContainerScanSource<R> {
    /// Open over a container reader
    ///
    /// When `config.index` is set and the container has no message index,
    /// the index is built in place first.
    ///
    /// # Errors
    /// `ConfigValidation` when a sensor does not have exactly one scan stream
    #[instrument(name = "container_source_open", skip_all)]
    pub fn open(mut reader: R, config: SourceConfig) -> Result<Self> {
        if config.index && !reader.has_index() {
            info!("container has no message index, building it");
            reader.build_index()?;
        }

        let mut sensors = reader.sensors().to_vec();
        MetadataLoader::apply_overrides(&mut sensors, &config)?;
        let streams = reader.scan_streams().to_vec();

        let mut stream_of = vec![None; sensors.len()];
        for s in &streams {
            let slot = stream_of.get_mut(s.sensor).ok_or_else(|| {
                ScanError::config_validation(
                    format!("container.streams[{}]", s.stream_id),
                    format!("unknown sensor {}", s.sensor),
                )
            })?;
            if slot.replace(s.stream_id).is_some() {
                return Err(ScanError::config_validation(
                    format!("container.streams[{}]", s.stream_id),
                    format!("sensor {} has more than one scan stream", s.sensor),
                ));
            }
        }
        let stream_of = stream_of
            .into_iter()
            .enumerate()
            .map(|(sensor, s)| {
                s.ok_or_else(|| {
                    ScanError::config_validation(
                        format!("container.sensors[{sensor}]"),
                        "no scan stream",
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let reader_indexed = reader.has_index();
        debug!(sensors = sensors.len(), indexed = reader_indexed, "container source opened");
        Ok(Self {
            reader: Mutex::new(Some(reader)),
            sensors,
            streams,
            stream_of,
            config,
            reader_indexed,
            index: OnceLock::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn reader(&self) -> MutexGuard<'_, Option<R>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_reader<T>(&self, f: impl FnOnce(&R) -> Result<T>) -> Result<T> {
        let guard = self.reader();
        let reader = guard
            .as_ref()
            .ok_or_else(|| ScanError::Other("container source is closed".into()))?;
        f(reader)
    }

    fn collator(&self) -> Result<Collator<ContainerFeed<'_>>> {
        let messages = self.with_reader(|r| r.messages(&self.stream_of, None, None))?;
        let feed = ContainerFeed::new(messages, &self.streams, self.sensors.len(), &self.config, &self.closed);
        Ok(Collator::new(feed, self.config.dt_ns))
    }

    /// Frame-set index from one collation pass, built on first use
    fn set_index(&self) -> Result<&StreamIndex> {
        if !self.reader_indexed {
            return Err(ScanError::NotIndexed);
        }
        if let Some(index) = self.index.get() {
            return Ok(index);
        }

        let mut collator = self.collator()?;
        let mut index = StreamIndex::new(self.sensors.len());
        while let Some(set) = collator.next_set()? {
            let mut members = Vec::with_capacity(set.len());
            for sensor in 0..set.len() {
                let member = match set.get(sensor) {
                    Some(_) => {
                        let (ordinal, ts) = collator
                            .feed_mut()
                            .consumed(sensor)
                            .ok_or_else(|| ScanError::index_build("collated frame was never handed out"))?;
                        index.record_frame(sensor, ordinal, ts);
                        Some(ordinal)
                    }
                    None => None,
                };
                members.push(member);
            }
            index.push_set(members);
        }
        info!(sets = index.len(), "container frame sets indexed");
        Ok(self.index.get_or_init(|| index))
    }

    /// Decode the message with the given ordinal of a sensor's stream
    fn fetch(&self, sensor: usize, ordinal: u64) -> Result<Frame> {
        let stream = self.stream_of[sensor];
        let ordinal = ordinal as usize;
        let payload = self.with_reader(|r| {
            let ts = r.ts_by_message_index(stream, ordinal)?;
            // messages sharing a timestamp are told apart by position
            let mut first = ordinal;
            while first > 0 && r.ts_by_message_index(stream, first - 1)? == ts {
                first -= 1;
            }
            r.messages(&[stream], Some(ts), Some(ts))?
                .nth(ordinal - first)
                .transpose()?
                .map(|m| m.payload)
                .ok_or_else(|| ScanError::index_build(format!("message {ordinal} of stream {stream} is missing")))
        })?;
        decode_frame(&payload, ordinal as u64)
    }

    fn read_set(&self, ordinal: usize) -> Result<FrameSet> {
        let index = self.set_index()?;
        let entry = index.entry(ordinal).ok_or(ScanError::OutOfRange {
            index: ordinal as isize,
            len: index.len(),
        })?;
        let slots = entry
            .members
            .iter()
            .enumerate()
            .map(|(sensor, m)| m.map(|ord| self.fetch(sensor, ord)).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(FrameSet::from_slots(slots))
    }
}

impl<R: ContainerReader> MultiScanSource for ContainerScanSource<R> {
    fn metadata(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    fn is_live(&self) -> bool {
        false
    }

    fn is_indexed(&self) -> bool {
        self.reader_indexed
    }

    fn scans_num(&self) -> Vec<Option<usize>> {
        self.stream_of
            .iter()
            .map(|stream| {
                self.with_reader(|r| r.message_count(*stream)).ok()
            })
            .collect()
    }

    fn len(&self) -> Result<usize> {
        Ok(self.set_index()?.len())
    }

    #[instrument(name = "container_source_get", skip(self))]
    fn get(&self, index: isize) -> Result<FrameSet> {
        let ordinal = resolve_index(index, self.len()?)?;
        self.read_set(ordinal)
    }

    fn get_slice(&self, slice: SliceSpec) -> Result<Vec<FrameSet>> {
        slice_indices(slice, self.len()?)?
            .into_iter()
            .map(|i| self.read_set(i))
            .collect()
    }

    /// Every call starts from the first message
    fn iter(&self) -> Result<FrameSetIter<'_>> {
        Ok(Box::new(ContainerSetIter {
            owner: self,
            collator: Some(self.collator()?),
            yielded: false,
        }))
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if self.reader().take().is_some() {
            debug!("container source closed");
        }
    }
}

struct ContainerSetIter<'a, R> {
    owner: &'a ContainerScanSource<R>,
    collator: Option<Collator<ContainerFeed<'a>>>,
    yielded: bool,
}

impl<R: ContainerReader> Iterator for ContainerSetIter<'_, R> {
    type Item = Result<FrameSet>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let collator = self.collator.as_mut()?;
            match collator.next_set() {
                Ok(Some(set)) => {
                    self.yielded = true;
                    observability::record_frame_set(&set);
                    return Some(Ok(set));
                }
                Ok(None) => {
                    let closed = self.owner.closed.load(Ordering::Acquire);
                    if !self.owner.config.cycle || !self.yielded || closed {
                        self.collator = None;
                        return None;
                    }
                    debug!("cycling to first frame set");
                    self.yielded = false;
                    match self.owner.collator() {
                        Ok(c) => self.collator = Some(c),
                        Err(e) => {
                            self.collator = None;
                            return Some(Err(e));
                        }
                    }
                }
                Err(e) => {
                    self.collator = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
