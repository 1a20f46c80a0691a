//! Capture file packet source
//!
//! The reader lives behind a guarded nullable handle: `close` takes it out
//! of the mutex, and a read that finds the slot empty reports a clean end of
//! stream instead of failing.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{
    PacketMultiSource, Result, ScanError, SensorDescriptor, SensorPacket, SourceConfig,
    ValidationCounts,
};
use tracing::{debug, info, instrument, warn};

use crate::capture::CaptureReader;
use crate::format::PacketFormat;
use crate::gate::PacketGate;
use crate::metrics::IngestionMetrics;

/// Records inspected when guessing a missing lidar port
pub const PORT_GUESS_RECORDS: usize = 1000;

/// Options of a capture packet source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    /// Pass packets with mismatched sensor ids through
    pub soft_id_check: bool,
    /// Real-time playback multiple, 0 = as fast as possible
    pub rate: f64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            soft_id_check: false,
            rate: 0.0,
        }
    }
}

impl From<&SourceConfig> for CaptureOptions {
    fn from(config: &SourceConfig) -> Self {
        Self {
            soft_id_check: config.soft_id_check,
            rate: config.rate,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pacing {
    first_host_ts: u64,
    started: Instant,
}

/// Packet source over a capture file
pub struct CapturePacketSource<R = BufReader<File>> {
    sensors: Vec<SensorDescriptor>,
    gate: PacketGate,
    reader: Mutex<Option<CaptureReader<R>>>,
    rate: f64,
    paced: AtomicBool,
    pacing: Mutex<Option<Pacing>>,
}

impl CapturePacketSource {
    /// Open a capture file
    pub fn open(path: &Path, sensors: Vec<SensorDescriptor>, options: CaptureOptions) -> Result<Self> {
        info!(path = %path.display(), sensors = sensors.len(), "opening capture");
        Self::new(CaptureReader::open(path)?, sensors, options)
    }
}

impl<R: Read + Seek + Send> CapturePacketSource<R> {
    /// Build the source, guessing lidar ports that the descriptors omit
    ///
    /// # Errors
    /// - `PortCollision` when two streams share a port
    /// - `MissingPort` when a lidar port can neither be read nor guessed
    #[instrument(name = "capture_source_open", skip_all, fields(sensors = sensors.len()))]
    pub fn new(
        mut reader: CaptureReader<R>,
        mut sensors: Vec<SensorDescriptor>,
        options: CaptureOptions,
    ) -> Result<Self> {
        if sensors.iter().any(|s| s.udp_port_lidar.is_none()) {
            guess_lidar_ports(&mut reader, &mut sensors)?;
            reader.reset()?;
        }
        if let Some(sensor) = sensors.iter().position(|s| s.udp_port_lidar.is_none()) {
            return Err(ScanError::MissingPort { sensor });
        }

        let gate = PacketGate::new(&sensors, options.soft_id_check, Arc::new(IngestionMetrics::new()))?;
        Ok(Self {
            sensors,
            gate,
            reader: Mutex::new(Some(reader)),
            rate: options.rate,
            paced: AtomicBool::new(true),
            pacing: Mutex::new(None),
        })
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        self.gate.metrics()
    }

    fn reader(&self) -> MutexGuard<'_, Option<CaptureReader<R>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_pacing(&self) {
        *self.pacing.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Sleep until the packet is due at the configured rate
    fn pace(&self, host_ts: u64) {
        if self.rate <= 0.0 || !self.paced.load(Ordering::Relaxed) {
            return;
        }
        let due = {
            let mut pacing = self.pacing.lock().unwrap_or_else(PoisonError::into_inner);
            let p = pacing.get_or_insert(Pacing {
                first_host_ts: host_ts,
                started: Instant::now(),
            });
            let offset_ns = host_ts.saturating_sub(p.first_host_ts) as f64 / self.rate;
            p.started + Duration::from_nanos(offset_ns as u64)
        };
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }
}

impl<R: Read + Seek + Send> PacketMultiSource for CapturePacketSource<R> {
    fn metadata(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    fn next_packet(&self) -> Result<Option<SensorPacket>> {
        loop {
            let record = {
                let mut guard = self.reader();
                let Some(reader) = guard.as_mut() else {
                    return Ok(None);
                };
                match reader.next_record()? {
                    Some(r) => r,
                    None => return Ok(None),
                }
            };
            let metrics = self.gate.metrics();
            metrics.record_read();

            let Some((sensor, kind)) = self.gate.lookup(record.dst_port) else {
                metrics.record_unmapped();
                continue;
            };
            let Some(packet) = self
                .gate
                .admit(sensor, kind, record.payload, record.host_timestamp)
            else {
                continue;
            };

            self.pace(record.host_timestamp);
            metrics.record_admitted();
            return Ok(Some(SensorPacket {
                sensor,
                offset: Some(record.offset),
                packet,
            }));
        }
    }

    #[instrument(name = "capture_source_seek", skip(self))]
    fn seek(&self, offset: u64) -> Result<()> {
        let mut guard = self.reader();
        if let Some(reader) = guard.as_mut() {
            reader.seek(offset)?;
        }
        drop(guard);
        self.reset_pacing();
        Ok(())
    }

    fn position(&self) -> Option<u64> {
        self.reader().as_ref().map(CaptureReader::position)
    }

    fn restart(&self) -> Result<()> {
        let mut guard = self.reader();
        if let Some(reader) = guard.as_mut() {
            reader.reset()?;
        }
        drop(guard);
        self.reset_pacing();
        debug!("capture restarted");
        Ok(())
    }

    fn set_paced(&self, paced: bool) {
        if !self.paced.swap(paced, Ordering::Relaxed) && paced {
            self.reset_pacing();
        }
    }

    fn close(&self) {
        if self.reader().take().is_some() {
            debug!("capture closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.reader().is_none()
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn is_live(&self) -> bool {
        false
    }

    fn validation_error_counts(&self) -> Vec<ValidationCounts> {
        self.gate.counts()
    }
}

/// Assign a lidar port to each sensor that has none
///
/// Candidates are ports no descriptor claims whose payloads have exactly the
/// sensor's lidar packet size. A candidate whose packets carry the sensor's
/// serial wins; otherwise the busiest candidate is taken.
fn guess_lidar_ports<R: Read + Seek>(
    reader: &mut CaptureReader<R>,
    sensors: &mut [SensorDescriptor],
) -> Result<()> {
    let claimed: HashSet<u16> = sensors
        .iter()
        .flat_map(|s| [s.udp_port_lidar, s.udp_port_imu])
        .flatten()
        .collect();

    // port -> (payload size -> count), and the serials seen per port
    let mut sizes: BTreeMap<u16, BTreeMap<usize, usize>> = BTreeMap::new();
    let mut serials: BTreeMap<u16, HashSet<u64>> = BTreeMap::new();
    for _ in 0..PORT_GUESS_RECORDS {
        let Some(record) = reader.next_record()? else {
            break;
        };
        if claimed.contains(&record.dst_port) {
            continue;
        }
        *sizes
            .entry(record.dst_port)
            .or_default()
            .entry(record.payload.len())
            .or_default() += 1;
        if let Some((serial, _)) = PacketFormat::sensor_ids(&record.payload) {
            serials.entry(record.dst_port).or_default().insert(serial);
        }
    }

    let mut taken = HashSet::new();
    for (sensor, desc) in sensors.iter_mut().enumerate() {
        if desc.udp_port_lidar.is_some() {
            continue;
        }
        let size = PacketFormat::from_descriptor(desc).lidar_packet_size();
        let candidates: Vec<(u16, usize)> = sizes
            .iter()
            .filter(|(port, _)| !taken.contains(*port))
            .filter_map(|(port, by_size)| by_size.get(&size).map(|n| (*port, *n)))
            .collect();

        let by_serial = candidates.iter().find(|(port, _)| {
            serials
                .get(port)
                .is_some_and(|s| s.contains(&desc.serial))
        });
        let guess = by_serial
            .or_else(|| candidates.iter().max_by_key(|(_, n)| *n))
            .map(|(port, _)| *port);

        match guess {
            Some(port) => {
                info!(sensor, port, "guessed lidar port");
                taken.insert(port);
                desc.udp_port_lidar = Some(port);
            }
            None => warn!(sensor, size, "no lidar port candidate"),
        }
    }
    Ok(())
}
