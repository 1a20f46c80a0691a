//! Live UDP packet source
//!
//! One receiver thread per bound port. Receivers poll their socket with a
//! short read timeout so they notice shutdown, and forward datagrams through
//! a bounded channel; a full channel drops the datagram and counts it.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use contracts::{
    PacketKind, PacketMultiSource, Result, ScanError, SensorDescriptor, SensorPacket,
    ValidationCounts,
};
use tracing::{debug, error, info, warn};

use crate::gate::PacketGate;
use crate::metrics::IngestionMetrics;

const SOCKET_POLL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 65_536;

/// Options of a live source
#[derive(Debug, Clone, Copy)]
pub struct UdpOptions {
    pub bind: IpAddr,
    /// Deadline of one `next_packet` call, `None` blocks until close
    pub timeout: Option<Duration>,
    pub soft_id_check: bool,
    /// Datagrams buffered between receivers and the pipeline
    pub queue_capacity: usize,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            timeout: Some(Duration::from_secs(1)),
            soft_id_check: false,
            queue_capacity: 4096,
        }
    }
}

struct Datagram {
    sensor: usize,
    kind: PacketKind,
    host_timestamp: u64,
    payload: Bytes,
}

/// Packet source reading live sensors
pub struct UdpPacketSource {
    sensors: Vec<SensorDescriptor>,
    gate: PacketGate,
    rx: Receiver<Datagram>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    timeout: Option<Duration>,
}

impl UdpPacketSource {
    /// Bind every configured port and start the receivers
    ///
    /// A configured port of 0 binds an ephemeral port; the descriptor is
    /// updated with the port actually bound.
    ///
    /// # Errors
    /// - `MissingPort` when a sensor has no lidar port
    /// - `PortCollision` when two streams share a port
    /// - `Io` when a bind fails
    pub fn open(mut sensors: Vec<SensorDescriptor>, options: UdpOptions) -> Result<Self> {
        if let Some(sensor) = sensors.iter().position(|s| s.udp_port_lidar.is_none()) {
            return Err(ScanError::MissingPort { sensor });
        }

        let mut fixed: HashMap<u16, usize> = HashMap::new();
        for (sensor, desc) in sensors.iter().enumerate() {
            for port in [desc.udp_port_lidar, desc.udp_port_imu].into_iter().flatten() {
                if port == 0 {
                    continue;
                }
                if let Some(&first) = fixed.get(&port) {
                    return Err(ScanError::PortCollision {
                        port,
                        first,
                        second: sensor,
                    });
                }
                fixed.insert(port, sensor);
            }
        }

        let mut sockets = Vec::new();
        for (sensor, desc) in sensors.iter_mut().enumerate() {
            for (slot, kind) in [
                (&mut desc.udp_port_lidar, PacketKind::Lidar),
                (&mut desc.udp_port_imu, PacketKind::Imu),
            ] {
                let Some(port) = *slot else { continue };
                let socket = UdpSocket::bind(SocketAddr::new(options.bind, port))?;
                socket.set_read_timeout(Some(SOCKET_POLL))?;
                *slot = Some(socket.local_addr()?.port());
                sockets.push((sensor, kind, socket));
            }
        }

        let metrics = Arc::new(IngestionMetrics::new());
        let gate = PacketGate::new(&sensors, options.soft_id_check, Arc::clone(&metrics))?;

        let (tx, rx) = bounded(options.queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers = sockets
            .into_iter()
            .map(|(sensor, kind, socket)| {
                spawn_receiver(sensor, kind, socket, tx.clone(), Arc::clone(&shutdown), Arc::clone(&metrics))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(sensors = sensors.len(), receivers = workers.len(), "live source started");
        Ok(Self {
            sensors,
            gate,
            rx,
            shutdown,
            workers: Mutex::new(workers),
            timeout: options.timeout,
        })
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        self.gate.metrics()
    }

    /// Lidar port actually bound for a sensor
    pub fn lidar_port(&self, sensor: usize) -> Option<u16> {
        self.sensors.get(sensor)?.udp_port_lidar
    }

    fn recv(&self, deadline: Option<Instant>) -> Result<Option<Datagram>> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(None);
            }
            let wait = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        let waited_ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
                        return Err(ScanError::Timeout { waited_ms });
                    }
                    (d - now).min(SOCKET_POLL)
                }
                None => SOCKET_POLL,
            };
            match self.rx.recv_timeout(wait) {
                Ok(d) => return Ok(Some(d)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

fn spawn_receiver(
    sensor: usize,
    kind: PacketKind,
    socket: UdpSocket,
    tx: Sender<Datagram>,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<IngestionMetrics>,
) -> Result<JoinHandle<()>> {
    let name = format!("udp-rx-{sensor}-{kind:?}").to_lowercase();
    let handle = std::thread::Builder::new().name(name).spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !shutdown.load(Ordering::Acquire) {
            let n = match socket.recv_from(&mut buf) {
                Ok((n, _)) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    warn!(sensor, error = %e, "udp receive failed");
                    break;
                }
            };
            metrics.record_read();
            let datagram = Datagram {
                sensor,
                kind,
                host_timestamp: now_ns(),
                payload: Bytes::copy_from_slice(&buf[..n]),
            };
            match tx.try_send(datagram) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => metrics.record_dropped(),
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        debug!(sensor, "udp receiver stopped");
    })?;
    Ok(handle)
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl PacketMultiSource for UdpPacketSource {
    fn metadata(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    fn next_packet(&self) -> Result<Option<SensorPacket>> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            let Some(d) = self.recv(deadline)? else {
                return Ok(None);
            };
            if let Some(packet) = self.gate.admit(d.sensor, d.kind, d.payload, d.host_timestamp) {
                self.gate.metrics().record_admitted();
                return Ok(Some(SensorPacket {
                    sensor: d.sensor,
                    offset: None,
                    packet,
                }));
            }
        }
    }

    fn seek(&self, _offset: u64) -> Result<()> {
        Err(ScanError::Other("live source is not seekable".into()))
    }

    fn position(&self) -> Option<u64> {
        None
    }

    fn restart(&self) -> Result<()> {
        Err(ScanError::Other("live source cannot restart".into()))
    }

    fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        join_receivers(workers);
        info!("live source closed");
    }

    fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn is_live(&self) -> bool {
        true
    }

    fn validation_error_counts(&self) -> Vec<ValidationCounts> {
        self.gate.counts()
    }
}

/// Join receiver threads, returns how many of them panicked
fn join_receivers(workers: Vec<JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for w in workers {
        let name = w.thread().name().unwrap_or("receiver").to_string();
        if w.join().is_err() {
            error!(thread = %name, "udp receiver panicked");
            panicked += 1;
        }
    }
    panicked
}

impl Drop for UdpPacketSource {
    fn drop(&mut self) {
        self.close();
    }
}
