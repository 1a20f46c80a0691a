//! RecorderSink - re-encodes frame sets into a capture file

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use contracts::{FrameSet, FrameSink, Result, ScanError, SensorDescriptor};
use ingestion::{CaptureWriter, PacketFormat, PacketWriter};
use tracing::{debug, info, instrument};

use crate::error::DispatcherError;

const BASE_LIDAR_PORT: u16 = 7502;

/// Sink writing every present frame back as lidar packets
///
/// Each sensor's packets go to its configured lidar port (or `7502 + 2*i`
/// when none is set), stamped with the frame's representative timestamp, so
/// the output replays through the capture source.
pub struct RecorderSink {
    name: String,
    path: PathBuf,
    writer: Option<CaptureWriter<BufWriter<File>>>,
    encoders: Vec<(u16, PacketWriter)>,
}

impl RecorderSink {
    pub fn create(name: impl Into<String>, path: &Path, sensors: &[SensorDescriptor]) -> Result<Self> {
        let writer = CaptureWriter::create(path)?;
        let encoders = sensors
            .iter()
            .enumerate()
            .map(|(i, desc)| {
                let port = desc
                    .udp_port_lidar
                    .filter(|p| *p != 0)
                    .unwrap_or(BASE_LIDAR_PORT + 2 * i as u16);
                (port, PacketWriter::new(PacketFormat::from_descriptor(desc)))
            })
            .collect();

        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            writer: Some(writer),
            encoders,
        })
    }

    /// Build from sink params; requires `path`
    pub fn from_params(
        name: &str,
        params: &HashMap<String, String>,
        sensors: &[SensorDescriptor],
    ) -> std::result::Result<Self, DispatcherError> {
        let path = params
            .get("path")
            .ok_or_else(|| DispatcherError::missing_param(name, "path"))?;
        Self::create(name, Path::new(path), sensors)
            .map_err(|e| DispatcherError::sink_creation(name, e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lidar port used for a sensor's packets
    pub fn port(&self, sensor: usize) -> Option<u16> {
        self.encoders.get(sensor).map(|(port, _)| *port)
    }

    fn writer(&mut self) -> Result<&mut CaptureWriter<BufWriter<File>>> {
        let name = &self.name;
        self.writer
            .as_mut()
            .ok_or_else(|| ScanError::sink_write(name, "recorder closed"))
    }
}

impl FrameSink for RecorderSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "recorder_sink_write", skip(self, set), fields(sink = %self.name))]
    fn write(&mut self, set: &FrameSet) -> Result<()> {
        let mut packets = Vec::new();
        for (sensor, frame) in set.frames() {
            let Some((port, encoder)) = self.encoders.get(sensor) else {
                return Err(ScanError::sink_write(
                    &self.name,
                    format!("no descriptor for sensor {sensor}"),
                ));
            };
            let ts = frame.timestamp().unwrap_or(0);
            packets.extend(encoder.encode(frame).into_iter().map(|p| (ts, *port, p)));
        }

        let name = self.name.clone();
        let writer = self.writer()?;
        for (ts, port, payload) in &packets {
            writer
                .write_record(*ts, *port, payload)
                .map_err(|e| ScanError::sink_write(&name, e.to_string()))?;
        }
        debug!(sink = %name, packets = packets.len(), "frame set recorded");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let name = self.name.clone();
        self.writer()?
            .flush()
            .map_err(|e| ScanError::sink_write(&name, e.to_string()))
    }

    #[instrument(name = "recorder_sink_close", skip(self))]
    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ScanError::sink_write(&self.name, e.to_string()))?;
            info!(sink = %self.name, records = writer.records(), path = %self.path.display(), "RecorderSink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColumnHeader, Frame};
    use ingestion::CaptureReader;

    fn sensor(port: Option<u16>) -> SensorDescriptor {
        let mut desc: SensorDescriptor = serde_json::from_value(serde_json::json!({
            "serial": 3,
            "init_id": 4,
            "format": {
                "pixels_per_column": 2,
                "columns_per_frame": 4,
                "columns_per_packet": 2
            }
        }))
        .unwrap();
        desc.udp_port_lidar = port;
        desc
    }

    fn frame(frame_id: u32, ts: u64) -> Frame {
        let mut f = Frame::new(frame_id, 2, 4);
        for c in 0..4 {
            f.headers[c] = ColumnHeader::valid(ts + c as u64, c as u16);
        }
        f
    }

    #[test]
    fn test_recorder_requires_path() {
        let err = RecorderSink::from_params("rec", &HashMap::new(), &[sensor(None)]).err();
        assert!(matches!(err, Some(DispatcherError::MissingParam { .. })));
    }

    #[test]
    fn test_recorder_writes_packets_per_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.cap");
        let params = HashMap::from([("path".to_string(), path.display().to_string())]);
        let mut sink = RecorderSink::from_params("rec", &params, &[sensor(Some(9000)), sensor(None)]).unwrap();
        assert_eq!(sink.port(0), Some(9000));
        assert_eq!(sink.port(1), Some(7504));

        let set = FrameSet::from_slots(vec![Some(frame(1, 100)), Some(frame(1, 110))]);
        sink.write(&set).unwrap();
        sink.write(&FrameSet::from_slots(vec![None, Some(frame(2, 200))])).unwrap();
        sink.close().unwrap();
        assert!(sink.write(&set).is_err());

        let mut reader = CaptureReader::open(&path).unwrap();
        let mut records = Vec::new();
        while let Some(r) = reader.next_record().unwrap() {
            records.push((r.host_timestamp, r.dst_port));
        }
        assert_eq!(
            records,
            vec![(100, 9000), (100, 9000), (110, 7504), (110, 7504), (200, 7504), (200, 7504)]
        );
    }
}
