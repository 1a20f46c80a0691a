//! Source opening
//!
//! Resolves descriptors, applies configuration overrides once and wraps the
//! packet or container input into a scan source of the requested capability.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config_loader::{validate_descriptor, MetadataLoader};
use contracts::{
    AnyScanSource, MultiScanSource, PacketMultiSource, Result, SensorDescriptor, SourceConfig,
};
use ingestion::{CaptureOptions, CapturePacketSource, MemoryContainer, UdpOptions, UdpPacketSource};
use tracing::{info, instrument};

use crate::adapter::SingleSensorView;
use crate::container_source::ContainerScanSource;
use crate::packet_source::PacketScanSource;

/// Where scans come from
#[derive(Debug)]
pub enum SourceSpec {
    /// Capture file; with no metadata paths, the `<stem>*.json` files next
    /// to the capture are used
    Capture { path: PathBuf, metadata: Vec<PathBuf> },
    /// Capture file with descriptors already in memory
    CaptureWith { path: PathBuf, sensors: Vec<SensorDescriptor> },
    /// Live sensors on their configured UDP ports
    Live { sensors: Vec<SensorDescriptor>, bind: IpAddr },
    Container(MemoryContainer),
}

/// Open a scan source
///
/// With `sensor` set, the result is a single-sensor view of that sensor.
#[instrument(name = "open_source", skip_all)]
pub fn open_source(spec: SourceSpec, config: &SourceConfig, sensor: Option<usize>) -> Result<AnyScanSource> {
    let multi: Arc<dyn MultiScanSource> = match spec {
        SourceSpec::Capture { path, metadata } => {
            let paths = if metadata.is_empty() {
                MetadataLoader::resolve_for(&path)?
            } else {
                metadata
            };
            let sensors = prepare(MetadataLoader::load_all(&paths)?, config)?;
            info!(path = %path.display(), sensors = sensors.len(), "opening capture source");
            let packets = CapturePacketSource::open(&path, sensors, CaptureOptions::from(config))?;
            packet_scans(Arc::new(packets), config)?
        }
        SourceSpec::CaptureWith { path, sensors } => {
            let sensors = prepare(sensors, config)?;
            let packets = CapturePacketSource::open(&path, sensors, CaptureOptions::from(config))?;
            packet_scans(Arc::new(packets), config)?
        }
        SourceSpec::Live { sensors, bind } => {
            let sensors = prepare(sensors, config)?;
            let options = UdpOptions {
                bind,
                timeout: config.timeout_ms.map(Duration::from_millis),
                soft_id_check: config.soft_id_check,
                ..Default::default()
            };
            info!(%bind, sensors = sensors.len(), "opening live source");
            packet_scans(Arc::new(UdpPacketSource::open(sensors, options)?), config)?
        }
        SourceSpec::Container(container) => {
            Arc::new(ContainerScanSource::open(container, config.clone())?)
        }
    };

    match sensor {
        Some(i) => Ok(AnyScanSource::Single(Arc::new(SingleSensorView::new(multi, i)?))),
        None => Ok(AnyScanSource::Multi(multi)),
    }
}

fn prepare(mut sensors: Vec<SensorDescriptor>, config: &SourceConfig) -> Result<Vec<SensorDescriptor>> {
    MetadataLoader::apply_overrides(&mut sensors, config)?;
    for (i, desc) in sensors.iter().enumerate() {
        validate_descriptor(i, desc)?;
    }
    Ok(sensors)
}

fn packet_scans(packets: Arc<dyn PacketMultiSource>, config: &SourceConfig) -> Result<Arc<dyn MultiScanSource>> {
    Ok(Arc::new(PacketScanSource::open(packets, config.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColumnHeader, ExtrinsicOverride, Frame, ScanError};
    use ingestion::{CaptureWriter, PacketFormat, PacketWriter};

    fn sensor(serial: u64, port: u16) -> SensorDescriptor {
        let mut desc: SensorDescriptor = serde_json::from_value(serde_json::json!({
            "serial": serial,
            "init_id": 1,
            "format": {
                "pixels_per_column": 1,
                "columns_per_frame": 2,
                "columns_per_packet": 2
            }
        }))
        .unwrap();
        desc.udp_port_lidar = Some(port);
        desc
    }

    fn frame(frame_id: u32, ts: u64) -> Frame {
        let mut f = Frame::new(frame_id, 1, 2);
        f.headers[0] = ColumnHeader::valid(ts, 0);
        f.headers[1] = ColumnHeader::valid(ts, 1);
        f
    }

    fn write_capture(dir: &std::path::Path) -> PathBuf {
        let sensors = [sensor(10, 7502), sensor(11, 7504)];
        for (i, s) in sensors.iter().enumerate() {
            let path = dir.join(format!("drive_{i}.json"));
            std::fs::write(path, serde_json::to_string(s).unwrap()).unwrap();
        }
        let path = dir.join("drive.cap");
        let mut w = CaptureWriter::create(&path).unwrap();
        for id in 0..4u32 {
            let ts = u64::from(id) * 100_000_000;
            for s in &sensors {
                let writer = PacketWriter::new(PacketFormat::from_descriptor(s));
                for p in writer.encode(&frame(id, ts + 1_000)) {
                    w.write_record(ts, s.udp_port_lidar.unwrap(), &p).unwrap();
                }
            }
        }
        w.flush().unwrap();
        path
    }

    #[test]
    fn test_open_capture_with_resolved_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_capture(dir.path());
        let config = SourceConfig {
            index: true,
            extrinsics: vec![ExtrinsicOverride {
                sensor: 1,
                matrix: (0..16).map(f64::from).collect(),
            }],
            ..Default::default()
        };
        let source = open_source(
            SourceSpec::Capture {
                path,
                metadata: Vec::new(),
            },
            &config,
            None,
        )
        .unwrap();
        assert_eq!(source.sensor_count(), 2);
        assert!(source.is_indexed());
        assert_eq!(source.len().unwrap(), 4);
        assert_eq!(source.metadata()[1].extrinsic[(0, 1)], 1.0);

        let multi = source.as_multi().unwrap();
        assert_eq!(multi.get(-1).unwrap().frame_ids(), vec![Some(3), Some(3)]);
    }

    #[test]
    fn test_single_sensor_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_capture(dir.path());
        let source = open_source(
            SourceSpec::Capture {
                path: path.clone(),
                metadata: Vec::new(),
            },
            &SourceConfig::default(),
            Some(1),
        )
        .unwrap();
        let AnyScanSource::Single(view) = &source else {
            panic!("expected a single-sensor source");
        };
        assert_eq!(view.metadata().serial, 11);
        let ids: Vec<u32> = view.iter().unwrap().map(|f| f.unwrap().frame_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(matches!(view.get(0), Err(ScanError::NotIndexed)));

        let err = open_source(
            SourceSpec::Capture {
                path,
                metadata: Vec::new(),
            },
            &SourceConfig::default(),
            Some(5),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::ConfigValidation { .. }));
    }

    #[test]
    fn test_open_container() {
        let mut b = MemoryContainer::builder();
        let a = b.add_sensor(sensor(1, 7502));
        b.push_frame(a, &frame(0, 10)).unwrap();
        let source = open_source(SourceSpec::Container(b.build(true)), &SourceConfig::default(), None).unwrap();
        assert!(source.is_indexed());
        assert_eq!(source.len().unwrap(), 1);
        assert!(!source.is_live());
    }
}
