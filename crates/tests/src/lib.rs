//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置契约检查
//! - 抓包文件 -> 索引 -> 随机访问 e2e 测试
//! - 录制回环与回放 e2e 测试

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{PipelineConfig, DEFAULT_DT_NS};

    #[test]
    fn test_default_config_survives_toml() {
        let toml = ConfigLoader::to_toml(&PipelineConfig::default()).unwrap();
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.source.dt_ns, DEFAULT_DT_NS);
        assert_eq!(config.source.seek_cache, 50);
        assert!(config.sinks.is_empty());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use contracts::{
        AnyScanSource, ChanField, ColumnHeader, Frame, FrameSet, LidarProfile, MultiScanSource,
        ScanError, SensorDescriptor, SinkConfig, SinkType, SliceSpec, SourceConfig,
    };
    use dispatcher::create_dispatcher;
    use ingestion::{CaptureWriter, MemoryContainer, PacketFormat, PacketWriter};
    use observability::CollationAggregator;
    use playback::{HeadlessViewer, Player, PlayerConfig};
    use sync_engine::{open_source, SourceSpec};

    const MS: u64 = 1_000_000;

    fn sensor(serial: u64, port: u16) -> SensorDescriptor {
        let mut desc: SensorDescriptor = serde_json::from_value(serde_json::json!({
            "serial": serial,
            "init_id": 7,
            "format": {
                "pixels_per_column": 2,
                "columns_per_frame": 4,
                "columns_per_packet": 2
            }
        }))
        .unwrap();
        desc.udp_port_lidar = Some(port);
        desc
    }

    fn frame(frame_id: u32, ts: u64) -> Frame {
        let mut f = Frame::new(frame_id, 2, 4);
        for c in 0..4 {
            f.headers[c] = ColumnHeader::valid(ts + c as u64, c as u16);
        }
        for (i, r) in f.range.iter_mut().enumerate() {
            *r = frame_id * 1000 + i as u32;
        }
        f
    }

    /// Two sensors: A at 0/100/200 ms, B at 5/205 ms
    fn write_drive(dir: &Path) -> (PathBuf, Vec<SensorDescriptor>) {
        let sensors = vec![sensor(11, 7502), sensor(12, 7504)];
        for (i, desc) in sensors.iter().enumerate() {
            let json = serde_json::to_string(desc).unwrap();
            std::fs::write(dir.join(format!("drive_{i}.json")), json).unwrap();
        }

        let path = dir.join("drive.cap");
        let mut w = CaptureWriter::create(&path).unwrap();
        let schedule = [(0, 0, 0), (1, 0, 5), (0, 1, 100), (0, 2, 200), (1, 1, 205)];
        for (s, id, ms) in schedule {
            let writer = PacketWriter::new(PacketFormat::from_descriptor(&sensors[s]));
            for p in writer.encode(&frame(id, ms * MS)) {
                w.write_record(ms * MS, sensors[s].udp_port_lidar.unwrap(), &p).unwrap();
            }
        }
        w.flush().unwrap();
        (path, sensors)
    }

    fn config() -> SourceConfig {
        SourceConfig {
            dt_ns: 50 * MS,
            index: true,
            ..Default::default()
        }
    }

    fn multi(source: AnyScanSource) -> std::sync::Arc<dyn MultiScanSource> {
        source.as_multi().cloned().expect("multi-sensor source")
    }

    fn collect(source: &dyn MultiScanSource) -> Vec<FrameSet> {
        source.iter().unwrap().map(|s| s.unwrap()).collect()
    }

    /// Capture file + metadata next to it -> indexed source -> random access
    #[test]
    fn test_e2e_capture_indexed_access() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_drive(dir.path());
        let source = multi(
            open_source(
                SourceSpec::Capture {
                    path,
                    metadata: Vec::new(),
                },
                &config(),
                None,
            )
            .unwrap(),
        );

        assert!(source.is_indexed());
        assert_eq!(source.len().unwrap(), 3);
        assert_eq!(source.scans_num(), vec![Some(3), Some(2)]);

        let forward = collect(source.as_ref());
        let ids: Vec<_> = forward.iter().map(FrameSet::frame_ids).collect();
        assert_eq!(
            ids,
            vec![
                vec![Some(0), Some(0)],
                vec![Some(1), None],
                vec![Some(2), Some(1)],
            ]
        );

        let mut aggregator = CollationAggregator::new();
        forward.iter().for_each(|set| aggregator.update(set));
        let summary = aggregator.summary();
        assert_eq!(summary.total_sets, 3);
        assert_eq!(summary.partial_sets, 1);
        assert_eq!(summary.absent_counts.get(&1), Some(&1));
        assert!(summary.span_ms.max < 50.0);

        for (i, set) in forward.iter().enumerate() {
            assert_eq!(&source.get(i as isize).unwrap(), set);
        }
        assert_eq!(source.get(-1).unwrap(), forward[2]);
        assert!(matches!(source.get(3), Err(ScanError::OutOfRange { index: 3, len: 3 })));
        assert!(source.get_slice(SliceSpec::range(2, 2)).unwrap().is_empty());

        source.close();
    }

    /// Without an index, random access is refused but iteration works
    #[test]
    fn test_e2e_unindexed_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (path, sensors) = write_drive(dir.path());
        let config = SourceConfig {
            index: false,
            ..config()
        };
        let source = multi(open_source(SourceSpec::CaptureWith { path, sensors }, &config, None).unwrap());

        assert!(!source.is_indexed());
        assert!(matches!(source.len(), Err(ScanError::NotIndexed)));
        assert!(matches!(source.get(0), Err(ScanError::NotIndexed)));
        assert_eq!(collect(source.as_ref()).len(), 3);
    }

    /// Frame sets recorded through the dispatcher replay identically
    #[test]
    fn test_e2e_recorder_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (path, sensors) = write_drive(dir.path());
        let source = multi(
            open_source(
                SourceSpec::CaptureWith {
                    path,
                    sensors: sensors.clone(),
                },
                &config(),
                None,
            )
            .unwrap(),
        );
        let original = collect(source.as_ref());

        let out = dir.path().join("recorded.cap");
        let sinks = vec![SinkConfig {
            name: "recorder".to_string(),
            sink_type: SinkType::Recorder,
            queue_capacity: 16,
            params: HashMap::from([("path".to_string(), out.display().to_string())]),
        }];
        let dispatcher = create_dispatcher(sinks, sensors.clone()).unwrap();
        for set in &original {
            assert_eq!(dispatcher.dispatch(set.clone()), 1);
        }
        let metrics = dispatcher.metrics();
        dispatcher.shutdown();
        assert_eq!(metrics[0].0, "recorder");

        let replayed = multi(open_source(SourceSpec::CaptureWith { path: out, sensors }, &config(), None).unwrap());
        assert_eq!(collect(replayed.as_ref()), original);
    }

    /// LowDataRate keeps headers and lossless channels through re-encoding
    #[test]
    fn test_e2e_low_data_rate_round_trip() {
        let mut desc = sensor(13, 7506);
        desc.format.lidar_profile = LidarProfile::LowDataRate;
        let format = PacketFormat::from_descriptor(&desc);

        let mut original = frame(4, 50 * MS);
        for i in 0..original.range.len() {
            original.range[i] = 8 * (i as u32 + 1);
            original.reflectivity[i] = 10 + i as u16;
            original.near_ir[i] = 200 + i as u16;
            original.signal[i] = 0;
        }

        let mut decoded = Frame::new(4, 2, 4);
        for p in PacketWriter::new(format.clone()).encode(&original) {
            format.decode_into(&p, &mut decoded);
        }

        assert_eq!(decoded.headers, original.headers);
        assert!(decoded.is_complete());
        for field in ChanField::ALL {
            if !desc.format.lidar_profile.is_lossless(field) {
                continue;
            }
            for row in 0..2 {
                for col in 0..4 {
                    assert_eq!(decoded.pixel(field, row, col), original.pixel(field, row, col));
                }
            }
        }
        assert_eq!(decoded.range, original.range);
    }

    fn container() -> MemoryContainer {
        let mut b = MemoryContainer::builder();
        let a = b.add_sensor(sensor(21, 0));
        let c = b.add_sensor(sensor(22, 0));
        for (id, ms) in [(0, 0), (1, 100), (2, 200)] {
            b.push_frame(a, &frame(id, ms * MS)).unwrap();
        }
        b.push_frame(c, &frame(0, 5 * MS)).unwrap();
        b.push_frame(c, &frame(1, 205 * MS)).unwrap();
        b.build(false)
    }

    /// Single-sensor view over an indexed container
    #[test]
    fn test_e2e_single_sensor_view() {
        let source = open_source(SourceSpec::Container(container()), &config(), Some(1)).unwrap();
        let AnyScanSource::Single(view) = source else {
            panic!("expected a single-sensor view");
        };

        assert_eq!(view.metadata().serial, 22);
        assert_eq!(view.len().unwrap(), 3);
        assert!(view.get(1).unwrap().is_none());
        assert_eq!(view.get(-1).unwrap().map(|f| f.frame_id), Some(1));

        let ids: Vec<u32> = view.iter().unwrap().map(|f| f.unwrap().frame_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    /// Container -> player -> dispatcher with a log sink
    #[test]
    fn test_e2e_container_playback() {
        let source = multi(open_source(SourceSpec::Container(container()), &config(), None).unwrap());
        let sinks = vec![SinkConfig {
            name: "log".to_string(),
            sink_type: SinkType::Log,
            queue_capacity: 8,
            params: HashMap::new(),
        }];
        let dispatcher = create_dispatcher(sinks, source.metadata().to_vec()).unwrap();
        let viewer = HeadlessViewer::new();
        let player = Player::new(&PlayerConfig {
            rate: 0.0,
            ..Default::default()
        })
        .with_dispatcher(dispatcher);

        let summary = player.run(source.as_ref(), &viewer).unwrap();
        assert_eq!(summary.shown, 3);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(viewer.last_index(), Some(2));
    }
}
