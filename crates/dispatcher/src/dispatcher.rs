//! Dispatcher - fan-out of frame sets to sinks

use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::Receiver;
use tracing::{debug, info, instrument};

use contracts::{FrameSet, SensorDescriptor, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{LogSink, RecorderSink};

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    sinks: Vec<SinkConfig>,
    sensors: Vec<SensorDescriptor>,
}

impl DispatcherBuilder {
    pub fn new(sinks: Vec<SinkConfig>) -> Self {
        Self {
            sinks,
            sensors: Vec::new(),
        }
    }

    /// Sensor descriptors, needed by sinks that re-encode packets
    pub fn sensors(mut self, sensors: Vec<SensorDescriptor>) -> Self {
        self.sensors = sensors;
        self
    }

    /// Create every sink and start its worker
    #[instrument(name = "dispatcher_builder_build", skip(self), fields(sink_count = self.sinks.len()))]
    pub fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.sinks.len());
        for config in &self.sinks {
            match create_sink_handle(config, &self.sensors) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // stop the workers started so far
                    for h in handles {
                        h.shutdown();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Dispatcher { handles })
    }
}

#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config, sensors),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(
    config: &SinkConfig,
    sensors: &[SensorDescriptor],
) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => SinkHandle::spawn(LogSink::new(&config.name), config.queue_capacity),
        SinkType::Recorder => {
            let sink = RecorderSink::from_params(&config.name, &config.params, sensors)?;
            SinkHandle::spawn(sink, config.queue_capacity)
        }
    }
}

/// Fans frame sets out to sinks, one isolated queue per sink
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
}

impl Dispatcher {
    /// Dispatcher over already spawned handles (for custom sinks)
    pub fn with_handles(handles: Vec<SinkHandle>) -> Self {
        Self { handles }
    }

    pub fn sink_count(&self) -> usize {
        self.handles.len()
    }

    /// Offer a set to every sink without blocking; returns how many accepted it
    pub fn dispatch(&self, set: impl Into<Arc<FrameSet>>) -> usize {
        let set = set.into();
        self.handles
            .iter()
            .filter(|h| h.try_send(Arc::clone(&set)))
            .count()
    }

    /// Get metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Consume sets until the input closes, then shut every sink down
    #[instrument(name = "dispatcher_run", skip(self, input))]
    pub fn run(self, input: Receiver<FrameSet>) {
        info!(sinks = self.handles.len(), "Dispatcher started");

        let mut count: u64 = 0;
        while let Ok(set) = input.recv_blocking() {
            count += 1;
            self.dispatch(set);
            if count.is_multiple_of(100) {
                debug!(sets = count, "Dispatcher progress");
            }
        }

        info!(sets = count, "Dispatcher input closed, shutting down");
        self.shutdown();
    }

    /// Run on a background thread
    pub fn spawn(self, input: Receiver<FrameSet>) -> Result<JoinHandle<()>, DispatcherError> {
        std::thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || self.run(input))
            .map_err(|source| DispatcherError::Spawn {
                name: "dispatcher".into(),
                source,
            })
    }

    /// Drain and close every sink
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown();
        }
        info!("Dispatcher shutdown complete");
    }
}

/// Convenience function to create a dispatcher from sink configs
pub fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    sensors: Vec<SensorDescriptor>,
) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(sink_configs).sensors(sensors).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FrameSink, Result as ScanResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct CollectSink {
        name: String,
        seen: Arc<Mutex<Vec<Option<u64>>>>,
    }

    impl FrameSink for CollectSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&mut self, set: &FrameSet) -> ScanResult<()> {
            self.seen.lock().unwrap().push(set.timestamp());
            Ok(())
        }

        fn flush(&mut self) -> ScanResult<()> {
            Ok(())
        }

        fn close(&mut self) -> ScanResult<()> {
            Ok(())
        }
    }

    fn collect(name: &str) -> (CollectSink, Arc<Mutex<Vec<Option<u64>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectSink {
            name: name.to_string(),
            seen: Arc::clone(&seen),
        };
        (sink, seen)
    }

    #[test]
    fn test_dispatcher_fanout() {
        let (input_tx, input_rx) = async_channel::bounded(10);
        let (a, seen_a) = collect("a");
        let (b, seen_b) = collect("b");
        let handles = vec![SinkHandle::spawn(a, 10).unwrap(), SinkHandle::spawn(b, 10).unwrap()];

        let dispatcher = Dispatcher::with_handles(handles);
        let worker = dispatcher.spawn(input_rx).unwrap();
        for _ in 0..5 {
            input_tx.send_blocking(FrameSet::empty(2)).unwrap();
        }
        drop(input_tx);
        worker.join().unwrap();

        assert_eq!(seen_a.lock().unwrap().len(), 5);
        assert_eq!(seen_b.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_create_dispatcher_from_config() {
        let configs = vec![SinkConfig {
            name: "test_log".to_string(),
            sink_type: SinkType::Log,
            queue_capacity: 50,
            params: HashMap::new(),
        }];

        let dispatcher = create_dispatcher(configs, Vec::new()).unwrap();
        assert_eq!(dispatcher.sink_count(), 1);
        assert_eq!(dispatcher.dispatch(FrameSet::empty(1)), 1);
        dispatcher.shutdown();
    }

    #[test]
    fn test_recorder_without_path_fails() {
        let configs = vec![
            SinkConfig {
                name: "log".to_string(),
                sink_type: SinkType::Log,
                queue_capacity: 5,
                params: HashMap::new(),
            },
            SinkConfig {
                name: "rec".to_string(),
                sink_type: SinkType::Recorder,
                queue_capacity: 5,
                params: HashMap::new(),
            },
        ];
        let err = create_dispatcher(configs, Vec::new()).err();
        assert!(matches!(err, Some(DispatcherError::MissingParam { .. })));
    }
}
