//! SinkHandle - one sink behind an isolated queue and worker thread

use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, instrument, warn};

use contracts::{FrameSet, FrameSink};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: Sender<Arc<FrameSet>>,
    metrics: Arc<SinkMetrics>,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    /// Start a worker thread draining a queue of `queue_capacity` sets into `sink`
    pub fn spawn<S: FrameSink + 'static>(sink: S, queue_capacity: usize) -> Result<Self, DispatcherError> {
        let name = sink.name().to_string();
        let (tx, rx) = async_channel::bounded(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || sink_worker(sink, rx, worker_metrics, worker_name))
            .map_err(|source| DispatcherError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            tx,
            metrics,
            worker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a set without blocking
    ///
    /// Returns false when the set was dropped (queue full or worker gone).
    pub fn try_send(&self, set: Arc<FrameSet>) -> bool {
        match self.tx.try_send(set) {
            Ok(()) => {
                self.metrics.set_queue_len(self.tx.len());
                true
            }
            Err(TrySendError::Full(set)) => {
                self.metrics.record_drop();
                observability::record_sink_drop(&self.name);
                warn!(sink = %self.name, ts = ?set.timestamp(), "queue full, frame set dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                error!(sink = %self.name, "sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Drain the queue, flush and close the sink, join the worker
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub fn shutdown(self) {
        self.tx.close();
        if self.worker.join().is_err() {
            error!(sink = %self.name, "sink worker panicked");
        }
        debug!(sink = %self.name, "sink handle shut down");
    }
}

fn sink_worker<S: FrameSink>(
    mut sink: S,
    rx: Receiver<Arc<FrameSet>>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!(sink = %name, "sink worker started");

    while let Ok(set) = rx.recv_blocking() {
        metrics.set_queue_len(rx.len());
        let result = sink.write(&set);
        metrics.record_write(result.is_ok());
        observability::record_sink_dispatch(&name, result.is_ok());
        if let Err(e) = result {
            // a failed write does not stop the worker
            error!(sink = %name, ts = ?set.timestamp(), error = %e, "write failed");
        }
    }

    if let Err(e) = sink.flush() {
        error!(sink = %name, error = %e, "flush failed on shutdown");
    }
    if let Err(e) = sink.close() {
        error!(sink = %name, error = %e, "close failed on shutdown");
    }
    debug!(sink = %name, "sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Result, ScanError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct MockSink {
        name: String,
        writes: Arc<AtomicU64>,
        closed: Arc<AtomicU64>,
        fail: bool,
        delay: Duration,
    }

    impl MockSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                writes: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicU64::new(0)),
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    impl FrameSink for MockSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&mut self, _set: &FrameSet) -> Result<()> {
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(ScanError::sink_write(&self.name, "mock failure"));
            }
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn set() -> Arc<FrameSet> {
        Arc::new(FrameSet::empty(2))
    }

    #[test]
    fn test_sink_handle_basic() {
        let sink = MockSink::new("test");
        let writes = Arc::clone(&sink.writes);
        let closed = Arc::clone(&sink.closed);
        let handle = SinkHandle::spawn(sink, 10).unwrap();
        for _ in 0..5 {
            assert!(handle.try_send(set()));
        }
        handle.shutdown();
        assert_eq!(writes.load(Ordering::Relaxed), 5);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sink_handle_queue_full() {
        let mut sink = MockSink::new("slow");
        sink.delay = Duration::from_millis(50);
        let handle = SinkHandle::spawn(sink, 2).unwrap();
        let sent = (0..10).filter(|_| handle.try_send(set())).count();
        assert!(sent < 10);
        assert_eq!(handle.metrics().dropped_count(), (10 - sent) as u64);
        handle.shutdown();
    }

    #[test]
    fn test_sink_handle_failure_isolation() {
        let mut sink = MockSink::new("failing");
        sink.fail = true;
        let handle = SinkHandle::spawn(sink, 10).unwrap();
        for _ in 0..3 {
            handle.try_send(set());
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown();
        assert_eq!(metrics.failure_count(), 3);
        assert_eq!(metrics.write_count(), 0);
    }
}
