//! LogSink - logs frame set summaries via tracing

use contracts::{FrameSet, FrameSink, Result};
use observability::CollationAggregator;
use tracing::{info, instrument};

/// Sink that logs one line per frame set and a collation summary on close
pub struct LogSink {
    name: String,
    aggregator: CollationAggregator,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aggregator: CollationAggregator::new(),
        }
    }

    /// Sets seen so far
    pub fn sets_seen(&self) -> u64 {
        self.aggregator.total_sets
    }
}

impl FrameSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "log_sink_write", skip(self, set), fields(sink = %self.name))]
    fn write(&mut self, set: &FrameSet) -> Result<()> {
        self.aggregator.update(set);
        info!(
            sink = %self.name,
            ts = ?set.timestamp(),
            filled = set.filled(),
            sensors = set.len(),
            frame_ids = ?set.frame_ids(),
            "FrameSet received"
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    fn close(&mut self) -> Result<()> {
        info!(sink = %self.name, "LogSink closed\n{}", self.aggregator.summary());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColumnHeader, Frame};

    #[test]
    fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let mut frame = Frame::new(1, 1, 2);
        frame.headers[0] = ColumnHeader::valid(10, 0);
        let set = FrameSet::from_slots(vec![Some(frame), None]);

        assert!(sink.write(&set).is_ok());
        assert!(sink.write(&FrameSet::empty(2)).is_ok());
        assert_eq!(sink.sets_seen(), 2);
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
