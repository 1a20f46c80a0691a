//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 消费 `FrameSet`
//! - Fan-out 到多个 sinks，每个 sink 独占一个工作线程
//! - 隔离慢 sink：队列满时丢弃并计数，不阻塞主链路

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{FrameSet, FrameSink};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{LogSink, RecorderSink};
