//! Sink implementations
//!
//! Contains LogSink and RecorderSink.

mod log;
mod recorder;

pub use self::log::LogSink;
pub use self::recorder::RecorderSink;
