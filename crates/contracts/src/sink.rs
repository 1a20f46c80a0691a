//! FrameSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for sinks. Sinks run on their own worker
//! thread, so calls may block.

use crate::{FrameSet, Result};

/// Frame set output
///
/// All sink implementations must implement this trait.
pub trait FrameSink: Send {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one frame set
    ///
    /// # Errors
    /// Returns write error (should include context)
    fn write(&mut self, set: &FrameSet) -> Result<()>;

    /// Flush buffer (if any)
    fn flush(&mut self) -> Result<()>;

    /// Close sink
    fn close(&mut self) -> Result<()>;
}
