//! # Contracts
//!
//! Frozen interface contracts, defining the data model and traits shared by
//! every crate of the scan pipeline. Business crates depend on this crate
//! only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Column timestamps are sensor clock nanoseconds (u64)
//! - A frame's representative timestamp is its first valid column timestamp
//! - `frame_id` is the sensor's rotation counter (u32, compared numerically)

mod descriptor;
mod error;
mod frame;
mod frame_set;
mod index;
mod packet;
mod sink;
mod source;
mod source_config;

pub use descriptor::*;
pub use error::*;
pub use frame::*;
pub use frame_set::FrameSet;
pub use index::*;
pub use packet::*;
pub use sink::FrameSink;
pub use source::*;
pub use source_config::*;
