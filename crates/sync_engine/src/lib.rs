//! # Sync Engine
//!
//! 多雷达扫描组装与对齐引擎。
//!
//! 负责：
//! - 按帧 ID 把数据包组装成帧 (`ScanBatcher`)
//! - 按时间窗口把多传感器的帧对齐成 `FrameSet` (`Collator`)
//! - 有界回看缓存，支持回放单步/后退 (`Seekable`)
//! - 带索引的随机访问：`len` / `get` / `get_slice`
//!
//! ## 使用示例
//!
//! ```no_run
//! use contracts::{MultiScanSource, SourceConfig};
//! use std::path::PathBuf;
//! use sync_engine::{open_source, SourceSpec};
//!
//! # fn run() -> contracts::Result<()> {
//! let config = SourceConfig { index: true, ..Default::default() };
//! let spec = SourceSpec::Capture { path: PathBuf::from("drive.cap"), metadata: Vec::new() };
//! let source = open_source(spec, &config, None)?;
//! if let Some(multi) = source.as_multi() {
//!     let last = multi.get(-1)?;
//!     println!("{} of {} slots filled", last.filled(), last.len());
//! }
//! # Ok(())
//! # }
//! ```

mod adapter;
mod batcher;
mod collator;
mod container_source;
mod feed;
mod open;
mod packet_source;
mod profile;
mod seekable;
mod slicer;
mod tee;

// Re-exports
pub use adapter::SingleSensorView;
pub use batcher::{Batched, ScanBatcher};
pub use collator::{Collator, Feed, FrameFeed, IterFeed};
pub use container_source::ContainerScanSource;
pub use feed::{ContainerFeed, PacketFeed};
pub use open::{open_source, SourceSpec};
pub use packet_source::PacketScanSource;
pub use profile::SensorProfile;
pub use seekable::{SeekOutcome, Seekable};
pub use slicer::{resolve_index, slice_indices};
pub use tee::{tee, TeeBranch};
