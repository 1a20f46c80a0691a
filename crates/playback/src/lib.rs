//! # Playback
//!
//! 回放控制模块。
//!
//! 负责：
//! - 暂停 / 单步 / 后退 / 调速 / 自动暂停（`PlayerControl`，Mutex + Condvar）
//! - 处理线程：经由 `Seekable` 拉取 `FrameSet`，按传感器帧周期节流
//! - 渲染循环运行在调用线程上（`FrameViewer::run`）
//! - 新产生的 `FrameSet` 转发给可选的 `Dispatcher`
//!
//! 退出时关闭数据源并 join 处理线程。

mod control;
mod player;
mod viewer;

pub use control::{PlayerControl, PLAYBACK_RATES};
pub use player::{PlaybackSummary, Player, PlayerConfig};
pub use viewer::{FrameViewer, HeadlessViewer};
