//! 数据源与输出配置
//!
//! 可跨 crate 共享的配置契约：扫描源选项、外参覆盖、Sink 输出。

use std::collections::HashMap;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 默认对齐窗口 (ns)
pub const DEFAULT_DT_NS: u64 = 100_000_000;

/// 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// 扫描源选项
    #[serde(default)]
    #[validate(nested)]
    pub source: SourceConfig,

    /// 输出配置
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

/// 扫描源选项
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    /// 对齐窗口 (ns)
    #[validate(range(min = 1))]
    pub dt_ns: u64,

    /// 只输出完整帧
    pub complete: bool,

    /// 打开时构建索引
    pub index: bool,

    /// 到达末尾后从头循环
    pub cycle: bool,

    /// 传感器 ID 校验失败时仍然放行
    pub soft_id_check: bool,

    /// 回放速率倍数，0 表示尽快
    #[validate(range(min = 0.0))]
    pub rate: f64,

    /// 实时源读取超时 (ms)
    pub timeout_ms: Option<u64>,

    /// 每个传感器最多领先的帧数
    #[validate(range(min = 1))]
    pub lag_frames: usize,

    /// 回放缓存容量
    #[validate(range(min = 1))]
    pub seek_cache: usize,

    /// 外参覆盖
    #[validate(nested)]
    pub extrinsics: Vec<ExtrinsicOverride>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dt_ns: DEFAULT_DT_NS,
            complete: false,
            index: false,
            cycle: false,
            soft_id_check: false,
            rate: 0.0,
            timeout_ms: Some(1000),
            lag_frames: 16,
            seek_cache: 50,
            extrinsics: Vec::new(),
        }
    }
}

/// 单个传感器的外参覆盖
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExtrinsicOverride {
    /// 传感器序号
    pub sensor: usize,

    /// 行优先 4x4 变换矩阵
    #[validate(length(equal = 16))]
    pub matrix: Vec<f64>,
}

impl ExtrinsicOverride {
    /// 转换为矩阵；长度不为 16 时返回 None
    pub fn to_matrix(&self) -> Option<Matrix4<f64>> {
        (self.matrix.len() == 16).then(|| Matrix4::from_row_slice(&self.matrix))
    }
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink 名称
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 重新编码为抓包文件
    Recorder,
}
