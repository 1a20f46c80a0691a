//! 帧对齐指标收集模块
//!
//! 基于 FrameSet 收集和统计多雷达对齐的运行指标。

use std::collections::BTreeMap;
use std::fmt;

use contracts::FrameSet;
use metrics::{counter, gauge, histogram};

/// 每次产生 FrameSet 时调用此函数来记录指标。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_frame_set;
///
/// for set in source.iter()? {
///     let set = set?;
///     record_frame_set(&set);
/// }
/// ```
pub fn record_frame_set(set: &FrameSet) {
    counter!("lidar_frame_sets_total").increment(1);

    let filled = set.filled();
    let absent = set.len() - filled;
    gauge!("lidar_frame_set_filled").set(filled as f64);
    if absent > 0 {
        counter!("lidar_frame_sets_partial_total").increment(1);
        for (sensor, slot) in set.slots().iter().enumerate() {
            if slot.is_none() {
                counter!("lidar_slot_absent_total", "sensor" => sensor.to_string()).increment(1);
            }
        }
    }

    if let Some(span) = span_ns(set) {
        histogram!("lidar_frame_set_span_ms").record(span as f64 / 1e6);
    }
}

/// 单个传感器的帧被关闭
pub fn record_frame_emitted(sensor: usize, complete: bool) {
    counter!(
        "lidar_frames_emitted_total",
        "sensor" => sensor.to_string(),
        "complete" => complete.to_string()
    )
    .increment(1);
}

/// 迟到的数据包（所属帧已关闭）
pub fn record_straggler(sensor: usize) {
    counter!("lidar_straggler_packets_total", "sensor" => sensor.to_string()).increment(1);
}

/// 迟到的帧（时间戳早于已输出的帧集）
pub fn record_late_frame(sensor: usize) {
    counter!("lidar_late_frames_total", "sensor" => sensor.to_string()).increment(1);
}

/// 记录分发结果
pub fn record_sink_dispatch(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "lidar_sink_writes_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Sink 队列已满，FrameSet 被丢弃
pub fn record_sink_drop(sink_name: &str) {
    counter!("lidar_sink_dropped_total", "sink" => sink_name.to_string()).increment(1);
}

/// 索引构建进度 (0.0 ~ 1.0)
pub fn record_index_progress(fraction: f64) {
    gauge!("lidar_index_progress").set(fraction);
}

/// 记录回放跳转结果 ("ready" / "evicted" / "exhausted")
pub fn record_seek(outcome: &'static str) {
    counter!("lidar_playback_seeks_total", "outcome" => outcome).increment(1);
}

/// Spread of member timestamps in a set
fn span_ns(set: &FrameSet) -> Option<u64> {
    let ts = set.frames().filter_map(|(_, f)| f.timestamp());
    let (lo, hi) = ts.fold((u64::MAX, 0u64), |(lo, hi), t| (lo.min(t), hi.max(t)));
    (lo <= hi).then(|| hi - lo)
}

/// 对齐指标聚合器
///
/// 用于在内存中累积统计，适合测试和调试场景。
#[derive(Debug, Default)]
pub struct CollationAggregator {
    /// 总 FrameSet 数
    pub total_sets: u64,
    /// 至少缺失一个传感器的 FrameSet 数
    pub partial_sets: u64,
    /// 填充比例统计
    pub fill_ratio: RunningStats,
    /// 时间跨度统计 (ms)
    pub span_ms: RunningStats,
    /// 各传感器缺失次数
    pub absent_counts: BTreeMap<usize, u64>,
}

impl CollationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, set: &FrameSet) {
        self.total_sets += 1;
        if set.is_empty() {
            return;
        }

        let filled = set.filled();
        self.fill_ratio.push(filled as f64 / set.len() as f64);
        if filled < set.len() {
            self.partial_sets += 1;
        }
        for (sensor, slot) in set.slots().iter().enumerate() {
            if slot.is_none() {
                *self.absent_counts.entry(sensor).or_insert(0) += 1;
            }
        }
        if let Some(span) = span_ns(set) {
            self.span_ms.push(span as f64 / 1e6);
        }
    }

    pub fn summary(&self) -> CollationSummary {
        let partial_rate = if self.total_sets > 0 {
            self.partial_sets as f64 / self.total_sets as f64 * 100.0
        } else {
            0.0
        };
        CollationSummary {
            total_sets: self.total_sets,
            partial_sets: self.partial_sets,
            partial_rate,
            fill_ratio: StatsSummary::from(&self.fill_ratio),
            span_ms: StatsSummary::from(&self.span_ms),
            absent_counts: self.absent_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 对齐指标摘要
#[derive(Debug, Clone)]
pub struct CollationSummary {
    pub total_sets: u64,
    pub partial_sets: u64,
    pub partial_rate: f64,
    pub fill_ratio: StatsSummary,
    pub span_ms: StatsSummary,
    pub absent_counts: BTreeMap<usize, u64>,
}

impl fmt::Display for CollationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Collation Summary ===")?;
        writeln!(f, "Frame sets: {}", self.total_sets)?;
        writeln!(
            f,
            "Partial sets: {} ({:.2}%)",
            self.partial_sets, self.partial_rate
        )?;
        writeln!(f, "Fill ratio: {}", self.fill_ratio)?;
        writeln!(f, "Span (ms): {}", self.span_ms)?;
        if !self.absent_counts.is_empty() {
            writeln!(f, "Absent per sensor:")?;
            for (sensor, count) in &self.absent_counts {
                writeln!(f, "  sensor {sensor}: {count}")?;
            }
        }
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count(),
            min: stats.min(),
            max: stats.max(),
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.count {
            0 => write!(f, "N/A"),
            n => write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={n})",
                self.min, self.max, self.mean, self.std_dev
            ),
        }
    }
}

/// 在线统计 (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        match self.count {
            0 | 1 => 0.0,
            n => self.m2 / (n - 1) as f64,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ColumnHeader, Frame};

    fn frame(ts: u64) -> Frame {
        let mut f = Frame::new(0, 1, 1);
        f.headers[0] = ColumnHeader::valid(ts, 0);
        f
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 6.0, 8.0] {
            stats.push(v);
        }
        assert_eq!(stats.count(), 4);
        assert!((stats.mean() - 5.0).abs() < 1e-10);
        assert!((stats.min() - 2.0).abs() < 1e-10);
        assert!((stats.max() - 8.0).abs() < 1e-10);
        assert!((stats.variance() - 20.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut agg = CollationAggregator::new();
        agg.update(&FrameSet::from_slots(vec![Some(frame(0)), Some(frame(4_000_000))]));
        agg.update(&FrameSet::from_slots(vec![Some(frame(100_000_000)), None]));

        assert_eq!(agg.total_sets, 2);
        assert_eq!(agg.partial_sets, 1);
        assert_eq!(agg.absent_counts.get(&1), Some(&1));
        assert_eq!(agg.span_ms.count(), 2);
        assert!((agg.span_ms.max() - 4.0).abs() < 1e-9);
        assert!((agg.fill_ratio.mean() - 0.75).abs() < 1e-9);

        agg.reset();
        assert_eq!(agg.total_sets, 0);
    }

    #[test]
    fn test_summary_display() {
        let mut agg = CollationAggregator::new();
        agg.update(&FrameSet::from_slots(vec![Some(frame(0)), None]));
        let output = agg.summary().to_string();
        assert!(output.contains("Frame sets: 1"));
        assert!(output.contains("100.00%"));
        assert!(output.contains("sensor 1: 1"));
        assert_eq!(StatsSummary::default().to_string(), "N/A");
    }

    #[test]
    fn test_record_without_recorder() {
        // no recorder installed: recording must be a no-op
        record_frame_set(&FrameSet::empty(2));
        record_sink_dispatch("log", true);
        record_seek("ready");
    }
}
