//! 配置校验模块
//!
//! 校验规则：
//! - 派生规则 (dt_ns > 0, rate >= 0, seek_cache / lag_frames > 0, 外参长度 16)
//! - sink 名称唯一，recorder 必须提供 path 参数
//! - 外参覆盖的传感器序号唯一
//! - 传感器几何参数自洽

use std::collections::HashSet;

use contracts::{PipelineConfig, ScanError, SensorDescriptor, SinkType};
use validator::Validate;

/// 校验 PipelineConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &PipelineConfig) -> Result<(), ScanError> {
    validate_rules(config)?;
    validate_extrinsics(config)?;
    validate_sinks(config)?;
    Ok(())
}

/// 派生规则
fn validate_rules(config: &PipelineConfig) -> Result<(), ScanError> {
    config
        .validate()
        .map_err(|e| ScanError::config_validation("config", e.to_string()))
}

/// 校验外参覆盖
fn validate_extrinsics(config: &PipelineConfig) -> Result<(), ScanError> {
    let mut seen = HashSet::new();
    for o in &config.source.extrinsics {
        if !seen.insert(o.sensor) {
            return Err(ScanError::config_validation(
                format!("source.extrinsics[sensor={}]", o.sensor),
                "duplicate sensor",
            ));
        }
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(config: &PipelineConfig) -> Result<(), ScanError> {
    let mut seen = HashSet::new();
    for sink in &config.sinks {
        if !seen.insert(&sink.name) {
            return Err(ScanError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.sink_type == SinkType::Recorder && !sink.params.contains_key("path") {
            return Err(ScanError::config_validation(
                format!("sinks[{}].params.path", sink.name),
                "recorder sink requires 'path'",
            ));
        }
    }
    Ok(())
}

/// 校验单个传感器描述
pub fn validate_descriptor(sensor: usize, desc: &SensorDescriptor) -> Result<(), ScanError> {
    let field = |name: &str| format!("sensors[{sensor}].{name}");
    let format = &desc.format;

    if format.pixels_per_column == 0 {
        return Err(ScanError::config_validation(
            field("format.pixels_per_column"),
            "must be > 0",
        ));
    }
    if format.columns_per_frame == 0 {
        return Err(ScanError::config_validation(
            field("format.columns_per_frame"),
            "must be > 0",
        ));
    }
    if format.columns_per_packet == 0 || format.columns_per_packet > format.columns_per_frame {
        return Err(ScanError::config_validation(
            field("format.columns_per_packet"),
            format!(
                "must be in 1..={}, got {}",
                format.columns_per_frame, format.columns_per_packet
            ),
        ));
    }
    if !desc.frequency_hz.is_finite() || desc.frequency_hz <= 0.0 {
        return Err(ScanError::config_validation(
            field("frequency_hz"),
            format!("must be > 0, got {}", desc.frequency_hz),
        ));
    }

    let rows = format.pixels_per_column;
    for (name, len) in [
        ("format.pixel_shift_by_row", format.pixel_shift_by_row.len()),
        ("beam_altitude_angles", desc.beam_altitude_angles.len()),
        ("beam_azimuth_angles", desc.beam_azimuth_angles.len()),
    ] {
        if len != 0 && len != rows {
            return Err(ScanError::config_validation(
                field(name),
                format!("expected {rows} entries, got {len}"),
            ));
        }
    }

    if let (Some(lidar), Some(imu)) = (desc.udp_port_lidar, desc.udp_port_imu) {
        if lidar == imu {
            return Err(ScanError::config_validation(
                field("udp_port_imu"),
                "lidar and imu ports must differ",
            ));
        }
    }
    Ok(())
}
