//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::ScanError;
use serde::de::DeserializeOwned;

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T, ScanError> {
    toml::from_str(content).map_err(|e| ScanError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式
pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, ScanError> {
    serde_json::from_str(content).map_err(|e| ScanError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析
pub fn parse<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, ScanError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{PipelineConfig, SinkType};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[source]
dt_ns = 50000000
cycle = true

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;
        let result: Result<PipelineConfig, _> = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.source.dt_ns, 50_000_000);
        assert!(config.source.cycle);
        assert_eq!(config.sinks[0].sink_type, SinkType::Log);
        assert_eq!(config.sinks[0].queue_capacity, 100);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "source": { "complete": true, "seek_cache": 8 },
            "sinks": [{ "name": "rec", "sink_type": "recorder", "params": { "path": "out.cap" } }]
        }"#;
        let result: Result<PipelineConfig, _> = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert!(config.source.complete);
        assert_eq!(config.source.seek_cache, 8);
        assert_eq!(config.sinks[0].params["path"], "out.cap");
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result: Result<PipelineConfig, _> = parse_toml(content);
        assert!(matches!(result, Err(ScanError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("JSON"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
