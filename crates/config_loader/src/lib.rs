//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON pipeline configuration files
//! - Validate configuration legality
//! - Load per-sensor JSON metadata and resolve it for a capture file
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("pipeline.toml")).unwrap();
//! println!("dt: {}ns", config.source.dt_ns);
//! ```

mod metadata;
mod parser;
mod validator;

pub use contracts::PipelineConfig;
pub use metadata::MetadataLoader;
pub use parser::ConfigFormat;
pub use validator::validate_descriptor;

use contracts::ScanError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<PipelineConfig, ScanError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<PipelineConfig, ScanError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize PipelineConfig to TOML string
    pub fn to_toml(config: &PipelineConfig) -> Result<String, ScanError> {
        toml::to_string_pretty(config)
            .map_err(|e| ScanError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize PipelineConfig to JSON string
    pub fn to_json(config: &PipelineConfig) -> Result<String, ScanError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ScanError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ScanError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ScanError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| ScanError::config_parse(format!("unsupported config format: .{ext}")))
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ScanError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(content: &str, format: ConfigFormat) -> Result<PipelineConfig, ScanError> {
        let config: PipelineConfig = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}
