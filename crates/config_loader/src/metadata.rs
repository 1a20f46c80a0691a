//! Sensor metadata loading
//!
//! One JSON `SensorDescriptor` per sensor. Metadata for a capture file is
//! found next to it: every `.json` file whose stem starts with the capture
//! file's stem, in lexicographic order (sensor index = position).

use std::path::{Path, PathBuf};

use contracts::{ScanError, SensorDescriptor, SourceConfig};
use tracing::{debug, info};

use crate::parser;
use crate::validator::validate_descriptor;

/// Sensor metadata loader
pub struct MetadataLoader;

impl MetadataLoader {
    /// Parse and validate one descriptor
    pub fn load_from_str(content: &str) -> Result<SensorDescriptor, ScanError> {
        let desc: SensorDescriptor = parser::parse_json(content)?;
        validate_descriptor(0, &desc)?;
        Ok(desc)
    }

    /// Load one descriptor file
    pub fn load_from_path(path: &Path) -> Result<SensorDescriptor, ScanError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content).map_err(|e| match e {
            ScanError::ConfigParse { message, source } => ScanError::ConfigParse {
                message: format!("{}: {message}", path.display()),
                source,
            },
            other => other,
        })
    }

    /// Load several descriptor files; sensor index follows the given order
    pub fn load_all(paths: &[PathBuf]) -> Result<Vec<SensorDescriptor>, ScanError> {
        let mut out = Vec::with_capacity(paths.len());
        for (sensor, path) in paths.iter().enumerate() {
            let desc = Self::load_from_path(path)?;
            validate_descriptor(sensor, &desc)?;
            debug!(sensor, path = %path.display(), serial = desc.serial, "metadata loaded");
            out.push(desc);
        }
        Ok(out)
    }

    /// Metadata files sharing the stem of a capture file
    ///
    /// # Errors
    /// `ConfigValidation` when no metadata file matches.
    pub fn resolve_for(capture: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let stem = capture
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ScanError::config_parse("capture path has no file stem"))?;
        let dir = match capture.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut found: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().and_then(|e| e.to_str()) == Some("json")
                    && p.file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.starts_with(stem))
            })
            .collect();
        found.sort();

        if found.is_empty() {
            return Err(ScanError::config_validation(
                "metadata",
                format!("no metadata found for {}", capture.display()),
            ));
        }
        info!(capture = %capture.display(), count = found.len(), "resolved metadata");
        Ok(found)
    }

    /// Apply extrinsic overrides from the source configuration
    pub fn apply_overrides(sensors: &mut [SensorDescriptor], config: &SourceConfig) -> Result<(), ScanError> {
        for o in &config.extrinsics {
            let desc = sensors.get_mut(o.sensor).ok_or_else(|| {
                ScanError::config_validation(
                    format!("source.extrinsics[sensor={}]", o.sensor),
                    "no such sensor",
                )
            })?;
            desc.extrinsic = o.to_matrix().ok_or_else(|| {
                ScanError::config_validation(
                    format!("source.extrinsics[sensor={}].matrix", o.sensor),
                    "expected 16 values",
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ExtrinsicOverride;

    const META: &str = r#"{
        "serial": 122201000999,
        "init_id": 77,
        "product_line": "OS-0-32",
        "udp_port_lidar": 7502,
        "udp_port_imu": 7503,
        "format": {
            "pixels_per_column": 32,
            "columns_per_frame": 512,
            "columns_per_packet": 16,
            "lidar_profile": "low_data_rate"
        }
    }"#;

    #[test]
    fn test_load_from_str() {
        let desc = MetadataLoader::load_from_str(META).unwrap();
        assert_eq!(desc.rows(), 32);
        assert_eq!(desc.udp_port_imu, Some(7503));
    }

    #[test]
    fn test_resolve_for_capture() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("drive.cap");
        std::fs::write(&capture, b"").unwrap();
        std::fs::write(dir.path().join("drive_b.json"), META).unwrap();
        std::fs::write(dir.path().join("drive_a.json"), META).unwrap();
        std::fs::write(dir.path().join("other.json"), META).unwrap();

        let paths = MetadataLoader::resolve_for(&capture).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["drive_a.json", "drive_b.json"]);
        assert_eq!(MetadataLoader::load_all(&paths).unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("lonely.cap");
        assert!(MetadataLoader::resolve_for(&capture).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut sensors = vec![MetadataLoader::load_from_str(META).unwrap()];
        let mut config = SourceConfig::default();
        let mut matrix = vec![0.0; 16];
        for i in 0..4 {
            matrix[i * 5] = 1.0;
        }
        matrix[11] = -1.5;
        config.extrinsics.push(ExtrinsicOverride { sensor: 0, matrix });
        MetadataLoader::apply_overrides(&mut sensors, &config).unwrap();
        assert_eq!(sensors[0].extrinsic[(2, 3)], -1.5);

        config.extrinsics[0].sensor = 4;
        assert!(MetadataLoader::apply_overrides(&mut sensors, &config).is_err());
    }
}
