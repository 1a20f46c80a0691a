//! Layered error definitions
//!
//! Categorized by source: config / source / access / index / sink
//!
//! Per-packet validation problems are not errors; they are counted in
//! [`ValidationCounts`](crate::ValidationCounts) and never surface here.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T, E = ScanError> = std::result::Result<T, E>;

/// Unified error type
#[derive(Debug, Error)]
pub enum ScanError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Source Errors =====
    /// Two sensors or streams claim the same UDP port
    #[error("port collision: port {port} used by sensor {first} and sensor {second}")]
    PortCollision { port: u16, first: usize, second: usize },

    /// No lidar port configured or guessed for a sensor
    #[error("no lidar port for sensor {sensor}")]
    MissingPort { sensor: usize },

    /// No data within the configured deadline on a live source
    #[error("no packets received within {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// Corrupt capture or container content
    #[error("corrupt data at offset {offset}: {message}")]
    Corrupt { offset: u64, message: String },

    // ===== Random Access Errors =====
    /// Random access requested on a non-indexed source
    #[error("random access is not supported on a non-indexed source")]
    NotIndexed,

    /// Index outside `[-len, len)`
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: isize, len: usize },

    // ===== Index Errors =====
    /// Index construction failed
    #[error("index build error: {message}")]
    IndexBuild { message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink queue closed
    #[error("sink '{sink_name}' is closed")]
    SinkClosed { sink_name: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create corrupt data error
    pub fn corrupt(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            message: message.into(),
        }
    }

    /// Create index build error
    pub fn index_build(message: impl Into<String>) -> Self {
        Self::IndexBuild {
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a precondition violation of random access
    /// (as opposed to an I/O or data failure)
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NotIndexed | Self::OutOfRange { .. })
    }

    /// Whether a live source merely ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::OutOfRange { index: 7, len: 3 };
        assert_eq!(err.to_string(), "index 7 out of range for length 3");
        assert!(err.is_precondition());

        let err = ScanError::PortCollision {
            port: 7502,
            first: 0,
            second: 1,
        };
        assert!(err.to_string().contains("7502"));
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: ScanError = io.into();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
