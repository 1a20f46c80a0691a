//! Dispatcher error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    #[error("sink '{sink}' requires parameter '{param}'")]
    MissingParam { sink: String, param: String },

    #[error("failed to spawn worker for sink '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Scan(#[from] contracts::ScanError),
}

impl DispatcherError {
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn missing_param(sink: impl Into<String>, param: impl Into<String>) -> Self {
        Self::MissingParam {
            sink: sink.into(),
            param: param.into(),
        }
    }
}
