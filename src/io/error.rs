// src/io/error.rs
//
// Error type shared by the serial source, the line engine and the sinks.

use thiserror::Error;

/// Errors surfaced by device and bus I/O.
///
/// Constructors take the device label first (e.g. `serial(/dev/ttyACM0)`)
/// so log lines identify which endpoint failed.
#[derive(Debug, Error)]
pub enum IoError {
    /// Device could not be opened or the broker could not be reached.
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    /// A read on an open device failed.
    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    /// An operation gave up after its retry budget.
    #[error("{device}: timed out during {operation}")]
    Timeout { device: String, operation: String },

    /// Invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A worker task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, operation: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            operation: operation.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }
}
