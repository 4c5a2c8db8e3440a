//! Error kinds of the fan and button controller core.

use std::io;

use thiserror::Error;

/// Result type alias for the controller core.
pub type Result<T> = std::result::Result<T, FanError>;

/// Failures the controller core can report.
///
/// Whether an error is fatal depends on where it surfaces: the same
/// [`FanError::BusTransport`] that terminates the control loop is only logged
/// during the final stop sequence.
#[derive(Error, Debug)]
pub enum FanError {
    /// A setting is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading from or writing to the hardware bus failed.
    #[error("bus transport error on {device}: {source}")]
    BusTransport {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Claiming a pin or bus at startup failed.
    #[error("failed to acquire {resource}: {source}")]
    ResourceAcquisition {
        resource: String,
        #[source]
        source: io::Error,
    },

    /// An external command (service manager, host action) failed.
    #[error("command `{command}` failed: {reason}")]
    ExternalProcess { command: String, reason: String },

    /// The CPU temperature could not be read or parsed.
    #[error("failed to read temperature from {source_name}: {reason}")]
    TemperatureRead { source_name: String, reason: String },
}

impl FanError {
    pub fn missing_setting(key: &str) -> Self {
        Self::Config(format!("setting '{key}' is missing"))
    }

    pub fn invalid_setting(key: &str, value: &str, expected: &str) -> Self {
        Self::Config(format!(
            "setting '{key}' has value '{value}', expected {expected}"
        ))
    }

    pub fn bus(device: impl Into<String>, source: io::Error) -> Self {
        Self::BusTransport {
            device: device.into(),
            source,
        }
    }

    pub fn acquisition(resource: impl Into<String>, source: io::Error) -> Self {
        Self::ResourceAcquisition {
            resource: resource.into(),
            source,
        }
    }
}
