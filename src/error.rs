//! Error types
//!
//! Configuration errors are fatal at startup. Device errors are recoverable
//! and never leave the lifecycle manager.

use thiserror::Error;

/// Fatal configuration problems, detected before any device interaction
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid key signature '{0}' (expected e.g. 'cmajor', 'fsharpminor' or 'twelvetone')")]
    InvalidKeySignature(String),

    #[error("invalid interval label '{0}'")]
    InvalidInterval(String),

    #[error("invalid key code '{code}' for layout label '{label}'")]
    InvalidKeyCode { label: String, code: String },

    #[error("device pattern cannot be empty")]
    EmptyPattern,

    #[error("invalid device pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("layout must map at least one key")]
    EmptyLayout,
}

/// Recoverable failures on the device path
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device enumeration failed: {0}")]
    Enumerate(String),

    #[error("failed to open device at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("read failed: {0}")]
    Read(String),
}

impl From<hidapi::HidError> for DeviceError {
    fn from(err: hidapi::HidError) -> Self {
        DeviceError::Read(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unplugged_device_surfaces_as_read_error() {
        let err = DeviceError::from(hidapi::HidError::HidApiError {
            message: "device disconnected".into(),
        });
        assert!(matches!(&err, DeviceError::Read(msg) if msg.contains("device disconnected")));
        assert!(err.to_string().starts_with("read failed:"));
    }
}
