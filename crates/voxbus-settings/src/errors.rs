//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading, validating, or persisting settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read or write a settings file.
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse settings JSON.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// The configured protocol version is outside the supported window.
    #[error("unsupported configuration version {found} (supported {min}..={max})")]
    UnsupportedVersion { found: String, min: f64, max: f64 },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err = SettingsError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn unsupported_version_display() {
        let err = SettingsError::UnsupportedVersion {
            found: "3.0".into(),
            min: 1.0,
            max: 2.0,
        };
        assert_eq!(
            err.to_string(),
            "unsupported configuration version 3.0 (supported 1..=2)"
        );
    }
}
