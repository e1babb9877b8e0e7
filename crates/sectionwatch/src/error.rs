//! Error types for sectionwatch.
//!
//! Every condition listed here is recoverable: the tracker logs it and keeps
//! its current state, so the worst outcome for a reader is a less precise
//! highlight rather than a broken page.

use thiserror::Error;

use crate::anchor::AnchorId;

/// The main error type for sectionwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Anchor Errors ===
    /// A navigation target is not part of the current registry.
    #[error("anchor '{id}' is not registered")]
    MissingAnchor {
        /// The requested anchor.
        id: AnchorId,
    },

    // === Observer Errors ===
    /// The visibility source could not be initialized.
    #[error("visibility source '{name}' unavailable: {message}")]
    ObserverUnavailable {
        /// Name of the visibility source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// The visibility source was started twice.
    #[error("visibility source '{name}' is already running")]
    ObserverAlreadyRunning {
        /// Name of the visibility source.
        name: &'static str,
    },

    /// Measuring the document layout failed.
    #[error("layout measurement failed: {0}")]
    Layout(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Route Errors ===
    /// A location fragment did not name an anchor.
    #[error("invalid location fragment '{fragment}'")]
    InvalidFragment {
        /// The raw fragment text.
        fragment: String,
    },

    // === Driver Errors ===
    /// The tracker driver is no longer accepting commands.
    #[error("tracker driver has shut down")]
    DriverClosed,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for sectionwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a missing anchor error.
    #[must_use]
    pub fn missing_anchor(id: impl Into<AnchorId>) -> Self {
        Self::MissingAnchor { id: id.into() }
    }

    /// Create an observer unavailable error.
    #[must_use]
    pub fn observer_unavailable(name: &'static str, message: impl Into<String>) -> Self {
        Self::ObserverUnavailable {
            name,
            message: message.into(),
        }
    }

    /// Check if this error reports an unknown navigation target.
    #[must_use]
    pub fn is_missing_anchor(&self) -> bool {
        matches!(self, Self::MissingAnchor { .. })
    }

    /// Check if this error comes from the visibility source.
    #[must_use]
    pub fn is_observer_error(&self) -> bool {
        matches!(
            self,
            Self::ObserverUnavailable { .. } | Self::ObserverAlreadyRunning { .. } | Self::Layout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_anchor_display() {
        let err = Error::missing_anchor("ethics");
        assert_eq!(err.to_string(), "anchor 'ethics' is not registered");
        assert!(err.is_missing_anchor());
        assert!(!err.is_observer_error());
    }

    #[test]
    fn test_observer_unavailable_display() {
        let err = Error::observer_unavailable("polling", "no probe");
        let msg = err.to_string();
        assert!(msg.contains("polling"));
        assert!(msg.contains("no probe"));
        assert!(err.is_observer_error());
    }

    #[test]
    fn test_observer_already_running_display() {
        let err = Error::ObserverAlreadyRunning { name: "push" };
        assert!(err.to_string().contains("already running"));
        assert!(err.is_observer_error());
    }

    #[test]
    fn test_layout_error_is_observer_error() {
        assert!(Error::Layout("detached".to_string()).is_observer_error());
    }

    #[test]
    fn test_invalid_fragment_display() {
        let err = Error::InvalidFragment {
            fragment: "#".to_string(),
        };
        assert!(err.to_string().contains("'#'"));
    }

    #[test]
    fn test_driver_closed_display() {
        assert_eq!(Error::DriverClosed.to_string(), "tracker driver has shut down");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "settle_ms too large".to_string(),
        };
        assert!(err.to_string().contains("settle_ms too large"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }
}
