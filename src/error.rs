//! Error types for the webcam session and its host backends.

use thiserror::Error;

/// Errors reported by [`crate::session::WebcamSession`] operations.
///
/// Every variant's display string doubles as the status line shown to the
/// user, so the messages are written for people rather than logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No video capture devices found.")]
    NoDevicesFound,
    #[error("Failed to enumerate video capture devices: {0}")]
    EnumerationFailed(String),
    #[error("Capture already initialized.")]
    AlreadyInitialized,
    #[error("Camera access denied in privacy settings.")]
    PermissionDenied,
    #[error("No video device selected or available.")]
    NoDeviceSelected,
    #[error("Initialize media capture failed: {0}")]
    InitializationFailed(String),
    #[error("No video preview or record stream found.")]
    NoFrameSource,
    #[error("Capture is not initialized.")]
    NotInitialized,
    #[error("Player error: {0}")]
    PlaybackFailed(String),
}

/// Errors from device enumeration backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{tool} not found. Install FFmpeg and make sure it is on PATH")]
    ToolNotFound { tool: String },
    #[error("Failed to run {tool}: {source}")]
    ToolFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Sysfs {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from capture initialization.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device {0} is in use by another capture session")]
    DeviceBusy(String),
    #[error("audio capture is not supported, request video-only streaming")]
    AudioUnsupported,
    #[error("{tool} not found. Install FFmpeg and make sure it is on PATH")]
    ToolNotFound { tool: String },
    #[error("failed to run {tool}: {source}")]
    ToolFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not open device {device}: {message}")]
    OpenFailed { device: String, message: String },
}

/// Errors from the preview player.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("{tool} not found. Install FFmpeg and make sure it is on PATH")]
    ToolNotFound { tool: String },
    #[error("failed to start {tool}: {source}")]
    SpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to signal player process: {0}")]
    Signal(std::io::Error),
    #[error("player has been disposed")]
    Disposed,
}

impl PlayerError {
    /// Map a spawn error, separating a missing binary from other failures.
    pub fn from_spawn(tool: &str, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            PlayerError::ToolNotFound {
                tool: tool.to_string(),
            }
        } else {
            PlayerError::SpawnFailed {
                tool: tool.to_string(),
                source: e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_status_strings() {
        assert_eq!(
            SessionError::NoDevicesFound.to_string(),
            "No video capture devices found."
        );
        assert_eq!(
            SessionError::InitializationFailed("busy".to_string()).to_string(),
            "Initialize media capture failed: busy"
        );
        assert_eq!(
            SessionError::PlaybackFailed("decoder".to_string()).to_string(),
            "Player error: decoder"
        );
    }

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::DeviceBusy("/dev/video0".to_string());
        assert_eq!(
            err.to_string(),
            "device /dev/video0 is in use by another capture session"
        );
    }

    #[test]
    fn test_player_error_from_spawn_not_found() {
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            PlayerError::from_spawn("ffplay", e),
            PlayerError::ToolNotFound { ref tool } if tool == "ffplay"
        ));
    }

    #[test]
    fn test_player_error_from_spawn_other() {
        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            PlayerError::from_spawn("ffplay", e),
            PlayerError::SpawnFailed { .. }
        ));
    }
}
