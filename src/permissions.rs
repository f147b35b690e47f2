//! Camera access checks.
//!
//! Whether the host can answer "may this process use the camera?" differs per
//! platform. The answer is exposed as a [`Capability`] flag so callers decide
//! up front whether to run the check or continue in degraded mode.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::devices::InputFormat;
use crate::platform::PermissionAuthority;

/// Result of a camera access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Allowed,
    Denied,
}

/// Whether the host supports querying camera access at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported,
}

impl Capability {
    /// Capability of the access check for a given input family.
    ///
    /// DirectShow has no way to read the Windows privacy switch, so the
    /// check is skipped there.
    pub fn for_format(format: InputFormat) -> Self {
        match format {
            InputFormat::AvFoundation | InputFormat::V4l2 => Capability::Supported,
            InputFormat::DShow => Capability::Unsupported,
        }
    }
}

/// Human-readable location of the camera privacy setting.
pub fn settings_hint(format: InputFormat) -> &'static str {
    match format {
        InputFormat::AvFoundation => "System Settings > Privacy & Security > Camera",
        InputFormat::V4l2 => "add your user to the 'video' group: sudo usermod -aG video $USER",
        InputFormat::DShow => "Settings > Privacy & security > Camera",
    }
}

/// Deep link that opens the camera privacy setting, where the host has one.
pub fn settings_url(format: InputFormat) -> Option<&'static str> {
    match format {
        InputFormat::AvFoundation => {
            Some("x-apple.systempreferences:com.apple.preference.security?Privacy_Camera")
        }
        InputFormat::DShow => Some("ms-settings:privacy-webcam"),
        InputFormat::V4l2 => None,
    }
}

/// Permission authority for the local host.
#[derive(Debug, Clone)]
pub struct HostPermissions {
    ffmpeg: String,
    format: InputFormat,
    capability: Capability,
    open_settings: bool,
    dev_root: PathBuf,
}

impl HostPermissions {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        let format = InputFormat::host();
        Self {
            ffmpeg: ffmpeg.into(),
            format,
            capability: Capability::for_format(format),
            open_settings: true,
            dev_root: PathBuf::from("/dev"),
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self.capability = Capability::for_format(format);
        self
    }

    /// Override the detected capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Whether escalation may launch the host's settings application.
    pub fn with_open_settings(mut self, open_settings: bool) -> Self {
        self.open_settings = open_settings;
        self
    }

    /// Directory holding the `video*` device nodes checked on Video4Linux2.
    pub fn with_dev_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dev_root = root.into();
        self
    }

    /// Probe the default AVFoundation camera for a single frame.
    async fn probe_avfoundation(&self) -> AccessStatus {
        let output = Command::new(&self.ffmpeg)
            .args([
                "-hide_banner",
                "-f",
                "avfoundation",
                "-framerate",
                "30",
                "-i",
                "0:none",
                "-frames:v",
                "1",
                "-f",
                "null",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(result) => classify_probe_output(&String::from_utf8_lossy(&result.stderr)),
            Err(e) => {
                // Without ffmpeg nothing can be opened anyway; let initialization report it
                log::warn!("Camera access probe could not run {}: {}", self.ffmpeg, e);
                AccessStatus::Allowed
            }
        }
    }
}

#[async_trait]
impl PermissionAuthority for HostPermissions {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn check_camera_access(&self) -> AccessStatus {
        let status = match self.format {
            InputFormat::AvFoundation => self.probe_avfoundation().await,
            InputFormat::V4l2 => {
                let root = self.dev_root.clone();
                tokio::task::spawn_blocking(move || check_device_nodes(&root))
                    .await
                    .unwrap_or(AccessStatus::Allowed)
            }
            InputFormat::DShow => AccessStatus::Allowed,
        };
        log::debug!("Camera access check: {:?}", status);
        status
    }

    async fn request_settings_escalation(&self) -> bool {
        log::warn!("Camera access denied. Grant it in: {}", settings_hint(self.format));

        if !self.open_settings {
            return false;
        }
        let Some(url) = settings_url(self.format) else {
            return false;
        };

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", "", url]);
            c
        } else {
            let mut c = Command::new("open");
            c.arg(url);
            c
        };

        match cmd.stdout(Stdio::null()).stderr(Stdio::null()).status().await {
            Ok(status) => status.success(),
            Err(e) => {
                log::warn!("Failed to open camera settings: {}", e);
                false
            }
        }
    }
}

/// Classify an ffmpeg probe's stderr as a permission failure or not.
///
/// Only explicit authorization errors count as denied; any other failure is
/// left for capture initialization to report.
pub fn classify_probe_output(stderr: &str) -> AccessStatus {
    let lower = stderr.to_lowercase();
    if lower.contains("not authorized")
        || lower.contains("permission denied")
        || lower.contains("denied access")
        || lower.contains("authorization status")
    {
        AccessStatus::Denied
    } else {
        AccessStatus::Allowed
    }
}

/// Check read/write access to the Video4Linux2 nodes under `dev_root`.
///
/// Allowed when any node is accessible or when there are no nodes at all
/// (enumeration reports the empty case).
pub fn check_device_nodes(dev_root: &std::path::Path) -> AccessStatus {
    let Ok(entries) = std::fs::read_dir(dev_root) else {
        return AccessStatus::Allowed;
    };

    let nodes: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("video"))
                .is_some_and(|n| n.parse::<u32>().is_ok())
        })
        .map(|e| e.path())
        .collect();

    if nodes.is_empty() || nodes.iter().any(|p| node_accessible(p)) {
        AccessStatus::Allowed
    } else {
        AccessStatus::Denied
    }
}

#[cfg(unix)]
fn node_accessible(path: &std::path::Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
}

#[cfg(not(unix))]
fn node_accessible(path: &std::path::Path) -> bool {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_for_format() {
        assert_eq!(Capability::for_format(InputFormat::AvFoundation), Capability::Supported);
        assert_eq!(Capability::for_format(InputFormat::V4l2), Capability::Supported);
        assert_eq!(Capability::for_format(InputFormat::DShow), Capability::Unsupported);
    }

    #[test]
    fn test_settings_hint_and_url() {
        assert!(settings_hint(InputFormat::AvFoundation).contains("Camera"));
        assert!(settings_hint(InputFormat::V4l2).contains("video"));
        assert!(settings_url(InputFormat::AvFoundation)
            .unwrap()
            .contains("Privacy_Camera"));
        assert_eq!(settings_url(InputFormat::DShow), Some("ms-settings:privacy-webcam"));
        assert!(settings_url(InputFormat::V4l2).is_none());
    }

    #[test]
    fn test_classify_probe_output() {
        assert_eq!(
            classify_probe_output(
                "[avfoundation @ 0x1] Failed to create AV capture input device: \
                 Application is not authorized to use camera"
            ),
            AccessStatus::Denied
        );
        assert_eq!(
            classify_probe_output("0:none: Input/output error"),
            AccessStatus::Allowed
        );
    }

    #[test]
    fn test_check_device_nodes_empty_dir_is_allowed() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(check_device_nodes(dir.path()), AccessStatus::Allowed);
    }

    #[test]
    fn test_check_device_nodes_accessible_node() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("video0"), b"").unwrap();
        assert_eq!(check_device_nodes(dir.path()), AccessStatus::Allowed);
    }

    #[tokio::test]
    async fn test_v4l2_access_check_reads_dev_root() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("video0"), b"").unwrap();
        let permissions = HostPermissions::new("ffmpeg")
            .with_format(InputFormat::V4l2)
            .with_dev_root(dir.path());
        assert_eq!(permissions.capability(), Capability::Supported);
        assert_eq!(permissions.check_camera_access().await, AccessStatus::Allowed);
    }

    #[tokio::test]
    async fn test_escalation_without_settings_app_returns_false() {
        let permissions = HostPermissions::new("ffmpeg")
            .with_format(InputFormat::AvFoundation)
            .with_open_settings(false);
        assert!(!permissions.request_settings_escalation().await);
    }

    #[tokio::test]
    async fn test_escalation_on_v4l2_returns_false() {
        let permissions = HostPermissions::new("ffmpeg").with_format(InputFormat::V4l2);
        assert!(!permissions.request_settings_escalation().await);
    }

    #[test]
    fn test_with_capability_overrides_detection() {
        let permissions = HostPermissions::new("ffmpeg")
            .with_format(InputFormat::V4l2)
            .with_capability(Capability::Unsupported);
        assert_eq!(permissions.capability(), Capability::Unsupported);
    }
}
