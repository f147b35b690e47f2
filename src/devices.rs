//! Video capture device discovery.
//!
//! Devices are listed through the host's native capture API as FFmpeg sees it:
//! AVFoundation on macOS, Video4Linux2 on Linux (read straight from sysfs) and
//! DirectShow on Windows.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::DeviceError;
use crate::platform::DeviceEnumerator;

/// A single video capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Identifier handed to the capture backend (AVFoundation index,
    /// `/dev/videoN` path or DirectShow name).
    pub id: String,
    /// Human-readable device name
    pub name: String,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Ordered snapshot of the devices found by one enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<DeviceInfo>,
}

impl DeviceList {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceInfo> {
        self.devices.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceInfo> {
        self.devices.iter()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a DeviceInfo;
    type IntoIter = std::slice::Iter<'a, DeviceInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// FFmpeg input device family used on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    AvFoundation,
    V4l2,
    DShow,
}

impl InputFormat {
    /// The input format native to the compile target.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            InputFormat::AvFoundation
        } else if cfg!(target_os = "windows") {
            InputFormat::DShow
        } else {
            InputFormat::V4l2
        }
    }

    /// Name passed to `-f` for ffmpeg and ffplay.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            InputFormat::AvFoundation => "avfoundation",
            InputFormat::V4l2 => "v4l2",
            InputFormat::DShow => "dshow",
        }
    }

    /// Value passed to `-i` to open the video stream of `device_id`.
    pub fn input_spec(&self, device_id: &str) -> String {
        match self {
            // "<video>:none" keeps AVFoundation from opening an audio device
            InputFormat::AvFoundation => format!("{}:none", device_id),
            InputFormat::V4l2 => device_id.to_string(),
            InputFormat::DShow => format!("video={}", device_id),
        }
    }
}

/// Device enumerator for the local host.
#[derive(Debug, Clone)]
pub struct HostDeviceEnumerator {
    ffmpeg: String,
    format: InputFormat,
    sysfs_root: PathBuf,
}

impl HostDeviceEnumerator {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            format: InputFormat::host(),
            sysfs_root: PathBuf::from("/sys/class/video4linux"),
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Run ffmpeg's device listing and return its stderr, where the list is printed.
    async fn ffmpeg_listing(&self, args: &[&str]) -> Result<String, DeviceError> {
        log::debug!("Listing devices: {} {}", self.ffmpeg, args.join(" "));
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DeviceError::ToolNotFound {
                        tool: self.ffmpeg.clone(),
                    }
                } else {
                    DeviceError::ToolFailed {
                        tool: self.ffmpeg.clone(),
                        source: e,
                    }
                }
            })?;

        // The listing "fails" by design since there is no real input to open
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

#[async_trait]
impl DeviceEnumerator for HostDeviceEnumerator {
    async fn find_video_capture_devices(&self) -> Result<DeviceList, DeviceError> {
        let devices = match self.format {
            InputFormat::AvFoundation => {
                let stderr = self
                    .ffmpeg_listing(&[
                        "-hide_banner",
                        "-f",
                        "avfoundation",
                        "-list_devices",
                        "true",
                        "-i",
                        "",
                    ])
                    .await?;
                parse_avfoundation_list(&stderr)
            }
            InputFormat::DShow => {
                let stderr = self
                    .ffmpeg_listing(&[
                        "-hide_banner",
                        "-list_devices",
                        "true",
                        "-f",
                        "dshow",
                        "-i",
                        "dummy",
                    ])
                    .await?;
                parse_dshow_list(&stderr)
            }
            InputFormat::V4l2 => {
                let root = self.sysfs_root.clone();
                let path = root.display().to_string();
                tokio::task::spawn_blocking(move || scan_video4linux(&root))
                    .await
                    .map_err(|e| DeviceError::Sysfs {
                        path,
                        source: std::io::Error::other(e),
                    })??
            }
        };

        log::info!("Found {} video capture device(s)", devices.len());
        Ok(DeviceList::new(devices))
    }
}

/// Parse the video section of FFmpeg's AVFoundation device listing.
///
/// Screen-capture pseudo devices are skipped; only cameras are returned.
///
/// # Arguments
/// * `stderr` - The stderr output of `ffmpeg -f avfoundation -list_devices true`.
///
/// # Returns
/// The cameras in listing order, with the AVFoundation index as id.
pub fn parse_avfoundation_list(stderr: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    let mut in_video_section = false;

    for line in stderr.lines() {
        if line.contains("AVFoundation video devices:") {
            in_video_section = true;
            continue;
        }
        if line.contains("AVFoundation audio devices:") {
            break;
        }
        if !in_video_section {
            continue;
        }
        if let Some((index, name)) = parse_avfoundation_line(line) {
            if name.starts_with("Capture screen") {
                continue;
            }
            devices.push(DeviceInfo::new(index.to_string(), name));
        }
    }

    devices
}

/// Parse one `[AVFoundation indev @ 0x...] [index] name` line.
fn parse_avfoundation_line(line: &str) -> Option<(usize, String)> {
    let bracket_idx = line.find("] [")?;
    let after_bracket = &line[bracket_idx + 3..];

    let close_bracket = after_bracket.find(']')?;
    let index: usize = after_bracket[..close_bracket].parse().ok()?;

    let name = after_bracket.get(close_bracket + 1..)?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    Some((index, name))
}

/// Parse FFmpeg's DirectShow device listing.
///
/// Handles both the newer `"Name" (video)` form and the older layout with a
/// `DirectShow video devices` section header. The DirectShow friendly name is
/// the device id, since that is what `-i video=<name>` expects.
///
/// # Arguments
/// * `stderr` - The stderr output of `ffmpeg -list_devices true -f dshow`.
///
/// # Returns
/// The video devices in listing order, without duplicates.
pub fn parse_dshow_list(stderr: &str) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = Vec::new();
    let mut in_video_section = false;

    for line in stderr.lines() {
        if line.contains("DirectShow video devices") {
            in_video_section = true;
            continue;
        }
        if line.contains("DirectShow audio devices") {
            in_video_section = false;
            continue;
        }
        if line.contains("Alternative name") {
            continue;
        }

        let Some(name) = quoted(line) else {
            continue;
        };
        let tagged_video = line.trim_end().ends_with("(video)");
        if (tagged_video || in_video_section) && !devices.iter().any(|d| d.id == name) {
            devices.push(DeviceInfo::new(name.clone(), name));
        }
    }

    devices
}

fn quoted(line: &str) -> Option<String> {
    let start = line.find('"')?;
    let rest = &line[start + 1..];
    let end = rest.find('"')?;
    let name = &rest[..end];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// List Video4Linux2 capture nodes under a sysfs class directory.
///
/// Only nodes whose `index` is 0 are returned; higher indices are metadata
/// nodes of the same camera. A missing root means no devices.
///
/// # Arguments
/// * `root` - The sysfs class directory, normally `/sys/class/video4linux`.
///
/// # Returns
/// One device per camera, sorted by node number, with `/dev/videoN` as id.
///
/// # Errors
/// Returns [`DeviceError::Sysfs`] if `root` exists but cannot be read.
pub fn scan_video4linux(root: &Path) -> Result<Vec<DeviceInfo>, DeviceError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(root).map_err(|e| DeviceError::Sysfs {
        path: root.display().to_string(),
        source: e,
    })?;

    let mut nodes: Vec<(u32, DeviceInfo)> = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let Some(number) = file_name
            .strip_prefix("video")
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let dir = entry.path();
        if let Ok(index) = std::fs::read_to_string(dir.join("index")) {
            if index.trim() != "0" {
                continue;
            }
        }

        let name = std::fs::read_to_string(dir.join("name"))
            .map(|n| n.trim().to_string())
            .unwrap_or_default();
        let name = if name.is_empty() {
            file_name.to_string()
        } else {
            name
        };

        nodes.push((number, DeviceInfo::new(format!("/dev/video{}", number), name)));
    }

    nodes.sort_by_key(|(number, _)| *number);
    Ok(nodes.into_iter().map(|(_, device)| device).collect())
}
