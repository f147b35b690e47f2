//! Capture device initialization and frame-source tables.
//!
//! A capture is initialized by probing the device with a one-frame ffmpeg run.
//! The probe confirms the device opens and reports its native resolution,
//! which becomes the record stream. An optional downscaled preview stream is
//! offered next to it.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio::process::Command;

use crate::devices::InputFormat;
use crate::error::CaptureError;
use crate::platform::{CaptureHandle, CaptureInitializer};

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse `WIDTHxHEIGHT`, e.g. `640x480`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (w, h) = s.trim().split_once('x').ok_or_else(|| {
            format!(
                "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 640x480)",
                s
            )
        })?;
        let width: u32 = w
            .parse()
            .map_err(|_| format!("Invalid width '{}' in resolution", w))?;
        let height: u32 = h
            .parse()
            .map_err(|_| format!("Invalid height '{}' in resolution", h))?;
        if width == 0 || height == 0 {
            return Err("Resolution width and height must be greater than 0".to_string());
        }
        if width > 7680 || height > 4320 {
            return Err("Resolution exceeds maximum supported (7680x4320)".to_string());
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How the capture shares the device with other consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingMode {
    /// Sole ownership; other captures of the device are refused.
    Exclusive,
    /// Read-only access alongside other shared captures.
    SharedReadOnly,
}

/// Which media the capture streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    VideoOnly,
    AudioAndVideo,
}

/// Parameters for [`CaptureInitializer::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub device_id: String,
    pub sharing_mode: SharingMode,
    pub streaming_mode: StreamingMode,
}

impl CaptureSettings {
    /// Exclusive, video-only capture of `device_id`.
    pub fn exclusive_video(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sharing_mode: SharingMode::Exclusive,
            streaming_mode: StreamingMode::VideoOnly,
        }
    }
}

/// Purpose of a stream exposed by a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStreamType {
    Preview,
    Record,
}

/// Kind of sensor data a frame source carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Color,
    Depth,
    Infrared,
}

/// One entry of a capture's frame-source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSourceInfo {
    pub id: String,
    pub stream_type: MediaStreamType,
    pub kind: SourceKind,
    /// Frame size delivered by this source, when known
    pub resolution: Option<Resolution>,
    pub framerate: Option<u32>,
}

impl FrameSourceInfo {
    pub fn new(id: impl Into<String>, stream_type: MediaStreamType, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            stream_type,
            kind,
            resolution: None,
            framerate: None,
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = Some(framerate);
        self
    }
}

/// Pick the source to preview: the first color preview stream, else the
/// first color record stream.
pub fn select_frame_source(sources: &[FrameSourceInfo]) -> Option<&FrameSourceInfo> {
    let color_of = |stream_type: MediaStreamType| {
        sources
            .iter()
            .find(|s| s.stream_type == stream_type && s.kind == SourceKind::Color)
    };
    color_of(MediaStreamType::Preview).or_else(|| color_of(MediaStreamType::Record))
}

fn claims() -> &'static Mutex<HashMap<String, (SharingMode, usize)>> {
    static CLAIMS: OnceLock<Mutex<HashMap<String, (SharingMode, usize)>>> = OnceLock::new();
    CLAIMS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A claim on a device held for the lifetime of a capture handle.
///
/// Exclusive claims refuse any other claim on the same device; shared claims
/// only refuse exclusive ones.
#[derive(Debug)]
pub struct DeviceClaim {
    device_id: String,
}

impl DeviceClaim {
    pub fn acquire(device_id: &str, mode: SharingMode) -> Result<Self, CaptureError> {
        let mut claims = claims().lock().unwrap_or_else(|e| e.into_inner());
        match claims.get_mut(device_id) {
            None => {
                claims.insert(device_id.to_string(), (mode, 1));
            }
            Some((SharingMode::SharedReadOnly, count)) if mode == SharingMode::SharedReadOnly => {
                *count += 1;
            }
            Some(_) => return Err(CaptureError::DeviceBusy(device_id.to_string())),
        }
        Ok(Self {
            device_id: device_id.to_string(),
        })
    }

}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claims = claims().lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, count)) = claims.get_mut(&self.device_id) {
            *count -= 1;
            if *count == 0 {
                claims.remove(&self.device_id);
            }
        }
    }
}

/// Capture initializer that validates devices with an ffmpeg probe.
#[derive(Debug, Clone)]
pub struct FfmpegCaptureInitializer {
    ffmpeg: String,
    format: InputFormat,
    framerate: u32,
    preview_resolution: Option<Resolution>,
}

impl FfmpegCaptureInitializer {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            format: InputFormat::host(),
            framerate: 30,
            preview_resolution: Some(Resolution::new(640, 480)),
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    /// Resolution of the preview stream; `None` exposes only the record stream.
    pub fn with_preview_resolution(mut self, resolution: Option<Resolution>) -> Self {
        self.preview_resolution = resolution;
        self
    }

    /// FFmpeg arguments for the one-frame probe of `device_id`.
    pub fn probe_args(&self, device_id: &str) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-f".to_string(),
            self.format.ffmpeg_name().to_string(),
        ];
        if self.format == InputFormat::AvFoundation {
            // AVFoundation refuses to open without an explicit rate
            args.push("-framerate".to_string());
            args.push(self.framerate.to_string());
        }
        args.extend([
            "-i".to_string(),
            self.format.input_spec(device_id),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]);
        args
    }

    /// Build the frame-source table for a probed device.
    ///
    /// # Arguments
    /// * `native` - Frame size reported by the probe, if any.
    /// * `native_fps` - Frame rate reported by the probe, if any.
    ///
    /// # Returns
    /// A color preview source when a preview resolution is configured,
    /// followed by the color record source at the device's native format.
    pub fn frame_sources(
        &self,
        native: Option<Resolution>,
        native_fps: Option<u32>,
    ) -> Vec<FrameSourceInfo> {
        let mut sources = Vec::new();
        if let Some(preview) = self.preview_resolution {
            sources.push(
                FrameSourceInfo::new("color-preview", MediaStreamType::Preview, SourceKind::Color)
                    .with_resolution(preview)
                    .with_framerate(self.framerate),
            );
        }
        let mut record =
            FrameSourceInfo::new("color-record", MediaStreamType::Record, SourceKind::Color)
                .with_framerate(native_fps.unwrap_or(self.framerate));
        record.resolution = native;
        sources.push(record);
        sources
    }
}

#[async_trait]
impl CaptureInitializer for FfmpegCaptureInitializer {
    async fn initialize(
        &self,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if settings.streaming_mode != StreamingMode::VideoOnly {
            return Err(CaptureError::AudioUnsupported);
        }

        // Dropped on every early return below, which frees the device again
        let claim = DeviceClaim::acquire(&settings.device_id, settings.sharing_mode)?;

        let args = self.probe_args(&settings.device_id);
        log::debug!("Probing capture device: {} {}", self.ffmpeg, args.join(" "));

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CaptureError::ToolNotFound {
                        tool: self.ffmpeg.clone(),
                    }
                } else {
                    CaptureError::ToolFailed {
                        tool: self.ffmpeg.clone(),
                        source: e,
                    }
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(CaptureError::OpenFailed {
                device: settings.device_id.clone(),
                message: last_error_line(&stderr)
                    .unwrap_or_else(|| format!("ffmpeg exited with {}", output.status)),
            });
        }

        let probed = parse_video_stream(&stderr);
        match probed {
            Some((res, fps)) => log::info!(
                "Capture device {} opened at {} ({} fps)",
                settings.device_id,
                res,
                fps.map(|f| f.to_string()).unwrap_or_else(|| "?".to_string())
            ),
            None => log::info!("Capture device {} opened", settings.device_id),
        }

        Ok(Box::new(FfmpegCaptureHandle {
            device_id: settings.device_id.clone(),
            sources: self.frame_sources(probed.map(|p| p.0), probed.and_then(|p| p.1)),
            claim: Some(claim),
        }))
    }
}

/// Capture handle produced by [`FfmpegCaptureInitializer`].
#[derive(Debug)]
pub struct FfmpegCaptureHandle {
    device_id: String,
    sources: Vec<FrameSourceInfo>,
    claim: Option<DeviceClaim>,
}

impl CaptureHandle for FfmpegCaptureHandle {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn frame_sources(&self) -> Vec<FrameSourceInfo> {
        if self.claim.is_some() {
            self.sources.clone()
        } else {
            Vec::new()
        }
    }

    fn release(&mut self) {
        if self.claim.take().is_some() {
            log::info!("Released capture device {}", self.device_id);
        }
    }
}

/// Parse the first `Stream #..: Video:` line of ffmpeg's stderr into the
/// frame size and (rounded) frame rate.
///
/// # Arguments
/// * `stderr` - The stderr output of the capture probe.
///
/// # Returns
/// `None` if no video stream line with a frame size is present.
pub fn parse_video_stream(stderr: &str) -> Option<(Resolution, Option<u32>)> {
    let line = stderr
        .lines()
        .find(|l| l.contains("Stream #") && l.contains("Video:"))?;
    let details = &line[line.find("Video:")? + "Video:".len()..];

    let mut resolution = None;
    let mut fps = None;
    for part in details.split(',') {
        let part = part.trim();
        if resolution.is_none() {
            let token = part.split_whitespace().next().unwrap_or("");
            if let Some((w, h)) = token.split_once('x') {
                if let (Ok(width), Ok(height)) = (w.parse::<u32>(), h.parse::<u32>()) {
                    resolution = Some(Resolution::new(width, height));
                    continue;
                }
            }
        }
        if let Some(rate) = part.strip_suffix(" fps") {
            fps = rate.trim().parse::<f32>().ok().map(|f| f.round() as u32);
        }
    }

    resolution.map(|r| (r, fps))
}

/// Last non-empty stderr line, which is where ffmpeg puts the fatal error.
fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(stream_type: MediaStreamType, kind: SourceKind, id: &str) -> FrameSourceInfo {
        FrameSourceInfo::new(id, stream_type, kind)
    }

    #[test]
    fn test_select_prefers_color_preview() {
        let sources = vec![
            source(MediaStreamType::Record, SourceKind::Color, "record"),
            source(MediaStreamType::Preview, SourceKind::Infrared, "ir-preview"),
            source(MediaStreamType::Preview, SourceKind::Color, "preview"),
        ];
        assert_eq!(select_frame_source(&sources).unwrap().id, "preview");
    }

    #[test]
    fn test_select_falls_back_to_color_record() {
        let sources = vec![
            source(MediaStreamType::Preview, SourceKind::Depth, "depth"),
            source(MediaStreamType::Record, SourceKind::Color, "record"),
        ];
        assert_eq!(select_frame_source(&sources).unwrap().id, "record");
    }

    #[test]
    fn test_select_none_without_color_source() {
        let sources = vec![
            source(MediaStreamType::Preview, SourceKind::Infrared, "ir"),
            source(MediaStreamType::Record, SourceKind::Depth, "depth"),
        ];
        assert!(select_frame_source(&sources).is_none());
        assert!(select_frame_source(&[]).is_none());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("1280x720").unwrap(), Resolution::new(1280, 720));
        assert!(Resolution::parse("1280").is_err());
        assert!(Resolution::parse("0x720").is_err());
        assert!(Resolution::parse("10000x720").is_err());
        assert!(Resolution::parse("axb").is_err());
        assert_eq!(Resolution::new(640, 480).to_string(), "640x480");
    }

    #[test]
    fn test_parse_video_stream_v4l2() {
        let stderr = "Input #0, video4linux2,v4l2, from '/dev/video0':\n\
            \x20 Duration: N/A, start: 1234.5, bitrate: 147456 kb/s\n\
            \x20 Stream #0:0: Video: rawvideo (YUY2 / 0x32595559), yuyv422, 640x480, \
            147456 kb/s, 30 fps, 30 tbr, 1000k tbn\n";
        let (res, fps) = parse_video_stream(stderr).unwrap();
        assert_eq!(res, Resolution::new(640, 480));
        assert_eq!(fps, Some(30));
    }

    #[test]
    fn test_parse_video_stream_with_sar_and_fractional_rate() {
        let stderr = "  Stream #0:0: Video: rawvideo (UYVY / 0x59565955), uyvy422(tv, bt709), \
            1920x1080 [SAR 1:1 DAR 16:9], 29.97 fps, 29.97 tbr";
        let (res, fps) = parse_video_stream(stderr).unwrap();
        assert_eq!(res, Resolution::new(1920, 1080));
        assert_eq!(fps, Some(30));
    }

    #[test]
    fn test_parse_video_stream_missing() {
        assert!(parse_video_stream("/dev/video9: No such file or directory").is_none());
    }

    #[test]
    fn test_last_error_line() {
        assert_eq!(
            last_error_line("banner\n/dev/video9: No such file or directory\n\n"),
            Some("/dev/video9: No such file or directory".to_string())
        );
        assert_eq!(last_error_line(""), None);
    }

    #[test]
    fn test_exclusive_claim_conflicts_until_dropped() {
        let first = DeviceClaim::acquire("test-exclusive-cam", SharingMode::Exclusive).unwrap();
        assert!(matches!(
            DeviceClaim::acquire("test-exclusive-cam", SharingMode::Exclusive),
            Err(CaptureError::DeviceBusy(_))
        ));
        assert!(DeviceClaim::acquire("test-exclusive-cam", SharingMode::SharedReadOnly).is_err());
        drop(first);
        assert!(DeviceClaim::acquire("test-exclusive-cam", SharingMode::Exclusive).is_ok());
    }

    #[test]
    fn test_shared_claims_coexist() {
        let a = DeviceClaim::acquire("test-shared-cam", SharingMode::SharedReadOnly).unwrap();
        let b = DeviceClaim::acquire("test-shared-cam", SharingMode::SharedReadOnly).unwrap();
        assert!(DeviceClaim::acquire("test-shared-cam", SharingMode::Exclusive).is_err());
        drop(a);
        assert!(DeviceClaim::acquire("test-shared-cam", SharingMode::Exclusive).is_err());
        drop(b);
        assert!(DeviceClaim::acquire("test-shared-cam", SharingMode::Exclusive).is_ok());
    }

    #[test]
    fn test_probe_args_avfoundation_sets_framerate() {
        let init = FfmpegCaptureInitializer::new("ffmpeg")
            .with_format(InputFormat::AvFoundation)
            .with_framerate(15);
        let args = init.probe_args("1");
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-f", "avfoundation", "-framerate", "15", "-i", "1:none",
                "-frames:v", "1", "-f", "null", "-"
            ]
        );
    }

    #[test]
    fn test_frame_sources_without_preview_resolution() {
        let init = FfmpegCaptureInitializer::new("ffmpeg").with_preview_resolution(None);
        let sources = init.frame_sources(Some(Resolution::new(1280, 720)), Some(25));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].stream_type, MediaStreamType::Record);
        assert_eq!(sources[0].resolution, Some(Resolution::new(1280, 720)));
        assert_eq!(sources[0].framerate, Some(25));
    }

    #[test]
    fn test_frame_sources_with_preview_resolution() {
        let init = FfmpegCaptureInitializer::new("ffmpeg")
            .with_preview_resolution(Some(Resolution::new(320, 240)));
        let sources = init.frame_sources(None, None);
        assert_eq!(select_frame_source(&sources).unwrap().id, "color-preview");
        assert_eq!(sources[0].resolution, Some(Resolution::new(320, 240)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_audio() {
        let init = FfmpegCaptureInitializer::new("ffmpeg");
        let settings = CaptureSettings {
            device_id: "test-audio-cam".to_string(),
            sharing_mode: SharingMode::Exclusive,
            streaming_mode: StreamingMode::AudioAndVideo,
        };
        assert!(matches!(
            init.initialize(&settings).await,
            Err(CaptureError::AudioUnsupported)
        ));
    }

    #[tokio::test]
    async fn test_initialize_missing_tool_releases_claim() {
        let init = FfmpegCaptureInitializer::new("camview-no-such-ffmpeg");
        let settings = CaptureSettings::exclusive_video("test-missing-tool-cam");
        assert!(matches!(
            init.initialize(&settings).await,
            Err(CaptureError::ToolNotFound { .. })
        ));
        assert!(DeviceClaim::acquire("test-missing-tool-cam", SharingMode::Exclusive).is_ok());
    }

    #[test]
    fn test_handle_release_frees_claim() {
        let claim = DeviceClaim::acquire("test-release-cam", SharingMode::Exclusive).unwrap();
        let mut handle = FfmpegCaptureHandle {
            device_id: "test-release-cam".to_string(),
            sources: vec![source(MediaStreamType::Record, SourceKind::Color, "r")],
            claim: Some(claim),
        };
        assert_eq!(handle.frame_sources().len(), 1);
        handle.release();
        handle.release();
        assert!(handle.frame_sources().is_empty());
        assert!(DeviceClaim::acquire("test-release-cam", SharingMode::Exclusive).is_ok());
    }
}
