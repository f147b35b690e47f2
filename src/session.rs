//! The webcam session controller.
//!
//! [`WebcamSession`] owns the device list, the selected device, the capture
//! handle, the chosen frame source and the preview player. Its operations
//! mirror the front end's actions. Every operation publishes a status line
//! and returns its outcome; failures leave the session retryable.
//!
//! States: Uninitialized (no capture), CaptureReady (capture, not previewing)
//! and Previewing. `reset` is the only way back to Uninitialized.

use std::sync::Arc;

use tokio::sync::watch;

use crate::capture::{select_frame_source, CaptureSettings, FrameSourceInfo};
use crate::devices::{DeviceInfo, DeviceList};
use crate::error::SessionError;
use crate::permissions::{AccessStatus, Capability};
use crate::platform::{CaptureHandle, Collaborators, FailureCallback, Player, PlayerOptions};

/// Lifecycle state of a [`WebcamSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    CaptureReady,
    Previewing,
}

/// Enable flags for the front end's actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionGates {
    pub start_capture: bool,
    pub start_preview: bool,
    pub stop_preview: bool,
    pub reset: bool,
}

impl ActionGates {
    /// Gates of a session with nothing initialized: only reset is enabled.
    pub fn initial() -> Self {
        Self {
            reset: true,
            ..Self::default()
        }
    }
}

/// Player settings used for every preview.
const PREVIEW_OPTIONS: PlayerOptions = PlayerOptions {
    real_time: true,
    autoplay: false,
};

pub struct WebcamSession {
    collaborators: Collaborators,
    devices: DeviceList,
    selected: Option<usize>,
    capture: Option<Box<dyn CaptureHandle>>,
    frame_source: Option<FrameSourceInfo>,
    player: Option<Box<dyn Player>>,
    previewing: bool,
    actions: ActionGates,
    status: Arc<watch::Sender<String>>,
    real_time: bool,
}

impl std::fmt::Debug for WebcamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebcamSession")
            .field("state", &self.state())
            .field("devices", &self.devices)
            .field("selected", &self.selected)
            .field("frame_source", &self.frame_source)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl WebcamSession {
    /// Create an uninitialized session. Call
    /// [`enumerate_devices`](Self::enumerate_devices) to populate it.
    pub fn new(collaborators: Collaborators) -> Self {
        let (status, _) = watch::channel(String::new());
        Self {
            collaborators,
            devices: DeviceList::default(),
            selected: None,
            capture: None,
            frame_source: None,
            player: None,
            previewing: false,
            actions: ActionGates::initial(),
            status: Arc::new(status),
            real_time: PREVIEW_OPTIONS.real_time,
        }
    }

    /// Turn real-time playback off for previews (buffered, smoother playback).
    pub fn with_real_time(mut self, real_time: bool) -> Self {
        self.real_time = real_time;
        self
    }

    pub fn state(&self) -> SessionState {
        match (&self.capture, self.previewing) {
            (None, _) => SessionState::Uninitialized,
            (Some(_), false) => SessionState::CaptureReady,
            (Some(_), true) => SessionState::Previewing,
        }
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_device(&self) -> Option<&DeviceInfo> {
        self.selected.and_then(|i| self.devices.get(i))
    }

    /// Id of the device the capture handle is bound to.
    pub fn capture_device_id(&self) -> Option<&str> {
        self.capture.as_deref().map(|c| c.device_id())
    }

    pub fn frame_source(&self) -> Option<&FrameSourceInfo> {
        self.frame_source.as_ref()
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn is_previewing(&self) -> bool {
        self.previewing
    }

    /// Whether the player is currently showing frames. Unlike
    /// [`is_previewing`](Self::is_previewing) this turns false when playback
    /// fails or the preview window goes away.
    pub fn is_playing(&self) -> bool {
        self.player.as_ref().is_some_and(|p| p.is_playing())
    }

    pub fn actions(&self) -> ActionGates {
        self.actions
    }

    /// The latest status line.
    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change, including asynchronous
    /// player failures.
    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.status.send_replace(message);
    }

    /// Publish `err` as the status and hand it back for returning.
    fn fail(&self, err: SessionError) -> SessionError {
        log::warn!("{}", err);
        self.status.send_replace(err.to_string());
        err
    }

    /// Query the host for video capture devices and select the first one.
    pub async fn enumerate_devices(&mut self) -> Result<&DeviceList, SessionError> {
        self.devices = DeviceList::default();
        self.selected = None;
        self.actions.start_capture = false;

        let devices = match self.collaborators.devices.find_video_capture_devices().await {
            Ok(devices) => devices,
            Err(e) => return Err(self.fail(SessionError::EnumerationFailed(e.to_string()))),
        };

        if devices.is_empty() {
            return Err(self.fail(SessionError::NoDevicesFound));
        }

        self.devices = devices;
        self.actions.start_capture = true;
        self.select_device(Some(0));
        Ok(&self.devices)
    }

    /// Record the selected device. Touches no hardware.
    pub fn select_device(&mut self, index: Option<usize>) {
        self.selected = index;
        let name = match index {
            None => "(none)".to_string(),
            Some(i) => match self.devices.get(i) {
                Some(device) => device.name.clone(),
                None => "(invalid)".to_string(),
            },
        };
        self.set_status(format!("Selected device: {}", name));
    }

    /// Initialize exclusive, video-only capture of the selected device.
    pub async fn start_capture(&mut self) -> Result<(), SessionError> {
        if self.capture.is_some() {
            return Err(self.fail(SessionError::AlreadyInitialized));
        }

        self.ensure_camera_access().await?;

        let Some(device_id) = self.selected_device().map(|d| d.id.clone()) else {
            return Err(self.fail(SessionError::NoDeviceSelected));
        };

        let settings = CaptureSettings::exclusive_video(device_id);
        log::debug!("Initializing capture with {:?}", settings);

        match self.collaborators.capture.initialize(&settings).await {
            Ok(handle) => {
                self.capture = Some(handle);
                self.actions.start_preview = true;
                self.set_status("Capture initialized successfully.");
                Ok(())
            }
            Err(e) => Err(self.fail(SessionError::InitializationFailed(e.to_string()))),
        }
    }

    /// Check camera access where the host supports it, escalating once.
    async fn ensure_camera_access(&self) -> Result<(), SessionError> {
        let permissions = &self.collaborators.permissions;

        if permissions.capability() == Capability::Unsupported {
            log::warn!("Camera access check is not available on this host");
            self.set_status(
                "Camera access check unavailable; capture may fail if access is blocked.",
            );
            return Ok(());
        }

        if permissions.check_camera_access().await == AccessStatus::Allowed {
            return Ok(());
        }

        self.set_status("Camera access denied. Launching settings.");
        let launched = self
            .collaborators
            .permissions
            .request_settings_escalation()
            .await;
        log::debug!("Settings escalation launched: {}", launched);

        if self.collaborators.permissions.check_camera_access().await == AccessStatus::Allowed {
            Ok(())
        } else {
            Err(self.fail(SessionError::PermissionDenied))
        }
    }

    /// Start previewing the best color stream of the capture.
    pub fn start_preview(&mut self) -> Result<(), SessionError> {
        self.frame_source = None;

        let Some(capture) = self.capture.as_deref() else {
            return Err(self.fail(SessionError::NotInitialized));
        };

        let sources = capture.frame_sources();
        let Some(source) = select_frame_source(&sources).cloned() else {
            return Err(self.fail(SessionError::NoFrameSource));
        };
        let device_id = capture.device_id().to_string();
        log::debug!("Selected frame source {:?}", source);

        self.release_player();

        let status = Arc::clone(&self.status);
        let on_failure: FailureCallback = Arc::new(move |message: String| {
            let err = SessionError::PlaybackFailed(message);
            log::error!("{}", err);
            status.send_replace(err.to_string());
        });

        let options = PlayerOptions {
            real_time: self.real_time,
            ..PREVIEW_OPTIONS
        };
        let mut player = match self
            .collaborators
            .players
            .create(&device_id, &source, options, on_failure)
        {
            Ok(player) => player,
            Err(e) => return Err(self.fail(SessionError::PlaybackFailed(e.to_string()))),
        };

        if let Err(e) = player.play() {
            player.dispose();
            return Err(self.fail(SessionError::PlaybackFailed(e.to_string())));
        }

        self.frame_source = Some(source);
        self.player = Some(player);
        self.previewing = true;
        self.actions.start_preview = false;
        self.actions.stop_preview = true;
        self.set_status("Start preview succeeded!");
        Ok(())
    }

    /// Pause the preview. A no-op without a player.
    pub fn stop_preview(&mut self) -> Result<(), SessionError> {
        if let Some(player) = self.player.as_mut() {
            if let Err(e) = player.pause() {
                return Err(self.fail(SessionError::PlaybackFailed(e.to_string())));
            }
            self.set_status("Preview stopped.");
        }
        self.previewing = false;
        self.actions.start_preview = self.capture.is_some();
        self.actions.stop_preview = false;
        Ok(())
    }

    /// Release everything and enumerate devices again.
    pub async fn reset(&mut self) -> Result<&DeviceList, SessionError> {
        self.release_capture();
        self.actions = ActionGates::initial();
        self.set_status("Session reset.");
        self.enumerate_devices().await
    }

    fn release_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.dispose();
        }
        self.previewing = false;
    }

    /// Release the player first since it reads from the capture.
    fn release_capture(&mut self) {
        self.release_player();
        self.frame_source = None;
        if let Some(mut capture) = self.capture.take() {
            capture.release();
        }
    }
}

impl Drop for WebcamSession {
    fn drop(&mut self) {
        self.release_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MediaStreamType, SourceKind};
    use crate::error::{CaptureError, DeviceError, PlayerError};
    use crate::platform::{CaptureInitializer, DeviceEnumerator, PermissionAuthority, PlayerFactory};
    use async_trait::async_trait;

    struct OneCamera;

    #[async_trait]
    impl DeviceEnumerator for OneCamera {
        async fn find_video_capture_devices(&self) -> Result<DeviceList, DeviceError> {
            Ok(DeviceList::new(vec![DeviceInfo::new("cam0", "Camera")]))
        }
    }

    struct Open;

    #[async_trait]
    impl PermissionAuthority for Open {
        fn capability(&self) -> Capability {
            Capability::Supported
        }
        async fn check_camera_access(&self) -> AccessStatus {
            AccessStatus::Allowed
        }
        async fn request_settings_escalation(&self) -> bool {
            false
        }
    }

    struct Handle {
        sources: Vec<FrameSourceInfo>,
    }

    impl CaptureHandle for Handle {
        fn device_id(&self) -> &str {
            "cam0"
        }
        fn frame_sources(&self) -> Vec<FrameSourceInfo> {
            self.sources.clone()
        }
        fn release(&mut self) {}
    }

    struct Init {
        sources: Vec<FrameSourceInfo>,
    }

    #[async_trait]
    impl CaptureInitializer for Init {
        async fn initialize(
            &self,
            _settings: &CaptureSettings,
        ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
            Ok(Box::new(Handle {
                sources: self.sources.clone(),
            }))
        }
    }

    struct FailingPlayer;

    impl Player for FailingPlayer {
        fn play(&mut self) -> Result<(), PlayerError> {
            Err(PlayerError::ToolNotFound {
                tool: "ffplay".to_string(),
            })
        }
        fn pause(&mut self) -> Result<(), PlayerError> {
            Ok(())
        }
        fn dispose(&mut self) {}
        fn is_playing(&self) -> bool {
            false
        }
    }

    struct FailingPlayers;

    impl PlayerFactory for FailingPlayers {
        fn create(
            &self,
            _device_id: &str,
            _source: &FrameSourceInfo,
            _options: PlayerOptions,
            _on_failure: FailureCallback,
        ) -> Result<Box<dyn Player>, PlayerError> {
            Ok(Box::new(FailingPlayer))
        }
    }

    fn session(sources: Vec<FrameSourceInfo>) -> WebcamSession {
        WebcamSession::new(Collaborators {
            devices: Box::new(OneCamera),
            permissions: Box::new(Open),
            capture: Box::new(Init { sources }),
            players: Box::new(FailingPlayers),
        })
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let s = session(vec![]);
        assert_eq!(s.state(), SessionState::Uninitialized);
        assert_eq!(s.actions(), ActionGates::initial());
        assert!(s.actions().reset);
        assert!(!s.actions().start_capture);
        assert_eq!(s.selected_index(), None);
        assert_eq!(s.status(), "");
    }

    #[tokio::test]
    async fn test_play_failure_leaves_capture_ready() {
        let mut s = session(vec![FrameSourceInfo::new(
            "p",
            MediaStreamType::Preview,
            SourceKind::Color,
        )]);
        s.enumerate_devices().await.unwrap();
        s.start_capture().await.unwrap();

        let err = s.start_preview().unwrap_err();
        assert!(matches!(err, SessionError::PlaybackFailed(_)));
        assert_eq!(s.state(), SessionState::CaptureReady);
        assert!(!s.has_player());
        assert!(s.frame_source().is_none());
        assert!(s.actions().start_preview);
        assert!(s.status().starts_with("Player error:"));
    }

    #[tokio::test]
    async fn test_select_out_of_range_reports_invalid() {
        let mut s = session(vec![]);
        s.enumerate_devices().await.unwrap();
        s.select_device(Some(4));
        assert_eq!(s.status(), "Selected device: (invalid)");
        assert!(s.selected_device().is_none());
        s.select_device(None);
        assert_eq!(s.status(), "Selected device: (none)");
    }

    #[tokio::test]
    async fn test_status_subscriber_sees_changes() {
        let mut s = session(vec![]);
        let mut rx = s.subscribe_status();
        s.enumerate_devices().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "Selected device: Camera");
    }
}
