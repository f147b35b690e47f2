//! Host collaborator traits used by the webcam session.
//!
//! The session never talks to the operating system directly. Each concern
//! (enumeration, permissions, capture, playback) is a trait object so the
//! session can be driven by host backends or by test doubles.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capture::{CaptureSettings, FrameSourceInfo};
use crate::devices::DeviceList;
use crate::error::{CaptureError, DeviceError, PlayerError};
use crate::permissions::{AccessStatus, Capability};

/// Lists the video capture devices on the host.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn find_video_capture_devices(&self) -> Result<DeviceList, DeviceError>;
}

/// Answers whether the process may use the camera.
#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    /// Whether [`check_camera_access`](Self::check_camera_access) means anything on this host.
    fn capability(&self) -> Capability;

    async fn check_camera_access(&self) -> AccessStatus;

    /// Ask the user to grant access, typically by opening a settings page.
    /// Best effort; returns whether the escalation could be launched.
    async fn request_settings_escalation(&self) -> bool;
}

/// Opens capture devices.
#[async_trait]
pub trait CaptureInitializer: Send + Sync {
    /// Initialize capture of `settings.device_id`. On failure anything
    /// acquired along the way has already been released.
    async fn initialize(
        &self,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// An initialized capture device.
pub trait CaptureHandle: Send {
    fn device_id(&self) -> &str;

    /// The frame sources this capture exposes, in table order.
    fn frame_sources(&self) -> Vec<FrameSourceInfo>;

    /// Release the device. Idempotent.
    fn release(&mut self);
}

/// Options applied when a player is bound to a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerOptions {
    /// Favor latency over smoothness (drop late frames, no buffering).
    pub real_time: bool,
    /// Start playing as soon as the player is created.
    pub autoplay: bool,
}

/// Callback fired when playback fails asynchronously. May run on any thread.
pub type FailureCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Creates players bound to a frame source.
pub trait PlayerFactory: Send + Sync {
    fn create(
        &self,
        device_id: &str,
        source: &FrameSourceInfo,
        options: PlayerOptions,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn Player>, PlayerError>;
}

/// A media player bound to one frame source.
pub trait Player: Send {
    fn play(&mut self) -> Result<(), PlayerError>;

    fn pause(&mut self) -> Result<(), PlayerError>;

    /// Stop playback and free the player's resources. Idempotent.
    fn dispose(&mut self);

    fn is_playing(&self) -> bool;
}

/// Everything a [`crate::session::WebcamSession`] needs from the host.
pub struct Collaborators {
    pub devices: Box<dyn DeviceEnumerator>,
    pub permissions: Box<dyn PermissionAuthority>,
    pub capture: Box<dyn CaptureInitializer>,
    pub players: Box<dyn PlayerFactory>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
