//! Configuration file handling for camview.
//!
//! Loads configuration from `<config dir>/camview/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::Resolution;

/// Configuration file structure for camview.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CameraConfig {
    /// Device index selected after enumeration
    #[serde(default)]
    pub device: usize,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            framerate: default_framerate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PreviewConfig {
    /// Preview stream size as `WIDTHxHEIGHT`. Empty or missing means the
    /// device only exposes its native record stream.
    #[serde(default = "default_preview_resolution")]
    pub resolution: Option<String>,
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default = "default_true")]
    pub real_time: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            resolution: default_preview_resolution(),
            window_title: default_window_title(),
            real_time: true,
        }
    }
}

impl PreviewConfig {
    /// The preview resolution, if one is configured.
    pub fn resolution(&self) -> Result<Option<Resolution>, String> {
        match self.resolution.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => Resolution::parse(s).map(Some),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PermissionsConfig {
    /// Open the host's camera privacy settings when access is denied
    #[serde(default = "default_true")]
    pub open_settings: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            open_settings: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffplay")]
    pub ffplay: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffplay: default_ffplay(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_framerate() -> u32 {
    30
}

fn default_preview_resolution() -> Option<String> {
    Some("640x480".to_string())
}

fn default_window_title() -> String {
    "camview".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffplay() -> String {
    "ffplay".to_string()
}

/// Commented default config written by `camview config init`.
pub const DEFAULT_CONFIG: &str = r#"# camview configuration

[camera]
# Device index selected after enumeration (see `camview list-devices`)
device = 0
# Capture frame rate
framerate = 30

[preview]
# Preview stream size. Set to "" to preview the native record stream instead.
resolution = "640x480"
# Title of the preview window
window_title = "camview"
# Drop late frames and disable buffering for the lowest latency
real_time = true

[permissions]
# Open the system camera privacy settings when access is denied
open_settings = true

[tools]
ffmpeg = "ffmpeg"
ffplay = "ffplay"
"#;

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        config.validate(&path)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        self.preview
            .resolution()
            .map_err(|message| ConfigError::Invalid {
                path: path.to_path_buf(),
                message,
            })?;
        if !(1..=120).contains(&self.camera.framerate) {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: format!(
                    "Framerate must be between 1 and 120 fps, got {}",
                    self.camera.framerate
                ),
            });
        }
        Ok(())
    }

    /// Write the commented default config to `path`, creating parent
    /// directories. Refuses to overwrite an existing file.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, DEFAULT_CONFIG).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config file '{}': {message}", path.display())]
    Invalid { path: PathBuf, message: String },
    #[error("Config file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("camview").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/camview/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.camera.framerate, 30);
        assert_eq!(
            config.preview.resolution().unwrap(),
            Some(Resolution::new(640, 480))
        );
        assert!(config.permissions.open_settings);
        assert_eq!(config.tools.ffplay, "ffplay");
    }

    #[test]
    fn test_default_config_text_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[camera]\ndevice = 2\n\n[preview]\nresolution = \"\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.camera.device, 2);
        assert_eq!(config.camera.framerate, 30);
        assert_eq!(config.preview.resolution().unwrap(), None);
        assert_eq!(config.preview.window_title, "camview");
    }

    #[test]
    fn test_parse_error_carries_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[camera\ndevice = ").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[preview]\nresolution = \"big\"\n").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::Invalid { .. })
        ));

        std::fs::write(&path, "[camera]\nframerate = 0\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Framerate"));
    }

    #[test]
    fn test_write_default_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::write_default(&path).unwrap();
        assert!(path.exists());
        assert!(matches!(
            Config::write_default(&path),
            Err(ConfigError::AlreadyExists { .. })
        ));
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        assert!(default_path().ends_with("camview/config.toml"));
    }
}
