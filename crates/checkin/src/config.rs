//! Service configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file, then `CHECKIN__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};

use camera_capture::{Facing, StreamConstraints};
use capture_session::SessionConfig;
use ::config::{Config, Environment, File};
use face_detector::DetectorConfig;
use identity_lookup::LookupConfig;
use serde::{Deserialize, Serialize};

use crate::CheckinError;

/// Camera section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Directory of still frames replayed as the camera
    pub frames_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let constraints = StreamConstraints::default();
        Self {
            frames_dir: PathBuf::from("frames"),
            width: constraints.width,
            height: constraints.height,
            facing: constraints.facing,
        }
    }
}

impl CameraConfig {
    pub fn constraints(&self) -> StreamConstraints {
        StreamConstraints {
            width: self.width,
            height: self.height,
            facing: self.facing,
        }
    }
}

/// HTTP server section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Check-in service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckinConfig {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub session: SessionConfig,
    pub lookup: LookupConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl CheckinConfig {
    /// Load defaults, then `path` (or `checkin.toml` if present), then the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self, CheckinError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("checkin").required(false),
        };

        let config: CheckinConfig = Config::builder()
            .add_source(Config::try_from(&CheckinConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix("CHECKIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.session_config().validate()?;
        Ok(config)
    }

    /// Session settings with the camera section applied
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            camera: self.camera.constraints(),
            ..self.session.clone()
        }
    }
}
