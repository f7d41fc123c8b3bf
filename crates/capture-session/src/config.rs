//! Capture session configuration

use std::time::Duration;

use camera_capture::StreamConstraints;
use serde::{Deserialize, Serialize};

use crate::state::Policy;
use crate::SessionError;

/// Capture session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Polling interval (milliseconds)
    pub tick_interval_ms: u64,

    /// Minimum time between two submissions (milliseconds)
    pub cooldown_ms: u64,

    /// A face must exceed this fraction of the shorter frame side, in both
    /// width and height, to be submitted
    pub min_face_ratio: f32,

    /// Per-lookup timeout (milliseconds); `None` waits forever
    pub lookup_timeout_ms: Option<u64>,

    /// JPEG quality for submitted frames (1-100)
    pub jpeg_quality: u8,

    /// Requested camera stream
    pub camera: StreamConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 300,
            cooldown_ms: 5000,
            min_face_ratio: 0.2,
            lookup_timeout_ms: Some(10_000),
            jpeg_quality: 90,
            camera: StreamConstraints::default(),
        }
    }
}

impl SessionConfig {
    /// Shorter cooldown for attended desks where staff re-position patients
    pub fn attended() -> Self {
        Self {
            cooldown_ms: 3000,
            ..Default::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout_ms.map(Duration::from_millis)
    }

    pub fn policy(&self) -> Policy {
        Policy {
            min_face_ratio: self.min_face_ratio,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.tick_interval_ms == 0 {
            return Err(SessionError::Config("tick_interval_ms must be positive".into()));
        }
        if !(self.min_face_ratio > 0.0 && self.min_face_ratio <= 1.0) {
            return Err(SessionError::Config(format!(
                "min_face_ratio must be in (0, 1], got {}",
                self.min_face_ratio
            )));
        }
        if self.lookup_timeout_ms == Some(0) {
            return Err(SessionError::Config("lookup_timeout_ms must be positive".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(SessionError::Config(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(SessionError::Config("camera dimensions must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(300));
        assert_eq!(config.policy().cooldown, Duration::from_secs(5));
        assert_eq!(config.lookup_timeout(), Some(Duration::from_secs(10)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_attended_cooldown() {
        assert_eq!(SessionConfig::attended().cooldown_ms, 3000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_tick = SessionConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(zero_tick.validate(), Err(SessionError::Config(_))));

        let ratio = SessionConfig {
            min_face_ratio: 1.5,
            ..Default::default()
        };
        assert!(ratio.validate().is_err());

        let quality = SessionConfig {
            jpeg_quality: 0,
            ..Default::default()
        };
        assert!(quality.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"cooldown_ms": 3000}"#).unwrap();
        assert_eq!(config.cooldown_ms, 3000);
        assert_eq!(config.tick_interval_ms, 300);
        assert_eq!(config.camera.width, 640);
    }
}
