//! Lookup backend configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which `IdentityLookup` the service wires in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupBackend {
    /// Post frames to the clinic backend
    #[default]
    Http,
    /// Match descriptors against a local enrollment file
    Gallery,
}

/// Lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub backend: LookupBackend,

    /// Backend root URL
    pub base_url: String,

    /// Recognition endpoint, appended to `base_url`
    pub identify_path: String,

    /// HTTP request timeout (milliseconds)
    pub request_timeout_ms: u64,

    /// Maximum descriptor distance accepted as a match (gallery only)
    pub match_threshold: f32,

    /// JSON enrollment file loaded into the gallery at start-up
    pub gallery_path: Option<PathBuf>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            backend: LookupBackend::Http,
            base_url: "http://localhost:5000".to_string(),
            identify_path: "/pacientes/reconhecer".to_string(),
            request_timeout_ms: 10_000,
            match_threshold: 1.0,
            gallery_path: None,
        }
    }
}

impl LookupConfig {
    /// Full recognition URL
    pub fn identify_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.identify_path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
