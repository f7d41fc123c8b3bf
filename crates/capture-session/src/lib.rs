//! Capture Session for face check-in
//!
//! Drives one kiosk screen from camera to patient record:
//! - Polls the camera on a fixed interval and runs face detection
//! - Gates submissions on face size and a cooldown window
//! - Keeps at most one identity lookup in flight
//! - Stops and releases the camera once a patient is identified

pub mod config;
pub mod controller;
pub mod detection;
pub mod error;
pub mod lookup;
pub mod state;
pub mod status;

pub use config::SessionConfig;
pub use controller::CaptureController;
pub use detection::{Detection, DetectorError, FaceBox, FaceDescriptor, FaceDetector};
pub use error::{SessionError, SubmissionFailure, TransientError};
pub use lookup::{Identity, IdentityLookup, LookupError, LookupOutcome, Submission};
pub use state::{Action, CaptureSession, Event, Observation, Phase, Policy, Step};
pub use status::SessionStatus;
