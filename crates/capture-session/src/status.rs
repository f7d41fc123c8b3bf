//! Session status published to the UI

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::lookup::Identity;
use crate::state::{CaptureSession, Phase};

/// Snapshot of a session for display
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub phase: Phase,
    pub message: String,
    /// Polling loop is alive
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Start-up failure; the session will not retry on its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub submissions: u64,
    pub changed_at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn initial(session_id: Uuid) -> Self {
        Self {
            session_id,
            phase: Phase::Idle,
            message: "Camera not started".to_string(),
            running: false,
            matched: None,
            last_error: None,
            fatal: None,
            submissions: 0,
            changed_at: Utc::now(),
        }
    }

    pub fn from_session(session_id: Uuid, session: &CaptureSession, running: bool) -> Self {
        Self {
            session_id,
            phase: session.phase,
            message: session.phase.message().to_string(),
            running,
            matched: session.matched_identity.clone(),
            last_error: session.last_error.as_ref().map(|e| e.to_string()),
            fatal: None,
            submissions: session.submissions,
            changed_at: Utc::now(),
        }
    }

    pub fn fatal(session_id: Uuid, session: &CaptureSession, error: &crate::SessionError) -> Self {
        Self {
            message: error.to_string(),
            fatal: Some(error.to_string()),
            ..Self::from_session(session_id, session, false)
        }
    }

    /// Equal apart from the change timestamp
    pub fn same_state(&self, other: &SessionStatus) -> bool {
        self.session_id == other.session_id
            && self.phase == other.phase
            && self.message == other.message
            && self.running == other.running
            && self.matched == other.matched
            && self.last_error == other.last_error
            && self.fatal == other.fatal
            && self.submissions == other.submissions
    }
}
