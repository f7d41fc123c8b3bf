//! Identity lookup capability consumed by the session

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::{FaceBox, FaceDescriptor};

/// Lookup error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Submission has no face descriptor")]
    MissingDescriptor,
}

/// Patient record returned by a positive match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    #[serde(alias = "nome")]
    pub name: String,
    /// National document number (CPF)
    #[serde(default, alias = "cpf", skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, alias = "data_nascimento", skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    /// Embedding distance reported by the matcher (lower is closer)
    #[serde(default, alias = "distancia", skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// The one frame chosen for submission, with what the detector saw in it
#[derive(Debug, Clone)]
pub struct Submission {
    /// JPEG-encoded frame
    pub jpeg: Vec<u8>,
    pub face: FaceBox,
    pub descriptor: Option<FaceDescriptor>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub captured_at: DateTime<Utc>,
}

/// Result of a completed lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Match(Identity),
    NotFound,
}

/// Backend that resolves a face to a patient.
///
/// Single shot: implementations do not retry. The session retries naturally
/// on the next qualifying tick once the cooldown has elapsed.
#[async_trait]
pub trait IdentityLookup: Send + Sync + 'static {
    async fn identify(&self, submission: &Submission) -> Result<LookupOutcome, LookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accepts_backend_field_names() {
        let json = r#"{"id": 42, "nome": "Maria Souza", "cpf": "123.456.789-00",
                       "data_nascimento": "1980-02-29", "distancia": 0.41}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.id, 42);
        assert_eq!(identity.name, "Maria Souza");
        assert_eq!(identity.document.as_deref(), Some("123.456.789-00"));
        assert_eq!(identity.birth_date, NaiveDate::from_ymd_opt(1980, 2, 29));
        assert_eq!(identity.distance, Some(0.41));
    }

    #[test]
    fn test_identity_optional_fields() {
        let identity: Identity = serde_json::from_str(r#"{"id": 1, "name": "Ana"}"#).unwrap();
        assert!(identity.document.is_none());
        assert!(identity.birth_date.is_none());

        let out = serde_json::to_value(&identity).unwrap();
        assert!(out.get("document").is_none());
    }
}
