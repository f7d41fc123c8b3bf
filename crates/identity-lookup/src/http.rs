//! Clinic backend recognition client

use async_trait::async_trait;
use capture_session::{Identity, IdentityLookup, LookupError, LookupOutcome, Submission};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::config::LookupConfig;

/// Body of the recognition endpoint, for every status it answers with
#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    status: String,
    #[serde(default)]
    paciente: Option<Identity>,
    #[serde(default)]
    distancia: Option<f32>,
    #[serde(default)]
    message: Option<String>,
}

/// Posts the captured frame as `multipart/form-data` and maps the
/// backend's answer onto a lookup outcome. One request per call, no retry.
pub struct HttpLookupClient {
    client: reqwest::Client,
    url: String,
}

impl HttpLookupClient {
    pub fn new(config: &LookupConfig) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: config.identify_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IdentityLookup for HttpLookupClient {
    async fn identify(&self, submission: &Submission) -> Result<LookupOutcome, LookupError> {
        let image = Part::bytes(submission.jpeg.clone())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| LookupError::Network(e.to_string()))?;
        let form = Form::new().part("image", image);

        debug!("POST {} ({} bytes)", self.url, submission.jpeg.len());
        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;
        interpret(status, &body)
    }
}

fn interpret(status: StatusCode, body: &[u8]) -> Result<LookupOutcome, LookupError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(LookupOutcome::NotFound);
    }

    let parsed = serde_json::from_slice::<RecognitionResponse>(body);
    if !status.is_success() {
        let message = parsed
            .ok()
            .and_then(|r| r.message)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        return Err(LookupError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let response = parsed.map_err(|e| LookupError::MalformedResponse(e.to_string()))?;
    match response.status.as_str() {
        "success" => {
            let mut identity = response.paciente.ok_or_else(|| {
                LookupError::MalformedResponse("success without paciente".to_string())
            })?;
            if response.distancia.is_some() {
                identity.distance = response.distancia;
            }
            Ok(LookupOutcome::Match(identity))
        }
        "not_found" => Ok(LookupOutcome::NotFound),
        "error" => Err(LookupError::Status {
            status: status.as_u16(),
            message: response.message.unwrap_or_default(),
        }),
        other => Err(LookupError::MalformedResponse(format!(
            "unknown status \"{}\"",
            other
        ))),
    }
}
