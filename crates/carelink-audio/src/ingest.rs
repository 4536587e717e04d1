use carelink_core::{AudioError, PcmBuffer, TokenProvider};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct IngestResponse {
    text: Option<String>,
    error: Option<String>,
}

/// Uploads a finished recording to the transcription endpoint as raw
/// little-endian PCM (no container) and returns the transcript.
pub struct IngestClient {
    client: reqwest::Client,
    endpoint: String,
    token: Arc<dyn TokenProvider>,
}

impl IngestClient {
    pub fn new(endpoint: impl Into<String>, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }

    pub async fn transcribe(&self, pcm: &PcmBuffer) -> Result<String, AudioError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(pcm.as_le_bytes());
        if let Some(token) = self.token.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AudioError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AudioError::Upload(format!("status {status}: {text}")));
        }

        let parsed: IngestResponse = response
            .json()
            .await
            .map_err(|e| AudioError::Upload(e.to_string()))?;

        if let Some(text) = parsed.text {
            Ok(text)
        } else if let Some(error) = parsed.error {
            Err(AudioError::Rejected(error))
        } else {
            Err(AudioError::Upload("empty ingestion response".to_string()))
        }
    }
}
