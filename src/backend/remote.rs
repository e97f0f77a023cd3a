//! Hosted speech recognition over HTTP
//!
//! Each segment is encoded as a small WAV and posted to the configured
//! endpoint as a multipart upload. The service answers with JSON carrying the
//! recognized text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{BackendError, TranscriptFragment, TranscriptionBackend};
use crate::audio::segment::Segment;
use crate::audio::wav;

/// Per-request timeout, applied by the HTTP client itself.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("reelscribe/", env!("CARGO_PKG_VERSION"));

pub struct RemoteRecognizerBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RemoteRecognizerBackend {
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BackendError::Service(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl TranscriptionBackend for RemoteRecognizerBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn transcribe(
        &self,
        segment: &Segment,
        language: Option<&str>,
    ) -> Result<TranscriptFragment, BackendError> {
        let wav_bytes = wav::encode_wav(segment.samples(), segment.sample_rate())
            .map_err(|e| BackendError::Service(format!("could not encode segment: {e:#}")))?;
        debug!(
            "Uploading segment {} ({} bytes) to {}",
            segment.index(),
            wav_bytes.len(),
            self.endpoint
        );

        let part = multipart::Part::bytes(wav_bytes)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| BackendError::Service(format!("could not build upload: {e}")))?;
        let mut form = multipart::Form::new().part("file", part);
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: RecognizerResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Service(format!("malformed recognizer response: {e}")))?;
        let text = parsed.text.trim();
        if text.is_empty() {
            return Err(BackendError::UnrecognizedSpeech);
        }
        Ok(TranscriptFragment::from_segment(segment, text.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RecognizerResponse {
    #[serde(default)]
    text: String,
}

fn classify_transport(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(REQUEST_TIMEOUT)
    } else {
        BackendError::Service(format!("request failed: {e}"))
    }
}

fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail: String = body.chars().take(200).collect();
    let detail = detail.trim();
    if detail.is_empty() {
        BackendError::Service(format!("recognizer returned {status}"))
    } else {
        BackendError::Service(format!("recognizer returned {status}: {detail}"))
    }
}
