//! Speech-to-text backends
//!
//! The pipeline talks to a [`TranscriptionBackend`] trait object, so local
//! whisper.cpp inference and the hosted recognizer API are interchangeable.

pub mod remote;
#[cfg(feature = "local-whisper")]
pub mod whisper;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::segment::Segment;
use crate::config::BackendConfig;

/// Transcribed text for one segment, with its position in the source clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub segment_index: usize,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl TranscriptFragment {
    pub fn from_segment(segment: &Segment, text: String) -> Self {
        let start_time = segment.start().as_secs_f64();
        Self {
            segment_index: segment.index(),
            text,
            start_time,
            end_time: start_time + segment.duration().as_secs_f64(),
        }
    }

    /// Placeholder for a segment in which no speech was recognized.
    pub fn empty(segment: &Segment) -> Self {
        Self::from_segment(segment, String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum BackendError {
    /// The segment contained no recognizable speech. Not a failure: the
    /// pipeline records an empty fragment and moves on.
    #[error("No recognizable speech in segment")]
    UnrecognizedSpeech,

    #[error("Speech service error: {0}")]
    Service(String),

    #[error("Model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("Transcription timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Whether retrying the same segment could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Timeout(_))
    }
}

/// A speech recognizer the pipeline can hand audio segments to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Backend name for logs and output metadata.
    fn name(&self) -> &'static str;

    /// Whether the pipeline should split audio on silence before calling
    /// [`Self::transcribe`]. Backends that window long audio themselves
    /// return false and receive the whole clip as a single segment.
    fn wants_segmentation(&self) -> bool {
        true
    }

    async fn transcribe(
        &self,
        segment: &Segment,
        language: Option<&str>,
    ) -> Result<TranscriptFragment, BackendError>;
}

/// Whisper model size tiers, smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Tiny,
    Base,
    #[default]
    Small,
    Medium,
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Base => "base",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// File name of the matching ggml model weights.
    pub fn ggml_file(&self) -> &'static str {
        match self {
            Self::Tiny => "ggml-tiny.bin",
            Self::Base => "ggml-base.bin",
            Self::Small => "ggml-small.bin",
            Self::Medium => "ggml-medium.bin",
            Self::Large => "ggml-large-v3.bin",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which recognizer implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionProvider {
    #[default]
    Local,
    Remote,
}

impl std::fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Builds the backend selected by the configuration.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(config: &BackendConfig) -> Result<Arc<dyn TranscriptionBackend>, BackendError> {
        match config.provider {
            TranscriptionProvider::Local => Self::create_local(config),
            TranscriptionProvider::Remote => Self::create_remote(config),
        }
    }

    #[cfg(feature = "local-whisper")]
    fn create_local(config: &BackendConfig) -> Result<Arc<dyn TranscriptionBackend>, BackendError> {
        let model_dir = config
            .model_dir
            .clone()
            .unwrap_or_else(crate::config::default_model_dir);
        let model_path = model_dir.join(config.model.ggml_file());
        let backend = whisper::LocalWhisperBackend::load(&model_path, config.vad_filter)?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "local-whisper"))]
    fn create_local(_config: &BackendConfig) -> Result<Arc<dyn TranscriptionBackend>, BackendError> {
        Err(BackendError::ModelLoad(
            "this build does not include local whisper support; \
             rebuild with the local-whisper feature or switch to the remote backend"
                .to_string(),
        ))
    }

    fn create_remote(config: &BackendConfig) -> Result<Arc<dyn TranscriptionBackend>, BackendError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            BackendError::Service(
                "the remote backend needs backend.endpoint set in the config".to_string(),
            )
        })?;
        let api_key = std::env::var(&config.api_key_env).ok();
        let backend = remote::RemoteRecognizerBackend::new(endpoint, api_key)?;
        Ok(Arc::new(backend))
    }
}
