use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::enhance::EnhanceOptions;
use crate::backend::{ModelTier, TranscriptionProvider};
use crate::pipeline::PipelineLimits;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Transcription backend selection
    pub backend: BackendConfig,

    /// Input limits
    pub limits: LimitsConfig,

    /// Audio enhancement toggles
    pub enhance: EnhanceOptions,

    /// Pipeline behavior
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Which backend runs the speech recognition
    pub provider: TranscriptionProvider,

    /// Whisper model tier for the local backend
    pub model: ModelTier,

    /// Directory holding ggml model files; defaults to the user data dir
    pub model_dir: Option<PathBuf>,

    /// Endpoint URL for the remote backend
    pub endpoint: Option<String>,

    /// Environment variable read for the remote API key
    pub api_key_env: String,

    /// Skip segments with no audible speech before invoking the model
    pub vad_filter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest media we accept, in seconds
    pub max_duration_secs: u64,

    /// Largest media file we accept, in megabytes
    pub max_file_size_mb: u64,

    /// Language hint passed to the backend; autodetect when unset
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent segment transcriptions
    pub segment_workers: usize,

    /// Per-segment transcription timeout, in seconds
    pub segment_timeout_secs: u64,

    /// Keep downloaded media instead of deleting it after the run
    pub keep_media: bool,

    /// Override the ffmpeg binary
    pub ffmpeg_path: Option<String>,

    /// Override the ffprobe binary
    pub ffprobe_path: Option<String>,

    /// Override the yt-dlp binary
    pub yt_dlp_path: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: TranscriptionProvider::Local,
            model: ModelTier::default(),
            model_dir: None,
            endpoint: None,
            api_key_env: "REELSCRIBE_API_KEY".to_string(),
            vad_filter: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 30 * 60,
            max_file_size_mb: 200,
            language: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_workers: 1,
            segment_timeout_secs: 120,
            keep_media: false,
            ffmpeg_path: None,
            ffprobe_path: None,
            yt_dlp_path: None,
        }
    }
}

/// Where ggml models live unless the config says otherwise.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelscribe")
        .join("models")
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Load and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Write the config as YAML to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("reelscribe").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.limits.max_duration_secs == 0 {
            anyhow::bail!("limits.max_duration_secs must be greater than zero");
        }

        if self.limits.max_file_size_mb == 0 {
            anyhow::bail!("limits.max_file_size_mb must be greater than zero");
        }

        if self.pipeline.segment_workers == 0 {
            anyhow::bail!("pipeline.segment_workers must be at least 1");
        }

        if self.pipeline.segment_timeout_secs == 0 {
            anyhow::bail!("pipeline.segment_timeout_secs must be greater than zero");
        }

        Ok(())
    }

    /// Convert the configured limits into pipeline limits.
    pub fn to_limits(&self) -> PipelineLimits {
        PipelineLimits {
            max_duration: Duration::from_secs(self.limits.max_duration_secs),
            max_file_size: self.limits.max_file_size_mb * 1024 * 1024,
            language: self.limits.language.clone(),
            segment_workers: self.pipeline.segment_workers,
            segment_timeout: Duration::from_secs(self.pipeline.segment_timeout_secs),
        }
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Backend: {}", self.backend.provider);
        println!("  Model: {}", self.backend.model.as_str());
        if let Some(endpoint) = &self.backend.endpoint {
            println!("  Endpoint: {}", endpoint);
        }
        println!("  Max Duration: {}s", self.limits.max_duration_secs);
        println!("  Max File Size: {} MB", self.limits.max_file_size_mb);
        println!(
            "  Language: {}",
            self.limits.language.as_deref().unwrap_or("auto")
        );
        println!("  Normalize: {}", self.enhance.normalize);
        println!("  Denoise: {}", self.enhance.denoise);
        println!("  Segment Workers: {}", self.pipeline.segment_workers);
        println!("  Keep Media: {}", self.pipeline.keep_media);
    }
}
