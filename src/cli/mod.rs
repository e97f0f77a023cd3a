use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::backend::{ModelTier, TranscriptionProvider};

#[derive(Parser)]
#[command(
    name = "reelscribe",
    about = "Reelscribe - Turn Instagram reels and other short videos into transcripts",
    version,
    long_about = "A CLI tool for transcribing short social media videos. Downloads the media, extracts and cleans up the audio track, splits it on silence, and runs speech recognition either locally with whisper or against a remote service."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe a video URL or local media file
    Transcribe {
        /// URL or file path to transcribe (Instagram reel/post, direct media URL, or local audio/video file)
        #[arg(value_name = "URL_OR_FILE")]
        input: String,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Language hint for recognition (auto-detect if not specified)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,

        /// Transcription backend (overrides the config)
        #[arg(short, long, value_enum)]
        backend: Option<TranscriptionProvider>,

        /// Whisper model tier for the local backend
        #[arg(short, long, value_enum, env = "REELSCRIBE_MODEL")]
        model: Option<ModelTier>,

        /// Normalize audio loudness before recognition
        #[arg(long)]
        normalize: bool,

        /// Apply noise reduction before recognition
        #[arg(long)]
        denoise: bool,

        /// Longest media accepted, in seconds
        #[arg(long, value_name = "SECS")]
        max_duration: Option<u64>,

        /// Largest media accepted, in megabytes
        #[arg(long, value_name = "MB")]
        max_size: Option<u64>,

        /// Concurrent segment transcriptions
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Keep the downloaded media file after the run
        #[arg(long)]
        keep_media: bool,
    },

    /// Show the active configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List transcription backends and supported platforms
    Backends,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text transcript
    Text,
    /// JSON report with per-segment fragments and metadata
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
