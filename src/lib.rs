//! Reelscribe - A Rust CLI tool for turning short social video into speech transcripts
//!
//! This library fetches Instagram reels (or local media files), extracts and cleans up
//! the audio track, and transcribes the speech with a local whisper.cpp model or a
//! hosted recognition API.

pub mod audio;
pub mod backend;
pub mod cli;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod source;
pub mod utils;

pub use backend::{TranscriptFragment, TranscriptionBackend};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use pipeline::{PipelineOrchestrator, PipelineOutput, Transcript};
pub use source::{FetchedMedia, SourceFetcher};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
