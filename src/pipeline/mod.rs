//! The media-to-transcript pipeline
//!
//! Ordering, limits, retries and cleanup live here. The media work itself is
//! delegated: probing to [`crate::probe`], decoding and segmentation to
//! [`crate::audio`], and speech recognition to [`crate::backend`].

pub mod events;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::audio::enhance::{AudioEnhancer, EnhanceOptions};
use crate::audio::extract::{AudioExtractor, ExtractError};
use crate::audio::segment::{Segment, Segmenter};
use crate::audio::Waveform;
use crate::backend::{BackendError, TranscriptFragment, TranscriptionBackend};
use crate::probe::{MediaProber, ProbeError, ProbeReport};
use crate::utils::sanitize_filename;
use crate::Result;

pub use events::{PipelineEvent, PipelineStage, ProgressSink};

/// Retries for a segment that failed with a retryable error, on top of the
/// first attempt.
const SEGMENT_RETRIES: usize = 2;

/// Limits and knobs for one run.
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    /// Longest media the pipeline accepts.
    pub max_duration: Duration,
    /// Largest input file the pipeline accepts, in bytes.
    pub max_file_size: u64,
    /// Language hint forwarded to the backend; None lets it autodetect.
    pub language: Option<String>,
    /// How many segments may be in flight at once.
    pub segment_workers: usize,
    /// Deadline for a single transcription attempt.
    pub segment_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(30 * 60),
            max_file_size: 200 * 1024 * 1024,
            language: None,
            segment_workers: 1,
            segment_timeout: Duration::from_secs(120),
        }
    }
}

/// What went wrong, independent of where.
#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("Input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Input file is {size} bytes, over the {limit} byte limit")]
    InputTooLarge { size: u64, limit: u64 },

    #[error("Input runs {}s, over the {}s limit", .duration.as_secs(), .limit.as_secs())]
    InputTooLong { duration: Duration, limit: Duration },

    #[error("Input has no audio track")]
    NoAudioTrack,

    #[error("Could not decode input: {0}")]
    Decode(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("Speech service error: {0}")]
    Service(String),
}

impl From<ProbeError> for ErrorKind {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::NotFound(path) => Self::NotFound(path),
            ProbeError::Unreadable(message) => Self::Decode(message),
        }
    }
}

impl From<ExtractError> for ErrorKind {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::NoAudioTrack => Self::NoAudioTrack,
            ExtractError::Decode(message) => Self::Decode(message),
            ExtractError::Timeout(duration) => Self::Timeout(duration),
        }
    }
}

/// A pipeline failure, tagged with the stage that raised it.
#[derive(thiserror::Error, Debug)]
#[error("{} failed: {kind}", .stage.label())]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub kind: ErrorKind,
}

/// Assembled result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Text(String),
    /// Every segment came back without recognizable speech.
    NoSpeechDetected,
}

impl Transcript {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::NoSpeechDetected => None,
        }
    }
}

impl std::fmt::Display for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::NoSpeechDetected => f.write_str("[no speech detected]"),
        }
    }
}

/// A segment that gave up after its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub backend: String,
    pub language: Option<String>,
    pub segment_count: usize,
    /// Decoded audio length in seconds.
    pub media_duration: f64,
    /// On-disk size of the source media in bytes.
    pub media_size: u64,
    /// Wall-clock processing time in seconds.
    pub processing_duration: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub transcript: Transcript,
    pub fragments: Vec<TranscriptFragment>,
    /// Non-empty when the transcript is partial.
    pub failures: Vec<SegmentFailure>,
    pub metadata: RunMetadata,
}

/// What happens to the media file when the run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// The pipeline owns the file and deletes it during cleanup.
    Delete,
    /// The caller owns the file; the pipeline never touches it.
    Keep,
}

/// A media file handed to the pipeline, with its cleanup policy.
#[derive(Debug, Clone)]
pub struct SourceMedia {
    path: PathBuf,
    display_name: String,
    retention: Retention,
}

impl SourceMedia {
    /// Media the pipeline owns, e.g. a file downloaded into its workdir.
    pub fn owned(path: PathBuf) -> Self {
        let display_name = name_of(&path);
        Self {
            path,
            display_name,
            retention: Retention::Delete,
        }
    }

    /// Caller-owned media, e.g. a local file named on the command line.
    pub fn borrowed(path: PathBuf) -> Self {
        let display_name = name_of(&path);
        Self {
            path,
            display_name,
            retention: Retention::Keep,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

enum SegmentOutcome {
    Fragment(TranscriptFragment),
    Failed(SegmentFailure),
    Fatal(ErrorKind),
}

/// Runs the fixed stage sequence probe, extract, enhance, segment,
/// transcribe, assemble over one media file.
///
/// All intermediate artifacts live in a private temp directory that is
/// emptied after every run, success or failure, and removed when the
/// orchestrator is dropped.
pub struct PipelineOrchestrator {
    limits: PipelineLimits,
    enhancer: AudioEnhancer,
    backend: Arc<dyn TranscriptionBackend>,
    prober: MediaProber,
    extractor: AudioExtractor,
    segmenter: Segmenter,
    events: ProgressSink,
    workdir: TempDir,
}

impl PipelineOrchestrator {
    pub fn new(
        limits: PipelineLimits,
        enhance_options: EnhanceOptions,
        backend: Arc<dyn TranscriptionBackend>,
        events: ProgressSink,
    ) -> Result<Self> {
        let workdir = TempDir::new().context("Failed to create pipeline working directory")?;
        debug!("Pipeline workdir: {}", workdir.path().display());
        Ok(Self {
            limits,
            enhancer: AudioEnhancer::new(enhance_options),
            backend,
            prober: MediaProber::new(),
            extractor: AudioExtractor::new(),
            segmenter: Segmenter::new(),
            events,
            workdir,
        })
    }

    /// Swap in a prober with a non-default ffprobe location or timeout.
    pub fn with_prober(mut self, prober: MediaProber) -> Self {
        self.prober = prober;
        self
    }

    /// Swap in an extractor with a non-default ffmpeg location or timeout.
    pub fn with_extractor(mut self, extractor: AudioExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Directory downloads and intermediate files should be placed in.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Transcribe one media file. Cleanup runs whether or not the pipeline
    /// succeeded; cleanup problems are logged and never override the result.
    pub async fn run(&self, media: SourceMedia) -> std::result::Result<PipelineOutput, PipelineError> {
        info!(
            "Transcribing {} with the {} backend",
            media.display_name(),
            self.backend.name()
        );
        let result = self.execute(&media).await;
        self.cleanup(&media);
        result
    }

    async fn execute(&self, media: &SourceMedia) -> std::result::Result<PipelineOutput, PipelineError> {
        let started = Instant::now();

        let report = self.stage_probe(media).await?;
        let waveform = self.stage_extract(media, &report).await?;
        let waveform = self.stage_enhance(waveform);
        let audio_duration = waveform.duration();

        let segments = self.stage_segment(waveform);
        let segment_count = segments.len();
        let (fragments, failures) = self.stage_transcribe(segments).await?;

        self.events.emit(PipelineEvent::StageStarted {
            stage: PipelineStage::Assembling,
        });
        let transcript = assemble(&fragments);
        if !failures.is_empty() {
            warn!(
                "{} of {segment_count} segments failed, transcript is partial",
                failures.len()
            );
        }
        let metadata = RunMetadata {
            backend: self.backend.name().to_string(),
            language: self.limits.language.clone(),
            segment_count,
            media_duration: audio_duration.as_secs_f64(),
            media_size: report.size_bytes,
            processing_duration: started.elapsed().as_secs_f64(),
            completed_at: Utc::now(),
        };
        self.events.emit(PipelineEvent::StageFinished {
            stage: PipelineStage::Assembling,
        });

        Ok(PipelineOutput {
            transcript,
            fragments,
            failures,
            metadata,
        })
    }

    async fn stage_probe(&self, media: &SourceMedia) -> std::result::Result<ProbeReport, PipelineError> {
        let stage = PipelineStage::Probing;
        self.events.emit(PipelineEvent::StageStarted { stage });
        let report = self
            .prober
            .probe(media.path())
            .await
            .map_err(|e| PipelineError { stage, kind: e.into() })?;
        enforce_limits(&report, &self.limits).map_err(|kind| PipelineError { stage, kind })?;
        if report.duration.is_none() {
            self.events.emit(PipelineEvent::Warning {
                message: "could not read the media duration, the limit applies to the decoded audio instead".to_string(),
            });
        }
        self.events.emit(PipelineEvent::StageFinished { stage });
        Ok(report)
    }

    async fn stage_extract(
        &self,
        media: &SourceMedia,
        report: &ProbeReport,
    ) -> std::result::Result<Waveform, PipelineError> {
        let stage = PipelineStage::Extracting;
        self.events.emit(PipelineEvent::StageStarted { stage });
        if report.audio_streams == Some(0) {
            return Err(PipelineError {
                stage,
                kind: ErrorKind::NoAudioTrack,
            });
        }

        let stem = media
            .path()
            .file_stem()
            .map(|s| sanitize_filename(&s.to_string_lossy()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "input".to_string());
        let wav_path = self.workdir.path().join(format!("{stem}_audio.wav"));

        let waveform = self
            .extractor
            .extract(media.path(), &wav_path)
            .await
            .map_err(|e| PipelineError { stage, kind: e.into() })?;

        // The probe may not have been able to read a duration; the limit
        // still applies, enforced on the decoded audio instead.
        if report.duration.is_none() && waveform.duration() > self.limits.max_duration {
            return Err(PipelineError {
                stage,
                kind: ErrorKind::InputTooLong {
                    duration: waveform.duration(),
                    limit: self.limits.max_duration,
                },
            });
        }

        self.events.emit(PipelineEvent::StageFinished { stage });
        Ok(waveform)
    }

    fn stage_enhance(&self, waveform: Waveform) -> Waveform {
        let announced = self.enhancer.options().any();
        if announced {
            self.events.emit(PipelineEvent::StageStarted {
                stage: PipelineStage::Enhancing,
            });
        }
        let out = self.enhancer.enhance(waveform);
        if announced {
            self.events.emit(PipelineEvent::StageFinished {
                stage: PipelineStage::Enhancing,
            });
        }
        out
    }

    fn stage_segment(&self, waveform: Waveform) -> Vec<Segment> {
        let stage = PipelineStage::Segmenting;
        self.events.emit(PipelineEvent::StageStarted { stage });
        let segments = if self.backend.wants_segmentation() {
            self.segmenter.segment(waveform)
        } else {
            Segmenter::whole(waveform)
        };
        debug!("Audio split into {} segment(s)", segments.len());
        self.events.emit(PipelineEvent::StageFinished { stage });
        segments
    }

    async fn stage_transcribe(
        &self,
        segments: Vec<Segment>,
    ) -> std::result::Result<(Vec<TranscriptFragment>, Vec<SegmentFailure>), PipelineError> {
        let stage = PipelineStage::Transcribing;
        self.events.emit(PipelineEvent::StageStarted { stage });

        let total = segments.len();
        let workers = self.limits.segment_workers.max(1);
        let mut in_flight = stream::iter(
            segments
                .into_iter()
                .map(|segment| self.transcribe_segment(segment, total)),
        )
        .buffer_unordered(workers);

        let mut fragments = Vec::with_capacity(total);
        let mut failures = Vec::new();
        while let Some(outcome) = in_flight.next().await {
            match outcome {
                SegmentOutcome::Fragment(fragment) => fragments.push(fragment),
                SegmentOutcome::Failed(failure) => failures.push(failure),
                // Dropping the stream cancels whatever was still in flight.
                SegmentOutcome::Fatal(kind) => return Err(PipelineError { stage, kind }),
            }
        }
        drop(in_flight);

        // Completion order is arbitrary under concurrency; the transcript
        // order must not be.
        fragments.sort_by_key(|f| f.segment_index);
        failures.sort_by_key(|f| f.index);

        self.events.emit(PipelineEvent::StageFinished { stage });
        Ok((fragments, failures))
    }

    async fn transcribe_segment(&self, segment: Segment, total: usize) -> SegmentOutcome {
        let index = segment.index();
        let language = self.limits.language.as_deref();
        let mut attempt = 0;
        loop {
            let call = self.backend.transcribe(&segment, language);
            let result = match tokio::time::timeout(self.limits.segment_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.limits.segment_timeout)),
            };
            match result {
                Ok(fragment) => {
                    self.events
                        .emit(PipelineEvent::SegmentTranscribed { index, total });
                    return SegmentOutcome::Fragment(fragment);
                }
                Err(BackendError::UnrecognizedSpeech) => {
                    debug!("No speech recognized in segment {index}");
                    self.events
                        .emit(PipelineEvent::SegmentTranscribed { index, total });
                    return SegmentOutcome::Fragment(TranscriptFragment::empty(&segment));
                }
                Err(BackendError::ModelLoad(message)) => {
                    return SegmentOutcome::Fatal(ErrorKind::ModelLoad(message));
                }
                Err(e) if e.is_retryable() && attempt < SEGMENT_RETRIES => {
                    attempt += 1;
                    warn!("Segment {index} attempt {attempt} failed ({e}), retrying");
                }
                Err(e) => {
                    warn!("Segment {index} failed permanently: {e}");
                    let failure = SegmentFailure {
                        index,
                        error: e.to_string(),
                    };
                    self.events.emit(PipelineEvent::SegmentFailed {
                        index,
                        error: failure.error.clone(),
                    });
                    return SegmentOutcome::Failed(failure);
                }
            }
        }
    }

    /// Remove the run's artifacts: the extracted WAV (and anything else in
    /// the workdir) plus the media file itself when the pipeline owns it.
    fn cleanup(&self, media: &SourceMedia) {
        if media.retention() == Retention::Delete && media.path().exists() {
            if let Err(e) = fs_err::remove_file(media.path()) {
                self.cleanup_failure(format!(
                    "could not remove {}: {e}",
                    media.path().display()
                ));
            }
        }
        let entries = match fs_err::read_dir(self.workdir.path()) {
            Ok(entries) => entries,
            Err(e) => {
                self.cleanup_failure(format!("could not scan workdir: {e}"));
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let removed = if path.is_dir() {
                fs_err::remove_dir_all(&path)
            } else {
                fs_err::remove_file(&path)
            };
            if let Err(e) = removed {
                self.cleanup_failure(format!("could not remove {}: {e}", path.display()));
            }
        }
    }

    fn cleanup_failure(&self, message: String) {
        warn!("Cleanup failure, {message}");
        self.events.emit(PipelineEvent::Warning {
            message: format!("cleanup failure, {message}"),
        });
    }
}

fn enforce_limits(report: &ProbeReport, limits: &PipelineLimits) -> std::result::Result<(), ErrorKind> {
    if report.size_bytes > limits.max_file_size {
        return Err(ErrorKind::InputTooLarge {
            size: report.size_bytes,
            limit: limits.max_file_size,
        });
    }
    if let Some(duration) = report.duration {
        if duration > limits.max_duration {
            return Err(ErrorKind::InputTooLong {
                duration,
                limit: limits.max_duration,
            });
        }
    }
    Ok(())
}

/// Join the non-empty fragments, in segment order, with single spaces.
fn assemble(fragments: &[TranscriptFragment]) -> Transcript {
    let mut ordered: Vec<&TranscriptFragment> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.segment_index);
    let parts: Vec<&str> = ordered
        .iter()
        .map(|f| f.text.trim())
        .filter(|text| !text.is_empty())
        .collect();
    if parts.is_empty() {
        Transcript::NoSpeechDetected
    } else {
        Transcript::Text(parts.join(" "))
    }
}
