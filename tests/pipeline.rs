//! End-to-end pipeline runs against stand-in ffprobe/ffmpeg binaries.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use reelscribe::audio::enhance::EnhanceOptions;
use reelscribe::audio::extract::AudioExtractor;
use reelscribe::audio::segment::Segment;
use reelscribe::audio::{wav, Waveform};
use reelscribe::backend::{BackendError, TranscriptFragment, TranscriptionBackend};
use reelscribe::pipeline::{
    ErrorKind, PipelineEvent, PipelineLimits, PipelineOrchestrator, PipelineStage, ProgressSink,
    SourceMedia, Transcript,
};
use reelscribe::probe::MediaProber;

const FFPROBE_OK: &str = r#"#!/bin/sh
echo '{"format":{"duration":"5.0","format_name":"mov,mp4"},"streams":[{"codec_type":"video"},{"codec_type":"audio"}]}'
"#;

const FFPROBE_LONG: &str = r#"#!/bin/sh
echo '{"format":{"duration":"1801.0","format_name":"mov,mp4"},"streams":[{"codec_type":"audio"}]}'
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs_err::write(&path, body).unwrap();
    let mut perms = fs_err::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs_err::set_permissions(&path, perms).unwrap();
    path
}

/// An ffmpeg stand-in that copies a premade WAV to its output argument,
/// touching `marker` so tests can tell whether extraction ran.
fn fake_ffmpeg(dir: &Path, premade_wav: &Path, marker: &Path) -> PathBuf {
    let body = format!(
        "#!/bin/sh\ntouch {}\nfor last; do :; done\ncp {} \"$last\"\n",
        marker.display(),
        premade_wav.display()
    );
    write_script(dir, "ffmpeg", &body)
}

/// One second each of tone, silence, tone, silence, tone. The silence-based
/// segmenter splits this into three segments.
fn three_part_waveform() -> Waveform {
    let tone: Vec<i16> = (0..16_000)
        .map(|i| {
            let t = i as f64 / 16_000.0;
            (0.5 * (std::f64::consts::TAU * 440.0 * t).sin() * 32767.0) as i16
        })
        .collect();
    let silence = vec![0i16; 16_000];
    let mut samples = Vec::new();
    for part in [&tone, &silence, &tone, &silence, &tone] {
        samples.extend_from_slice(part);
    }
    Waveform::new(samples, 16_000, 1)
}

fn silent_waveform() -> Waveform {
    // Ten seconds of digital silence.
    Waveform::new(vec![0i16; 160_000], 16_000, 1)
}

/// Backend scripted per segment index: an optional delay, then either a
/// fixed text or an UnrecognizedSpeech answer for empty entries.
struct ScriptedBackend {
    delays_ms: Vec<u64>,
    texts: Vec<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(delays_ms: Vec<u64>, texts: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            delays_ms,
            texts,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(
        &self,
        segment: &Segment,
        _language: Option<&str>,
    ) -> Result<TranscriptFragment, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = segment.index();
        if let Some(ms) = self.delays_ms.get(index) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        match self.texts.get(index) {
            Some(text) if !text.is_empty() => {
                Ok(TranscriptFragment::from_segment(segment, text.to_string()))
            }
            _ => Err(BackendError::UnrecognizedSpeech),
        }
    }
}

struct Setup {
    tools: TempDir,
    media: PathBuf,
    marker: PathBuf,
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

fn setup(ffprobe_script: &str, decoded: &Waveform) -> Setup {
    let tools = TempDir::new().unwrap();
    let premade = tools.path().join("decoded.wav");
    wav::write_wav(&premade, decoded).unwrap();

    let marker = tools.path().join("ffmpeg_ran");
    let ffprobe = write_script(tools.path(), "ffprobe", ffprobe_script);
    let ffmpeg = fake_ffmpeg(tools.path(), &premade, &marker);

    let media = tools.path().join("clip.mp4");
    fs_err::write(&media, b"pretend this is a reel").unwrap();

    Setup {
        tools,
        media,
        marker,
        ffprobe,
        ffmpeg,
    }
}

fn orchestrator(
    setup: &Setup,
    limits: PipelineLimits,
    backend: Arc<dyn TranscriptionBackend>,
    events: ProgressSink,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(limits, EnhanceOptions::default(), backend, events)
        .unwrap()
        .with_prober(
            MediaProber::new().with_ffprobe_path(setup.ffprobe.to_string_lossy().into_owned()),
        )
        .with_extractor(
            AudioExtractor::new().with_ffmpeg_path(setup.ffmpeg.to_string_lossy().into_owned()),
        )
}

#[tokio::test]
async fn transcribes_segments_and_orders_fragments() {
    let setup = self::setup(FFPROBE_OK, &three_part_waveform());

    // Slowest segment first, so with three workers the completion order
    // is the reverse of the segment order.
    let backend = ScriptedBackend::new(vec![300, 150, 0], vec!["alpha", "beta", "gamma"]);
    let limits = PipelineLimits {
        segment_workers: 3,
        ..Default::default()
    };
    let (events, mut rx) = ProgressSink::channel();
    let orch = orchestrator(&setup, limits, backend.clone(), events);

    let output = orch
        .run(SourceMedia::borrowed(setup.media.clone()))
        .await
        .unwrap();

    assert_eq!(output.transcript.as_text(), Some("alpha beta gamma"));
    assert!(output.failures.is_empty());
    assert_eq!(output.metadata.segment_count, 3);
    assert_eq!(output.metadata.backend, "scripted");
    assert!((output.metadata.media_duration - 5.0).abs() < 0.01);
    assert_eq!(
        output.metadata.media_size,
        fs_err::metadata(&setup.media).unwrap().len()
    );
    assert_eq!(backend.calls(), 3);

    let indices: Vec<usize> = output.fragments.iter().map(|f| f.segment_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    // Borrowed media survives cleanup.
    assert!(setup.media.exists());
    assert!(setup.marker.exists());

    // The event stream starts with probing and ends with assembly.
    drop(orch);
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(PipelineEvent::StageStarted {
            stage: PipelineStage::Probing
        })
    ));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::StageFinished {
            stage: PipelineStage::Assembling
        })
    ));
    let transcribed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::SegmentTranscribed { .. }))
        .count();
    assert_eq!(transcribed, 3);
}

#[tokio::test]
async fn rejects_media_longer_than_the_duration_limit() {
    let setup = self::setup(FFPROBE_LONG, &three_part_waveform());

    let backend = ScriptedBackend::new(vec![], vec!["never used"]);
    let orch = orchestrator(
        &setup,
        PipelineLimits::default(),
        backend.clone(),
        ProgressSink::disabled(),
    );

    let workdir = orch.workdir().to_path_buf();
    let err = orch
        .run(SourceMedia::borrowed(setup.media.clone()))
        .await
        .unwrap_err();

    assert_eq!(err.stage, PipelineStage::Probing);
    assert!(matches!(err.kind, ErrorKind::InputTooLong { .. }));
    // Rejected before extraction: ffmpeg never ran, backend never called.
    assert!(!setup.marker.exists());
    assert_eq!(backend.calls(), 0);
    // Cleanup runs on failure too: workdir swept, then removed on drop.
    assert_eq!(fs_err::read_dir(&workdir).unwrap().count(), 0);
    drop(orch);
    assert!(!workdir.exists());
}

#[tokio::test]
async fn silent_clip_reports_no_speech() {
    let setup = self::setup(FFPROBE_OK, &silent_waveform());

    // Empty script entries answer UnrecognizedSpeech.
    let backend = ScriptedBackend::new(vec![], vec![]);
    let orch = orchestrator(
        &setup,
        PipelineLimits::default(),
        backend.clone(),
        ProgressSink::disabled(),
    );

    let output = orch
        .run(SourceMedia::borrowed(setup.media.clone()))
        .await
        .unwrap();

    assert_eq!(output.transcript, Transcript::NoSpeechDetected);
    assert!(output.fragments.iter().all(|f| f.is_empty()));
    assert!(output.failures.is_empty());
    // UnrecognizedSpeech is not an error and must not be retried.
    assert_eq!(backend.calls(), output.fragments.len());
}

#[tokio::test]
async fn times_out_a_stuck_segment_and_keeps_the_rest() {
    let setup = self::setup(FFPROBE_OK, &three_part_waveform());

    // Segment 1 sleeps far past the timeout on every attempt.
    let backend = ScriptedBackend::new(vec![0, 5_000, 0], vec!["alpha", "beta", "gamma"]);
    let limits = PipelineLimits {
        segment_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let orch = orchestrator(&setup, limits, backend.clone(), ProgressSink::disabled());

    let output = orch
        .run(SourceMedia::borrowed(setup.media.clone()))
        .await
        .unwrap();

    assert_eq!(output.transcript.as_text(), Some("alpha gamma"));
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].index, 1);
    assert!(output.failures[0].error.contains("timed out"));
    // Two healthy segments, plus three timed-out attempts on the stuck one.
    assert_eq!(backend.calls(), 5);
}

#[tokio::test]
async fn cleanup_removes_owned_media_and_workdir_contents() {
    let setup = self::setup(FFPROBE_OK, &three_part_waveform());

    let backend = ScriptedBackend::new(vec![0, 0, 0], vec!["a", "b", "c"]);
    let orch = orchestrator(
        &setup,
        PipelineLimits::default(),
        backend,
        ProgressSink::disabled(),
    );

    // Drop the media inside the workdir, the way a download lands there.
    let media = orch.workdir().join("reel.mp4");
    fs_err::write(&media, b"downloaded bytes").unwrap();

    let output = orch.run(SourceMedia::owned(media.clone())).await.unwrap();
    assert_eq!(output.transcript.as_text(), Some("a b c"));

    assert!(!media.exists());
    let leftovers = fs_err::read_dir(orch.workdir()).unwrap().count();
    assert_eq!(leftovers, 0);

    let workdir = orch.workdir().to_path_buf();
    drop(orch);
    assert!(!workdir.exists());

    // Keep the tool scripts alive to the end of the test.
    drop(setup.tools);
}
