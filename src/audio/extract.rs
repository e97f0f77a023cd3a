//! Audio track extraction via ffmpeg

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::enhance::coerce_canonical;
use super::{wav, Waveform, TARGET_SAMPLE_RATE};

/// Upper bound on a single ffmpeg run.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Input has no audio track")]
    NoAudioTrack,

    #[error("Audio decoding failed: {0}")]
    Decode(String),

    #[error("Audio extraction timed out after {0:?}")]
    Timeout(Duration),
}

/// Decodes the audio track of a media file to 16 kHz mono PCM.
///
/// The extractor writes exactly one artifact, the WAV file at the path the
/// caller supplies; deleting it afterwards is the caller's job.
pub struct AudioExtractor {
    ffmpeg_path: String,
    timeout: Duration,
}

impl Default for AudioExtractor {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            timeout: EXTRACT_TIMEOUT,
        }
    }
}

impl AudioExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ffmpeg binary instead of whatever is on PATH.
    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn extract(&self, source: &Path, wav_out: &Path) -> Result<Waveform, ExtractError> {
        debug!(
            "Extracting audio: {} -> {}",
            source.display(),
            wav_out.display()
        );
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(command_args(source, wav_out)).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(ExtractError::Timeout(self.timeout)),
            Ok(Err(e)) => {
                return Err(ExtractError::Decode(format!("ffmpeg could not be run: {e}")))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let waveform =
            wav::read_wav(wav_out).map_err(|e| ExtractError::Decode(format!("{e:#}")))?;
        if waveform.is_canonical() {
            Ok(waveform)
        } else {
            warn!(
                "Decoder returned {} Hz x{} audio despite the requested format, coercing",
                waveform.sample_rate(),
                waveform.channels()
            );
            Ok(coerce_canonical(waveform))
        }
    }
}

fn command_args(source: &Path, wav_out: &Path) -> Vec<OsString> {
    vec![
        OsString::from("-y"),
        OsString::from("-i"),
        source.as_os_str().to_os_string(),
        OsString::from("-vn"),
        OsString::from("-acodec"),
        OsString::from("pcm_s16le"),
        OsString::from("-ac"),
        OsString::from("1"),
        OsString::from("-ar"),
        OsString::from(TARGET_SAMPLE_RATE.to_string()),
        OsString::from("-f"),
        OsString::from("wav"),
        wav_out.as_os_str().to_os_string(),
    ]
}

/// Tell "this input has no audio" apart from every other decode failure.
fn classify_failure(stderr: &str) -> ExtractError {
    let lower = stderr.to_lowercase();
    if lower.contains("does not contain any stream") || lower.contains("matches no streams") {
        return ExtractError::NoAudioTrack;
    }
    let last_line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown ffmpeg failure");
    ExtractError::Decode(last_line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_request_canonical_wav() {
        let args = command_args(Path::new("in.mp4"), Path::new("out.wav"));
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "-y", "-i", "in.mp4", "-vn", "-acodec", "pcm_s16le", "-ac", "1", "-ar",
                "16000", "-f", "wav", "out.wav"
            ]
        );
    }

    #[test]
    fn test_classify_missing_audio_stream() {
        let stderr = "Output file #0 does not contain any stream";
        assert!(matches!(classify_failure(stderr), ExtractError::NoAudioTrack));

        let stderr = "Stream map '0:a' matches no streams.";
        assert!(matches!(classify_failure(stderr), ExtractError::NoAudioTrack));
    }

    #[test]
    fn test_classify_other_failures_keep_last_error_line() {
        let stderr = "ffmpeg version 6.0\nsome banner\nin.mp4: Invalid data found when processing input\n";
        match classify_failure(stderr) {
            ExtractError::Decode(msg) => {
                assert_eq!(msg, "in.mp4: Invalid data found when processing input")
            }
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extract_with_missing_binary_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AudioExtractor::new()
            .with_ffmpeg_path("/nonexistent/ffmpeg-binary")
            .extract(&dir.path().join("in.mp4"), &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        match err {
            ExtractError::Decode(msg) => assert!(msg.contains("could not be run")),
            other => panic!("expected Decode, got {other:?}"),
        }
    }
}
