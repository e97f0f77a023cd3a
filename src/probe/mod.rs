//! Media inspection via ffprobe
//!
//! Probing is advisory: when ffprobe is missing, times out, or rejects the
//! file, the probe still succeeds with unknown duration and the pipeline
//! re-checks limits after extraction instead. Hard errors are reserved for
//! input that is missing or unreadable outright.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on how long a probe may take.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What could be learned about a media file before decoding it.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Container-reported playback length, when the probe could read it.
    pub duration: Option<Duration>,
    /// On-disk size of the input.
    pub size_bytes: u64,
    /// Number of audio streams, when the probe could count them.
    pub audio_streams: Option<usize>,
    /// Container format name, e.g. "mov,mp4,m4a,3gp,3g2,mj2".
    pub container: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("Input file not found: {0}")]
    NotFound(PathBuf),

    #[error("Input is not readable media: {0}")]
    Unreadable(String),
}

/// Wrapper around the ffprobe binary.
pub struct MediaProber {
    ffprobe_path: String,
    timeout: Duration,
}

impl Default for MediaProber {
    fn default() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl MediaProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ffprobe binary instead of whatever is on PATH.
    pub fn with_ffprobe_path(mut self, path: impl Into<String>) -> Self {
        self.ffprobe_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Inspect a media file. See the module docs for when this degrades to an
    /// unknown-duration report instead of failing.
    pub async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        if !path.exists() {
            return Err(ProbeError::NotFound(path.to_path_buf()));
        }
        let size_bytes = fs_err::metadata(path)
            .map_err(|e| ProbeError::Unreadable(e.to_string()))?
            .len();
        let unknown = ProbeReport {
            size_bytes,
            ..Default::default()
        };

        let run = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                warn!(
                    "ffprobe timed out after {:?} on {}, continuing with unknown duration",
                    self.timeout,
                    path.display()
                );
                return Ok(unknown);
            }
            Ok(Err(e)) => {
                warn!("ffprobe could not be run ({e}), continuing with unknown duration");
                return Ok(unknown);
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            warn!(
                "ffprobe exited with {} on {}, continuing with unknown duration",
                output.status,
                path.display()
            );
            return Ok(unknown);
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let report = parse_probe_json(&raw, size_bytes).map_err(ProbeError::Unreadable)?;
        debug!(
            "Probed {}: duration={:?} size={}B audio_streams={:?}",
            path.display(),
            report.duration,
            report.size_bytes,
            report.audio_streams
        );
        Ok(report)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
}

fn parse_probe_json(raw: &str, size_bytes: u64) -> Result<ProbeReport, String> {
    let parsed: FfprobeOutput =
        serde_json::from_str(raw).map_err(|e| format!("unparseable ffprobe output: {e}"))?;
    let format = parsed
        .format
        .ok_or_else(|| "no recognizable container format".to_string())?;
    let duration = format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64);
    let audio_streams = Some(
        parsed
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some("audio"))
            .count(),
    );
    Ok(ProbeReport {
        duration,
        size_bytes,
        audio_streams,
        container: format.format_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_report() {
        let raw = r#"{
            "format": {"duration": "181.500000", "format_name": "mov,mp4,m4a,3gp,3g2,mj2"},
            "streams": [
                {"codec_type": "video"},
                {"codec_type": "audio"}
            ]
        }"#;
        let report = parse_probe_json(raw, 1024).unwrap();
        assert_eq!(report.duration, Some(Duration::from_secs_f64(181.5)));
        assert_eq!(report.size_bytes, 1024);
        assert_eq!(report.audio_streams, Some(1));
        assert_eq!(report.container.as_deref(), Some("mov,mp4,m4a,3gp,3g2,mj2"));
    }

    #[test]
    fn test_parse_missing_duration_reports_none() {
        let raw = r#"{"format": {"format_name": "wav"}, "streams": [{"codec_type": "audio"}]}"#;
        let report = parse_probe_json(raw, 10).unwrap();
        assert_eq!(report.duration, None);
        assert_eq!(report.audio_streams, Some(1));
    }

    #[test]
    fn test_parse_counts_only_audio_streams() {
        let raw = r#"{"format": {}, "streams": [
            {"codec_type": "video"},
            {"codec_type": "video"},
            {"codec_type": "subtitle"}
        ]}"#;
        let report = parse_probe_json(raw, 10).unwrap();
        assert_eq!(report.audio_streams, Some(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_probe_json("not json", 0).is_err());
        assert!(parse_probe_json(r#"{"streams": []}"#, 0).is_err());
    }

    #[test]
    fn test_parse_ignores_malformed_duration() {
        let raw = r#"{"format": {"duration": "N/A"}, "streams": []}"#;
        let report = parse_probe_json(raw, 10).unwrap();
        assert_eq!(report.duration, None);
    }

    #[tokio::test]
    async fn test_probe_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = MediaProber::new()
            .probe(&dir.path().join("missing.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_probe_survives_missing_ffprobe_binary() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("clip.mp4");
        std::fs::write(&media, b"not really a video").unwrap();

        let report = MediaProber::new()
            .with_ffprobe_path("/nonexistent/ffprobe-binary")
            .probe(&media)
            .await
            .unwrap();
        assert_eq!(report.duration, None);
        assert_eq!(report.size_bytes, 18);
    }
}
