//! Rendering pipeline output as text or JSON

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::backend::TranscriptFragment;
use crate::cli::OutputFormat;
use crate::pipeline::{PipelineOutput, RunMetadata, SegmentFailure, Transcript};

#[derive(Serialize)]
struct JsonReport<'a> {
    transcript: Option<&'a str>,
    no_speech_detected: bool,
    fragments: &'a [TranscriptFragment],
    failures: &'a [SegmentFailure],
    metadata: &'a RunMetadata,
}

/// Render the result in the requested format.
pub fn render(result: &PipelineOutput, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_as_text(result)),
        OutputFormat::Json => format_as_json(result),
    }
}

/// Plain transcript text; a placeholder line when nothing was recognized.
pub fn format_as_text(result: &PipelineOutput) -> String {
    result.transcript.to_string()
}

/// Full report with per-segment fragments and run metadata.
pub fn format_as_json(result: &PipelineOutput) -> Result<String> {
    let report = JsonReport {
        transcript: result.transcript.as_text(),
        no_speech_detected: matches!(result.transcript, Transcript::NoSpeechDetected),
        fragments: &result.fragments,
        failures: &result.failures,
        metadata: &result.metadata,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Save transcription result to file
pub async fn save_to_file(
    result: &PipelineOutput,
    path: &Path,
    format: OutputFormat,
) -> Result<()> {
    use anyhow::Context;

    let mut content = render(result, format)?;
    if !content.ends_with('\n') {
        content.push('\n');
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Print transcription result to console
pub fn print_to_console(result: &PipelineOutput, format: OutputFormat) -> Result<()> {
    println!("{}", render(result, format)?);
    Ok(())
}
