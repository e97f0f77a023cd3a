//! Progress events published by a pipeline run

use tokio::sync::mpsc;

/// The stages a run moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Probing,
    Extracting,
    Enhancing,
    Segmenting,
    Transcribing,
    Assembling,
}

impl PipelineStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Probing => "probing media",
            Self::Extracting => "extracting audio",
            Self::Enhancing => "enhancing audio",
            Self::Segmenting => "splitting on silence",
            Self::Transcribing => "transcribing",
            Self::Assembling => "assembling transcript",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: PipelineStage },
    StageFinished { stage: PipelineStage },
    /// A segment finished, successfully or as recognized-nothing.
    SegmentTranscribed { index: usize, total: usize },
    /// A segment gave up after its retries.
    SegmentFailed { index: usize, error: String },
    /// A non-fatal problem the run continued through.
    Warning { message: String },
}

/// Cheap handle the pipeline publishes progress through. The disabled sink
/// drops every event, and a dropped receiver degrades to the same thing.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels_are_distinct() {
        let stages = [
            PipelineStage::Probing,
            PipelineStage::Extracting,
            PipelineStage::Enhancing,
            PipelineStage::Segmenting,
            PipelineStage::Transcribing,
            PipelineStage::Assembling,
        ];
        let mut labels: Vec<&str> = stages.iter().map(|s| s.label()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), stages.len());
    }

    #[tokio::test]
    async fn test_channel_delivers_events() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(PipelineEvent::StageStarted {
            stage: PipelineStage::Probing,
        });
        match rx.recv().await {
            Some(PipelineEvent::StageStarted { stage }) => {
                assert_eq!(stage, PipelineStage::Probing)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_disabled_sink_swallows_events() {
        ProgressSink::disabled().emit(PipelineEvent::SegmentTranscribed { index: 0, total: 1 });
    }

    #[test]
    fn test_emit_survives_dropped_receiver() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(PipelineEvent::StageFinished {
            stage: PipelineStage::Assembling,
        });
    }
}
