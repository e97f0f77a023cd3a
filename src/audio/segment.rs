//! Silence-based splitting of a waveform into transcription units

use std::time::Duration;

use super::{rms_dbfs, samples_to_f32, Waveform};

/// Silence must last at least this long to count as a split point.
const MIN_SILENCE: Duration = Duration::from_millis(500);

/// How much surrounding silence each segment keeps, so words are not cut off
/// at the boundaries.
const KEEP_SILENCE: Duration = Duration::from_millis(500);

/// Frames quieter than the clip's average level by this margin are silence.
const THRESHOLD_MARGIN_DB: f32 = 14.0;

/// Analysis frame length for the level scan.
const FRAME: Duration = Duration::from_millis(10);

/// A contiguous slice of speech with its position in the source clip.
#[derive(Debug, Clone)]
pub struct Segment {
    index: usize,
    start: Duration,
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Segment {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset of the segment's first sample within the original clip.
    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn to_f32(&self) -> Vec<f32> {
        samples_to_f32(&self.samples)
    }
}

/// Splits mono audio on sustained silence.
///
/// The silence threshold adapts to the clip: a frame is silent when its RMS
/// level falls more than 14 dB below the clip-wide average. A clip with no
/// qualifying silence (or nothing but silence) comes back as one segment, so
/// non-empty input never produces zero segments.
#[derive(Debug, Default)]
pub struct Segmenter;

impl Segmenter {
    pub fn new() -> Self {
        Self
    }

    pub fn segment(&self, waveform: Waveform) -> Vec<Segment> {
        let sample_rate = waveform.sample_rate();
        if waveform.is_empty() || sample_rate == 0 {
            return Vec::new();
        }

        let frame_len = samples_for(FRAME, sample_rate);
        if frame_len == 0 {
            return Self::whole(waveform);
        }

        let samples = waveform.into_samples();
        let threshold = rms_dbfs(&samples) - THRESHOLD_MARGIN_DB;
        let silent_frames: Vec<bool> = samples
            .chunks(frame_len)
            .map(|frame| rms_dbfs(frame) < threshold)
            .collect();

        let min_frames = (MIN_SILENCE.as_millis() / FRAME.as_millis()).max(1) as usize;
        let silent_runs = find_runs(&silent_frames, min_frames);

        let total = samples.len();
        let mut voiced: Vec<(usize, usize)> = Vec::new();
        let mut cursor = 0usize;
        for &(frame_start, frame_end) in &silent_runs {
            let run_start = (frame_start * frame_len).min(total);
            let run_end = (frame_end * frame_len).min(total);
            if run_start > cursor {
                voiced.push((cursor, run_start));
            }
            cursor = cursor.max(run_end);
        }
        if cursor < total {
            voiced.push((cursor, total));
        }
        if voiced.is_empty() {
            // All silence: hand the whole clip to the backend and let it
            // report the absence of speech.
            return Self::whole(Waveform::new(samples, sample_rate, 1));
        }

        let pad = samples_for(KEEP_SILENCE, sample_rate);
        let mut padded: Vec<(usize, usize)> = voiced
            .iter()
            .map(|&(start, end)| (start.saturating_sub(pad), (end + pad).min(total)))
            .collect();
        // Where two padded segments would overlap inside a short silence,
        // split the gap down the middle.
        for i in 1..padded.len() {
            if padded[i].0 < padded[i - 1].1 {
                let mid = (voiced[i - 1].1 + voiced[i].0) / 2;
                padded[i - 1].1 = padded[i - 1].1.min(mid);
                padded[i].0 = padded[i].0.max(mid);
            }
        }

        padded
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| Segment {
                index,
                start: Duration::from_secs_f64(start as f64 / sample_rate as f64),
                samples: samples[start..end].to_vec(),
                sample_rate,
            })
            .collect()
    }

    /// Wrap an entire waveform as a single segment, for backends that handle
    /// long audio themselves.
    pub fn whole(waveform: Waveform) -> Vec<Segment> {
        if waveform.is_empty() {
            return Vec::new();
        }
        let sample_rate = waveform.sample_rate();
        vec![Segment {
            index: 0,
            start: Duration::ZERO,
            samples: waveform.into_samples(),
            sample_rate,
        }]
    }
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (sample_rate as u128 * duration.as_millis() / 1000) as usize
}

/// Maximal runs of `true` at least `min_len` long, as [start, end) indices.
fn find_runs(flags: &[bool], min_len: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &flag) in flags.iter().enumerate() {
        match (flag, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_len {
                    runs.push((start, i));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if flags.len() - start >= min_len {
            runs.push((start, flags.len()));
        }
    }
    runs
}
