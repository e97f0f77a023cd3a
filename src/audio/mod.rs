//! Decoded audio model and sample math shared by the whole pipeline

pub mod enhance;
pub mod extract;
pub mod segment;
pub mod wav;

use std::time::Duration;

/// Sample rate every pipeline stage works at
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Channel count every pipeline stage works at
pub const TARGET_CHANNELS: u16 = 1;

/// Decoded PCM audio: interleaved 16-bit samples plus the format they carry.
///
/// The extractor produces waveforms already coerced to 16 kHz mono, but the
/// type keeps its real rate and channel count so later stages can verify (and
/// repair) the format instead of trusting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl Waveform {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True when the waveform already matches the pipeline's working format.
    pub fn is_canonical(&self) -> bool {
        self.sample_rate == TARGET_SAMPLE_RATE && self.channels == TARGET_CHANNELS
    }

    /// Playback length of the buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Average signal level of the whole buffer in dBFS.
    pub fn rms_dbfs(&self) -> f32 {
        rms_dbfs(&self.samples)
    }

    /// Loudest instantaneous level in dBFS.
    pub fn peak_dbfs(&self) -> f32 {
        peak_dbfs(&self.samples)
    }

    /// Copy of the samples as normalized f32 in [-1.0, 1.0].
    pub fn to_f32(&self) -> Vec<f32> {
        samples_to_f32(&self.samples)
    }
}

/// Root-mean-square level of a sample block in dBFS. Empty or all-zero
/// input reports negative infinity.
pub fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        return f32::NEG_INFINITY;
    }
    (20.0 * (rms / i16::MAX as f64).log10()) as f32
}

/// Peak level of a sample block in dBFS.
pub fn peak_dbfs(samples: &[i16]) -> f32 {
    let peak = samples
        .iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    if peak == 0 {
        return f32::NEG_INFINITY;
    }
    (20.0 * (peak as f64 / i16::MAX as f64).log10()) as f32
}

pub fn samples_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn f32_to_samples(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Average interleaved channels down to mono.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler. Good enough for speech; the extractor
/// normally hands us audio already at the target rate and this only runs
/// when a decoder ignored the requested format.
pub fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = (input.len() as f64 * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 / ratio;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f64;
        let a = input.get(idx).copied().unwrap_or(0) as f64;
        let b = input.get(idx + 1).copied().unwrap_or_else(|| {
            input.last().copied().unwrap_or(0)
        }) as f64;
        out.push((a + (b - a) * frac).round() as i16);
    }
    out
}
