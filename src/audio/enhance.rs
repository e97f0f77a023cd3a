//! Best-effort audio cleanup between extraction and segmentation
//!
//! Every step here is optional and fail-soft: a clip that defeats one of the
//! steps (too short, pure silence) passes through unchanged rather than
//! failing the run. With all options off the input comes back bit-identical.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{downmix_to_mono, f32_to_samples, resample_linear, Waveform};
use super::{TARGET_CHANNELS, TARGET_SAMPLE_RATE};

/// Which cleanup steps to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhanceOptions {
    /// Peak-normalize and compress dynamic range
    #[serde(default)]
    pub normalize: bool,
    /// Spectral noise gate
    #[serde(default)]
    pub denoise: bool,
}

impl EnhanceOptions {
    pub fn any(&self) -> bool {
        self.normalize || self.denoise
    }
}

/// Applies the configured cleanup steps and coerces the result to the
/// pipeline's working format (16 kHz mono).
pub struct AudioEnhancer {
    options: EnhanceOptions,
}

impl AudioEnhancer {
    pub fn new(options: EnhanceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> EnhanceOptions {
        self.options
    }

    /// Run the enabled steps in order: normalization, compression, noise
    /// reduction, format coercion. Never fails; steps that cannot run on the
    /// given clip are skipped.
    pub fn enhance(&self, waveform: Waveform) -> Waveform {
        let mut waveform = waveform;
        if self.options.any() && !waveform.is_empty() {
            let mut buf = waveform.to_f32();
            if self.options.normalize {
                normalize_peak(&mut buf);
                compress_dynamic_range(&mut buf, waveform.sample_rate());
            }
            if self.options.denoise {
                if waveform.channels() == TARGET_CHANNELS {
                    match spectral_gate(&buf) {
                        Some(clean) => buf = clean,
                        None => warn!("Skipping noise reduction: clip too short for spectral analysis"),
                    }
                } else {
                    warn!("Skipping noise reduction: input is not mono yet");
                }
            }
            waveform = Waveform::new(
                f32_to_samples(&buf),
                waveform.sample_rate(),
                waveform.channels(),
            );
        }
        coerce_canonical(waveform)
    }
}

/// Force a waveform into the 16 kHz mono working format. Canonical input is
/// returned untouched.
pub fn coerce_canonical(waveform: Waveform) -> Waveform {
    if waveform.is_canonical() {
        return waveform;
    }
    let sample_rate = waveform.sample_rate();
    let channels = waveform.channels();
    let mono = downmix_to_mono(waveform.samples(), channels);
    let resampled = resample_linear(&mono, sample_rate, TARGET_SAMPLE_RATE);
    Waveform::new(resampled, TARGET_SAMPLE_RATE, TARGET_CHANNELS)
}

/// Scale so the loudest sample sits 0.1 dB under full scale. Silence is left
/// alone.
fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
    if peak <= 0.0 {
        return;
    }
    let target = 10.0f32.powf(-0.1 / 20.0);
    let gain = target / peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Downward compressor with an attack/release envelope follower.
/// Threshold -20 dBFS, ratio 4:1.
fn compress_dynamic_range(samples: &mut [f32], sample_rate: u32) {
    const THRESHOLD_DB: f32 = -20.0;
    const RATIO: f32 = 4.0;
    const ATTACK_MS: f32 = 5.0;
    const RELEASE_MS: f32 = 50.0;

    if samples.is_empty() || sample_rate == 0 {
        return;
    }
    let attack = (-1.0 / (sample_rate as f32 * ATTACK_MS / 1000.0)).exp();
    let release = (-1.0 / (sample_rate as f32 * RELEASE_MS / 1000.0)).exp();
    let mut envelope = 0.0f32;
    for sample in samples.iter_mut() {
        let level = sample.abs();
        let coeff = if level > envelope { attack } else { release };
        envelope = coeff * envelope + (1.0 - coeff) * level;
        let envelope_db = 20.0 * envelope.max(1e-10).log10();
        if envelope_db > THRESHOLD_DB {
            let gain_db = (THRESHOLD_DB - envelope_db) * (1.0 - 1.0 / RATIO);
            *sample *= 10.0f32.powf(gain_db / 20.0);
        }
    }
}

const GATE_WINDOW: usize = 1024;
const GATE_HOP: usize = 256;

/// Stationary spectral noise gate. Estimates a per-bin noise floor from the
/// quietest analysis frames and attenuates bins that stay near it.
///
/// Returns `None` when the clip is too short for a meaningful estimate or the
/// arithmetic went non-finite; the caller keeps the unprocessed audio.
fn spectral_gate(samples: &[f32]) -> Option<Vec<f32>> {
    const GATE_RATIO: f32 = 2.5;
    const FLOOR_GAIN: f32 = 0.1;

    if samples.len() < GATE_WINDOW * 2 {
        return None;
    }
    if samples.iter().any(|s| !s.is_finite()) {
        return None;
    }

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(GATE_WINDOW);
    let inverse = planner.plan_fft_inverse(GATE_WINDOW);
    let window: Vec<f32> = (0..GATE_WINDOW)
        .map(|i| {
            let phase = std::f32::consts::TAU * i as f32 / GATE_WINDOW as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect();

    let frame_count = (samples.len() - GATE_WINDOW) / GATE_HOP + 1;
    let mut spectra: Vec<Vec<Complex<f32>>> = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let start = frame * GATE_HOP;
        let mut buf: Vec<Complex<f32>> = (0..GATE_WINDOW)
            .map(|i| Complex::new(samples[start + i] * window[i], 0.0))
            .collect();
        forward.process(&mut buf);
        spectra.push(buf);
    }

    // Noise floor per bin: mean magnitude over the quietest fifth of frames.
    let mut by_energy: Vec<(usize, f32)> = spectra
        .iter()
        .enumerate()
        .map(|(i, s)| (i, s.iter().map(|c| c.norm_sqr()).sum()))
        .collect();
    by_energy.sort_by(|a, b| a.1.total_cmp(&b.1));
    let quiet_count = (frame_count / 5).max(1);
    let mut floor = vec![0.0f32; GATE_WINDOW];
    for &(idx, _) in by_energy.iter().take(quiet_count) {
        for (bin, c) in spectra[idx].iter().enumerate() {
            floor[bin] += c.norm();
        }
    }
    for f in floor.iter_mut() {
        *f /= quiet_count as f32;
    }

    // Gate each frame, smoothing the mask over neighbouring bins to avoid
    // musical-noise artifacts.
    for spectrum in spectra.iter_mut() {
        let raw: Vec<f32> = spectrum
            .iter()
            .enumerate()
            .map(|(bin, c)| {
                if c.norm() > floor[bin] * GATE_RATIO {
                    1.0
                } else {
                    FLOOR_GAIN
                }
            })
            .collect();
        for bin in 0..GATE_WINDOW {
            let lo = bin.saturating_sub(1);
            let hi = (bin + 1).min(GATE_WINDOW - 1);
            let gain = (raw[lo] + raw[bin] + raw[hi]) / 3.0;
            spectrum[bin] *= gain;
        }
    }

    // Overlap-add resynthesis, renormalized by the accumulated window energy.
    let mut out = vec![0.0f32; samples.len()];
    let mut weight = vec![0.0f32; samples.len()];
    for (frame, spectrum) in spectra.iter_mut().enumerate() {
        inverse.process(spectrum);
        let start = frame * GATE_HOP;
        for i in 0..GATE_WINDOW {
            let value = spectrum[i].re / GATE_WINDOW as f32;
            out[start + i] += value * window[i];
            weight[start + i] += window[i] * window[i];
        }
    }
    for i in 0..out.len() {
        if weight[i] > 1e-6 {
            out[i] /= weight[i];
        } else {
            // Edges and the tail past the last full frame keep the original.
            out[i] = samples[i];
        }
    }

    if out.iter().any(|s| !s.is_finite()) {
        return None;
    }
    Some(out)
}
