//! WAV reading and writing on top of hound

use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::Waveform;
use crate::Result;

fn pcm_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Read a 16-bit PCM WAV file into a waveform.
pub fn read_wav(path: &Path) -> Result<Waveform> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "Unsupported WAV format in {}: expected 16-bit PCM, got {}-bit {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to decode WAV samples from {}", path.display()))?;
    Ok(Waveform::new(samples, spec.sample_rate, spec.channels))
}

/// Write a waveform out as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, waveform: &Waveform) -> Result<()> {
    let spec = pcm_spec(waveform.sample_rate(), waveform.channels());
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for &sample in waveform.samples() {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {}", path.display()))?;
    Ok(())
}

/// Encode mono samples as an in-memory WAV, for uploads that want a file body.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, pcm_spec(sample_rate, 1))
            .context("Failed to start in-memory WAV encode")?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer
            .finalize()
            .context("Failed to finalize in-memory WAV encode")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.wav");
        let original = Waveform::new(vec![0, 1000, -1000, i16::MAX, i16::MIN], 16_000, 1);

        write_wav(&path, &original).unwrap();
        let restored = read_wav(&path).unwrap();

        assert_eq!(restored, original);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_wav(&dir.path().join("nope.wav")).is_err());
    }

    #[test]
    fn test_encode_wav_emits_riff_header() {
        let bytes = encode_wav(&[0; 160], 16_000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44 byte header plus two bytes per sample
        assert_eq!(bytes.len(), 44 + 160 * 2);
    }

    #[test]
    fn test_encode_preserves_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate.wav");
        std::fs::write(&path, encode_wav(&[5; 16], 16_000).unwrap()).unwrap();
        let wave = read_wav(&path).unwrap();
        assert_eq!(wave.sample_rate(), 16_000);
        assert_eq!(wave.channels(), 1);
        assert_eq!(wave.samples(), &[5; 16]);
    }
}
