//! WAV decoding/encoding and sample-rate conversion

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;
use tracing::{debug, info};

const SINC_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum AudioIoError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
    #[error("{0} contains no audio")]
    Empty(PathBuf),
    #[error("Resample error: {0}")]
    Resample(String),
}

/// Mono f32 audio with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file and mix it down to mono
pub fn read_wav_mono(path: &Path) -> Result<AudioBuffer, AudioIoError> {
    let read_err = |message: String| AudioIoError::Read {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = hound::WavReader::open(path).map_err(|e| read_err(e.to_string()))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| read_err(e.to_string()))?,
        SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| read_err(e.to_string()))?
        }
    };

    let mono = to_mono(&samples, spec.channels as usize);
    if mono.is_empty() {
        return Err(AudioIoError::Empty(path.to_path_buf()));
    }
    debug!(
        path = %path.display(),
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        frames = mono.len(),
        "decoded wav"
    );
    Ok(AudioBuffer::new(mono, spec.sample_rate))
}

/// Read a WAV file as mono at `target_rate`
pub fn load_audio(path: &Path, target_rate: u32) -> Result<AudioBuffer, AudioIoError> {
    let buffer = read_wav_mono(path)?;
    if buffer.sample_rate == target_rate {
        return Ok(buffer);
    }
    let samples = resample(&buffer.samples, buffer.sample_rate, target_rate)?;
    info!(
        path = %path.display(),
        from = buffer.sample_rate,
        to = target_rate,
        "resampled input"
    );
    Ok(AudioBuffer::new(samples, target_rate))
}

/// Write mono audio as 24-bit PCM, creating parent directories
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> Result<(), AudioIoError> {
    let write_err = |message: String| AudioIoError::Write {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 24,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(|e| write_err(e.to_string()))?;
    for &s in &buffer.samples {
        let value = (s.clamp(-1.0, 1.0) * 8_388_607.0).round() as i32;
        writer
            .write_sample(value)
            .map_err(|e| write_err(e.to_string()))?;
    }
    writer.finalize().map_err(|e| write_err(e.to_string()))?;
    info!(path = %path.display(), frames = buffer.samples.len(), "wrote wav");
    Ok(())
}

/// Convert interleaved samples to mono by averaging channels
pub fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|ch| ch.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample between two rates
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioIoError> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioIoError::Resample(format!(
            "invalid rates {from_rate} -> {to_rate}"
        )));
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let target_len = (samples.len() as f64 * ratio).round() as usize;
    resample_to_len(samples, ratio, target_len)
}

/// Resample by `ratio` and return exactly `target_len` samples
///
/// The input is padded so the sinc filter's delay can be trimmed off the
/// front; the output is zero-filled if it comes up short.
pub fn resample_to_len(
    samples: &[f32],
    ratio: f64,
    target_len: usize,
) -> Result<Vec<f32>, AudioIoError> {
    if samples.is_empty() || target_len == 0 {
        return Ok(vec![0.0; target_len]);
    }
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(AudioIoError::Resample(format!("invalid ratio {ratio}")));
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut padded = samples.to_vec();
    padded.resize(samples.len() + SINC_LEN * 2, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, padded.len(), 1)
        .map_err(|e| AudioIoError::Resample(format!("init: {e}")))?;
    let delay = resampler.output_delay();

    let input = vec![padded];
    let output = resampler
        .process(&input, None)
        .map_err(|e| AudioIoError::Resample(e.to_string()))?;

    let mut out: Vec<f32> = output
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .skip(delay)
        .take(target_len)
        .collect();
    out.resize(target_len, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_to_mono() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&stereo, 1), stereo);
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/tone.wav");
        let buffer = AudioBuffer::new(sine(220.0, 8000, 0.25), 8000);
        write_wav(&path, &buffer).unwrap();

        let back = read_wav_mono(&path).unwrap();
        assert_eq!(back.sample_rate, 8000);
        assert_eq!(back.len(), buffer.len());
        let max_err = back
            .samples
            .iter()
            .zip(&buffer.samples)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-5);
    }

    #[test]
    fn test_stereo_file_is_mixed_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let mono = read_wav_mono(&path).unwrap();
        assert_eq!(mono.len(), 100);
        assert!(mono.samples.iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn test_missing_file() {
        let err = read_wav_mono(Path::new("/nonexistent/take.wav")).unwrap_err();
        assert!(matches!(err, AudioIoError::Read { .. }));
    }

    #[test]
    fn test_resample_length_and_content() {
        let input = sine(200.0, 16000, 0.5);
        let out = resample(&input, 16000, 8000).unwrap();
        assert_eq!(out.len(), 4000);
        // Delay is compensated: the sine stays in phase
        let expected = sine(200.0, 8000, 0.5);
        let err = out[500..3500]
            .iter()
            .zip(&expected[500..3500])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(err < 0.1, "max error {err}");
    }

    #[test]
    fn test_resample_same_rate_is_copy() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 44100, 44100).unwrap(), input);
    }
}
