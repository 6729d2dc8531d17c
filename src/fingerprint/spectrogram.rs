//! PCM to log-magnitude spectrogram.
//!
//! Downmixes to mono, resamples to the canonical rate, then runs a Hann
//! windowed STFT and converts magnitudes to decibels relative to the
//! loudest bin. Output is deterministic for identical input.

use crate::config::AudioConfig;
use crate::error::{Error, Result};
use rayon::prelude::*;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use tracing::debug;

/// Minimum input length accepted by the processor.
pub const MIN_INPUT_MS: u64 = 100;

/// Peak absolute amplitude at or below which input counts as silence.
pub const SILENCE_AMPLITUDE: f32 = 1e-5;

const RESAMPLE_CHUNK: usize = 1024;
const DB_EPSILON: f32 = 1e-10;

/// Time-frequency magnitude matrix in dB, frame-major.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// `frames[t][f]`, each frame holding `bins` values in `[db_floor, 0]`.
    pub frames: Vec<Vec<f32>>,
    /// Frequency bins per frame (`fft_size / 2 + 1`).
    pub bins: usize,
    /// Seconds represented by one frame hop.
    pub frame_secs: f64,
    /// Frequency covered by one bin, in Hz.
    pub bin_hz: f64,
}

impl Spectrogram {
    /// Number of time frames.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

/// Spectrogram processor bound to one [`AudioConfig`].
#[derive(Debug, Clone)]
pub struct SpectrogramProcessor {
    config: AudioConfig,
}

impl SpectrogramProcessor {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// Run the full front half of the pipeline: validate, downmix,
    /// resample to the canonical rate, then STFT.
    pub fn process(&self, samples: &[f32], sample_rate: u32, channels: u16) -> Result<Spectrogram> {
        if channels == 0 || samples.is_empty() {
            return Err(Error::InvalidInput("empty audio input".to_string()));
        }
        if !(8_000..=192_000).contains(&sample_rate) {
            return Err(Error::UnsupportedSampleRate(sample_rate));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(Error::Processing(
                "input contains non-finite samples".to_string(),
            ));
        }

        let mono = downmix(samples, channels as usize);

        let got_ms = (mono.len() as u64 * 1000) / sample_rate as u64;
        if got_ms < MIN_INPUT_MS {
            return Err(Error::TooShort {
                got_ms,
                min_ms: MIN_INPUT_MS,
            });
        }
        if mono.iter().all(|s| s.abs() <= SILENCE_AMPLITUDE) {
            return Err(Error::SilentAudio);
        }

        let canonical = resample(&mono, sample_rate, self.config.sample_rate)?;
        debug!(
            input_rate = sample_rate,
            canonical_rate = self.config.sample_rate,
            samples = canonical.len(),
            "prepared mono signal"
        );

        self.stft(&canonical)
    }

    fn stft(&self, signal: &[f32]) -> Result<Spectrogram> {
        let window_size = self.config.fft_size;
        let hop = self.config.hop_length;
        let bins = window_size / 2 + 1;

        let window = hann_window(window_size);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_size);

        // One frame per hop while the frame start is inside the signal.
        // The tail frames are zero padded; no center padding.
        let starts: Vec<usize> = (0..signal.len()).step_by(hop).collect();

        let magnitudes: Vec<Vec<f32>> = starts
            .into_par_iter()
            .map(|start| {
                let end = (start + window_size).min(signal.len());
                let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(window_size);
                for (i, &s) in signal[start..end].iter().enumerate() {
                    buffer.push(Complex {
                        re: s * window[i],
                        im: 0.0,
                    });
                }
                buffer.resize(window_size, Complex { re: 0.0, im: 0.0 });

                fft.process(&mut buffer);

                buffer[..bins]
                    .iter()
                    .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                    .collect()
            })
            .collect();

        let frames = self.to_decibels(magnitudes)?;

        Ok(Spectrogram {
            frames,
            bins,
            frame_secs: hop as f64 / self.config.sample_rate as f64,
            bin_hz: self.config.sample_rate as f64 / window_size as f64,
        })
    }

    /// Max-normalize, convert to dB and clamp to `[db_floor, 0]`.
    fn to_decibels(&self, magnitudes: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        let peak = magnitudes
            .iter()
            .flat_map(|frame| frame.iter())
            .fold(0.0f32, |acc, &m| acc.max(m));
        if peak <= 0.0 || !peak.is_finite() {
            return Err(Error::SilentAudio);
        }

        let floor = self.config.db_floor;
        let frames = magnitudes
            .into_iter()
            .map(|frame| {
                frame
                    .into_iter()
                    .map(|m| {
                        let db = 20.0 * (m / peak).max(DB_EPSILON).log10();
                        db.clamp(floor, 0.0)
                    })
                    .collect()
            })
            .collect();
        Ok(frames)
    }
}

/// Average interleaved channels down to one.
fn downmix(input: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return input.to_vec();
    }
    input
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Band-limited resampling to `output_rate`. Identity when rates match.
fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        2.0,
        params,
        RESAMPLE_CHUNK,
        1,
    )
    .map_err(|e| Error::Processing(format!("failed to create resampler: {e}")))?;

    let mut output = Vec::with_capacity(
        (input.len() as u64 * output_rate as u64 / input_rate as u64) as usize + RESAMPLE_CHUNK,
    );
    let mut position = 0;

    while position + RESAMPLE_CHUNK <= input.len() {
        let chunk = vec![input[position..position + RESAMPLE_CHUNK].to_vec()];
        let result = resampler
            .process(&chunk, None)
            .map_err(|e| Error::Processing(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&result[0]);
        position += RESAMPLE_CHUNK;
    }

    let remaining = input.len() - position;
    if remaining > 0 {
        let mut padded = vec![0.0; RESAMPLE_CHUNK];
        padded[..remaining].copy_from_slice(&input[position..]);
        let result = resampler
            .process(&[padded], None)
            .map_err(|e| Error::Processing(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output)
}

fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()))
        .collect()
}
