#![allow(dead_code)]

//! Deterministic audio generation for identification tests.
//!
//! Every generator is seeded or closed-form so test runs are
//! reproducible. The "sweep" carries harmonics and a slow tremolo: the
//! amplitude modulation pins spectral peaks to known instants, which
//! makes sub-clip alignment checks exact.

use earmark::PcmAudio;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

pub const RATE: u32 = 22_050;
pub const HOP: usize = 512;

/// Install a subscriber once so pipeline tracing shows up under
/// `cargo test -- --nocapture`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Wrap mono samples at the canonical rate.
pub fn pcm(samples: Vec<f32>) -> PcmAudio {
    PcmAudio {
        samples,
        sample_rate: RATE,
        channels: 1,
    }
}

/// Textured sine sweep: a fundamental rising 100 Hz to 1.2 kHz with
/// eight harmonics and a slow tremolo. The harmonic stack keeps the
/// constellation dense enough that added noise cannot displace the real
/// peaks, and the tremolo pins peak instants regardless of where an
/// excerpt's analysis frames fall.
pub fn sweep(secs: f32) -> Vec<f32> {
    let total = (secs * RATE as f32) as usize;
    let (f0, f1) = (100.0f32, 1_200.0f32);

    (0..total)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            let phase = 2.0 * PI * (f0 * t + (f1 - f0) * t * t / (2.0 * secs));
            let tremolo = 1.0 - 0.25 * (1.0 - (2.0 * PI * 3.5 * t).cos());
            let voices: f32 = (1..=8)
                .map(|k| (k as f32 * phase).sin() / k as f32)
                .sum();
            0.25 * tremolo * voices
        })
        .collect()
}

/// Seeded white noise.
pub fn white_noise(secs: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let total = (secs * RATE as f32) as usize;
    (0..total).map(|_| rng.gen_range(-0.5..0.5)).collect()
}

/// Seeded pink noise via the Paul Kellet filter cascade.
pub fn pink_noise(secs: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let total = (secs * RATE as f32) as usize;
    let (mut b0, mut b1, mut b2) = (0.0f32, 0.0f32, 0.0f32);

    let mut samples: Vec<f32> = (0..total)
        .map(|_| {
            let white: f32 = rng.gen_range(-1.0..1.0);
            b0 = 0.997 * b0 + 0.029591 * white;
            b1 = 0.985 * b1 + 0.032534 * white;
            b2 = 0.950 * b2 + 0.048056 * white;
            b0 + b1 + b2 + 0.1848 * white
        })
        .collect();

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        let scale = 0.5 / peak;
        for s in &mut samples {
            *s *= scale;
        }
    }
    samples
}

/// Contiguous excerpt by time. Start and end need not land on analysis
/// frame boundaries.
pub fn clip_secs(samples: &[f32], from: f32, to: f32) -> Vec<f32> {
    let a = (from * RATE as f32) as usize;
    let b = ((to * RATE as f32) as usize).min(samples.len());
    samples[a..b].to_vec()
}

/// Contiguous excerpt starting on an analysis frame boundary, so the
/// excerpt's spectrogram frames coincide exactly with the source's.
pub fn clip_frames(samples: &[f32], start_frame: usize, num_frames: usize) -> Vec<f32> {
    let a = start_frame * HOP;
    let b = (a + num_frames * HOP).min(samples.len());
    samples[a..b].to_vec()
}

/// Apply a linear gain.
pub fn gain(samples: &[f32], factor: f32) -> Vec<f32> {
    samples.iter().map(|s| s * factor).collect()
}

/// Mix `noise` into `signal` at the given signal-to-noise ratio.
pub fn mix_at_snr(signal: &[f32], noise: &[f32], snr_db: f32) -> Vec<f32> {
    let power = |xs: &[f32]| xs.iter().map(|x| x * x).sum::<f32>() / xs.len() as f32;
    let signal_rms = power(signal).sqrt();
    let noise_rms = power(noise).sqrt().max(1e-12);

    let target_noise_rms = signal_rms / 10f32.powf(snr_db / 20.0);
    let scale = target_noise_rms / noise_rms;

    signal
        .iter()
        .zip(noise.iter().cycle())
        .map(|(s, n)| s + n * scale)
        .collect()
}
